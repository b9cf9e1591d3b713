use std::boxed::Box;
use std::result::Result;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::model::{GatewayOutcome, GatewayVerifyResult};

use super::super::{mock_outcome, AppProcessorErrorReason, GatewaySecret};
use super::AbstChapaContext;

pub(crate) struct MockProcessorChapaCtx {
    secret: GatewaySecret,
}

impl MockProcessorChapaCtx {
    pub(crate) fn build(secret: GatewaySecret) -> Box<dyn AbstChapaContext> {
        Box::new(Self { secret })
    }
}

#[async_trait]
impl AbstChapaContext for MockProcessorChapaCtx {
    async fn verify_transaction(
        &self,
        tx_ref: &str,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        let outcome = mock_outcome(tx_ref);
        let label = match outcome {
            GatewayOutcome::Success => "success",
            GatewayOutcome::Failed => "failed",
            GatewayOutcome::Pending => "pending",
        };
        let mut out = GatewayVerifyResult::new(outcome);
        out.provider_reference = Some(format!("APmock{tx_ref}"));
        out.provider_status = Some(label.to_string());
        out.provider_fee = Some(Decimal::new(350, 2));
        out.raw = serde_json::json!({
            "status": "success",
            "data": {"tx_ref": tx_ref, "status": label},
        });
        Ok(out)
    }

    fn webhook_secret(&self) -> &str {
        self.secret.webhook_secret.as_str()
    }
}
