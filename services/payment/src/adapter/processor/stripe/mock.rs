use std::boxed::Box;
use std::result::Result;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::model::{GatewayOutcome, GatewaySubscriptionModel, GatewayVerifyResult};

use super::super::{mock_outcome, AppProcessorErrorReason, GatewaySecret};
use super::AbstStripeContext;

pub(crate) struct MockProcessorStripeCtx {
    secret: GatewaySecret,
}

impl MockProcessorStripeCtx {
    pub(crate) fn build(secret: GatewaySecret) -> Box<dyn AbstStripeContext> {
        Box::new(Self { secret })
    }
}

#[async_trait]
impl AbstStripeContext for MockProcessorStripeCtx {
    async fn verify_checkout(
        &self,
        tx_ref: &str,
        session_id: Option<&str>,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        let outcome = mock_outcome(tx_ref);
        let mut out = GatewayVerifyResult::new(outcome);
        out.provider_reference = Some(format!("pi_mock_{tx_ref}"));
        out.provider_status = Some(
            match outcome {
                GatewayOutcome::Success => "paid",
                GatewayOutcome::Failed => "expired",
                GatewayOutcome::Pending => "unpaid",
            }
            .to_string(),
        );
        out.raw = serde_json::json!({
            "id": session_id.unwrap_or("cs_mock"),
            "client_reference_id": tx_ref,
        });
        Ok(out)
    }

    async fn retrieve_subscription(
        &self,
        _sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorErrorReason> {
        Err(AppProcessorErrorReason::NotSupport)
    }

    async fn latest_paid_invoice(
        &self,
        _sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorErrorReason> {
        Ok(None)
    }

    fn webhook_secret(&self) -> &str {
        self.secret.webhook_secret.as_str()
    }
} // end of impl MockProcessorStripeCtx
