mod mock;
mod resources;

use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use self::resources::VerifyTransactionResp;
use super::gateway_client::GatewayEndpoint;
use super::{check_path_segment, AppProcessorErrorReason, GatewaySecret};
use crate::model::GatewayVerifyResult;

pub(super) use self::mock::MockProcessorChapaCtx;

const API_VERSION: &str = "v1";

#[async_trait]
pub(super) trait AbstChapaContext: Send + Sync {
    async fn verify_transaction(
        &self,
        tx_ref: &str,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason>;

    fn webhook_secret(&self) -> &str;
}

pub(super) struct AppProcessorChapaCtx {
    endpoint: GatewayEndpoint,
    secret: GatewaySecret,
    logctx: Arc<AppLogContext>,
}

impl AppProcessorChapaCtx {
    pub(super) fn try_build(
        host: &str,
        port: u16,
        secret: GatewaySecret,
        logctx: Arc<AppLogContext>,
    ) -> Result<Box<dyn AbstChapaContext>, AppProcessorErrorReason> {
        let endpoint =
            GatewayEndpoint::try_build(host, port, API_VERSION, secret.api_key.as_str())?;
        let obj = Self {
            endpoint,
            secret,
            logctx,
        };
        Ok(Box::new(obj))
    }
}

#[async_trait]
impl AbstChapaContext for AppProcessorChapaCtx {
    async fn verify_transaction(
        &self,
        tx_ref: &str,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        check_path_segment(tx_ref)?;
        let mut conn = self.endpoint.connect(self.logctx.clone()).await?;
        let path = format!("/transaction/verify/{tx_ref}");
        let raw = conn
            .get_json::<serde_json::Value>(path.as_str())
            .await?
            .into_found()?;
        let resp = serde_json::from_value::<VerifyTransactionResp>(raw.clone())
            .map_err(|e| AppProcessorErrorReason::CorruptedResponse(e.to_string()))?;
        let out = resp.into_verify_result(raw);
        let logctx_p = &self.logctx;
        app_log_event!(
            logctx_p,
            AppLogLevel::DEBUG,
            "tx_ref:{tx_ref}, outcome:{:?}, provider-status:{:?}",
            out.outcome,
            out.provider_status
        );
        Ok(out)
    }

    fn webhook_secret(&self) -> &str {
        self.secret.webhook_secret.as_str()
    }
}
