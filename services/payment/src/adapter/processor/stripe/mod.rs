mod mock;
mod resources;

use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::StatusCode;
use rust_decimal::Decimal;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use self::resources::{
    CheckoutSession, Invoice, ListCheckoutSessionsQuery, ListInvoicesQuery, StripeList,
    Subscription,
};
use super::gateway_client::{GatewayConnection, GatewayEndpoint, GatewayReply};
use super::{check_path_segment, gateway_failure, AppProcessorErrorReason, GatewaySecret};
use crate::model::{money, GatewayOutcome, GatewaySubscriptionModel, GatewayVerifyResult};

pub(super) use self::mock::MockProcessorStripeCtx;

// Stripe caps page size of its list API at 100
const LIST_SCAN_LIMIT: u16 = 100;
const API_VERSION: &str = "v1";

#[async_trait]
pub(super) trait AbstStripeContext: Send + Sync {
    /// retrieves the checkout session by the id recorded at checkout creation,
    /// or scans recent sessions for the one correlated to `tx_ref`
    async fn verify_checkout(
        &self,
        tx_ref: &str,
        session_id: Option<&str>,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason>;

    async fn retrieve_subscription(
        &self,
        sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorErrorReason>;

    async fn latest_paid_invoice(
        &self,
        sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorErrorReason>;

    fn webhook_secret(&self) -> &str;
}

pub(super) struct AppProcessorStripeCtx {
    endpoint: GatewayEndpoint,
    secret: GatewaySecret,
    logctx: Arc<AppLogContext>,
}

impl AppProcessorStripeCtx {
    pub(super) fn try_build(
        host: &str,
        port: u16,
        secret: GatewaySecret,
        logctx: Arc<AppLogContext>,
    ) -> Result<Box<dyn AbstStripeContext>, AppProcessorErrorReason> {
        let endpoint =
            GatewayEndpoint::try_build(host, port, API_VERSION, secret.api_key.as_str())?;
        let obj = Self {
            endpoint,
            secret,
            logctx,
        };
        Ok(Box::new(obj))
    }

    fn session_to_result(
        raw: serde_json::Value,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        let session = serde_json::from_value::<CheckoutSession>(raw.clone())
            .map_err(|e| AppProcessorErrorReason::CorruptedResponse(e.to_string()))?;
        Ok(session.into_verify_result(raw))
    }

    async fn scan_recent_sessions(
        &self,
        conn: &mut GatewayConnection<'_>,
        tx_ref: &str,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        let logctx_p = &self.logctx;
        let query = ListCheckoutSessionsQuery {
            limit: LIST_SCAN_LIMIT,
        };
        let qs = serde_qs::to_string(&query)
            .map_err(|e| AppProcessorErrorReason::InvalidRequest(e.to_string()))?;
        let path = format!("/checkout/sessions?{qs}");
        let found = conn
            .get_json::<StripeList<serde_json::Value>>(path.as_str())
            .await?
            .into_found()?;
        for raw in found.data {
            let session = serde_json::from_value::<CheckoutSession>(raw.clone())
                .map_err(|e| AppProcessorErrorReason::CorruptedResponse(e.to_string()))?;
            if session.correlates(tx_ref) {
                return Ok(session.into_verify_result(raw));
            }
        }
        app_log_event!(
            logctx_p,
            AppLogLevel::WARNING,
            "session-not-found, tx_ref:{tx_ref}, more-pages:{}",
            found.has_more
        );
        let mut out = GatewayVerifyResult::new(GatewayOutcome::Pending);
        out.provider_status = Some("session-not-found".to_string());
        Ok(out)
    }
} // end of impl AppProcessorStripeCtx

#[async_trait]
impl AbstStripeContext for AppProcessorStripeCtx {
    async fn verify_checkout(
        &self,
        tx_ref: &str,
        session_id: Option<&str>,
    ) -> Result<GatewayVerifyResult, AppProcessorErrorReason> {
        let logctx_p = &self.logctx;
        let mut conn = self.endpoint.connect(self.logctx.clone()).await?;
        if let Some(sess_id) = session_id {
            check_path_segment(sess_id)?;
            let path = format!("/checkout/sessions/{sess_id}");
            match conn.get_json::<serde_json::Value>(path.as_str()).await? {
                GatewayReply::Found(raw) => return Self::session_to_result(raw),
                GatewayReply::Rejected(StatusCode::NOT_FOUND, _raw) => {
                    app_log_event!(
                        logctx_p,
                        AppLogLevel::WARNING,
                        "session-id-stale, tx_ref:{tx_ref}, session:{sess_id}"
                    );
                }
                GatewayReply::Rejected(status, raw) => return Err(gateway_failure(status, raw)),
            }
        }
        self.scan_recent_sessions(&mut conn, tx_ref).await
    }

    async fn retrieve_subscription(
        &self,
        sub_id: &str,
    ) -> Result<GatewaySubscriptionModel, AppProcessorErrorReason> {
        check_path_segment(sub_id)?;
        let mut conn = self.endpoint.connect(self.logctx.clone()).await?;
        let path = format!("/subscriptions/{sub_id}");
        let raw = conn
            .get_json::<serde_json::Value>(path.as_str())
            .await?
            .into_found()?;
        let sub = serde_json::from_value::<Subscription>(raw.clone())
            .map_err(|e| AppProcessorErrorReason::CorruptedResponse(e.to_string()))?;
        sub.into_model(raw)
            .map_err(AppProcessorErrorReason::CorruptedResponse)
    }

    async fn latest_paid_invoice(
        &self,
        sub_id: &str,
    ) -> Result<Option<Decimal>, AppProcessorErrorReason> {
        let query = ListInvoicesQuery {
            subscription: sub_id,
            status: "paid",
            limit: 1,
        };
        let qs = serde_qs::to_string(&query)
            .map_err(|e| AppProcessorErrorReason::InvalidRequest(e.to_string()))?;
        let mut conn = self.endpoint.connect(self.logctx.clone()).await?;
        let path = format!("/invoices?{qs}");
        let found = conn
            .get_json::<StripeList<Invoice>>(path.as_str())
            .await?
            .into_found()?;
        let amount = found.data.first().map(|inv| {
            let logctx_p = &self.logctx;
            app_log_event!(
                logctx_p,
                AppLogLevel::DEBUG,
                "sub:{sub_id}, invoice:{}, paid:{} {}",
                inv.id.as_str(),
                inv.amount_paid,
                inv.currency.as_str()
            );
            money::from_gateway_minor(inv.amount_paid, inv.currency.as_str())
        });
        Ok(amount)
    }

    fn webhook_secret(&self) -> &str {
        self.secret.webhook_secret.as_str()
    }
} // end of impl AppProcessorStripeCtx
