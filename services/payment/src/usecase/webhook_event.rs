use std::boxed::Box;
use std::collections::HashMap;
use std::result::Result;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsnVal;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::processor::{AbstractPaymentProcessor, AppProcessorError};
use crate::adapter::repository::AbstractLedgerRepo;
use crate::model::money::from_gateway_minor;
use crate::model::{meta_label, GatewayOutcome, GatewayVerifyResult, PaySource};

use super::finalize_payment::{FinalizePaymentUcError, FinalizePaymentUseCase, FinalizedCheckout};
use super::finalize_subscription::{
    FinalizeSubscriptionUcError, FinalizeSubscriptionUseCase, SubscriptionFinalizeReq,
    SubscriptionFinalizeResult,
};
use super::verify_payment::{VerifyPaymentOutcome, VerifyPaymentUcError, VerifyPaymentUseCase};

#[derive(Debug)]
pub enum WebhookUcError {
    MissingSignature,
    Signature(AppProcessorError),
    MalformedPayload(String),
    Verify(VerifyPaymentUcError),
    Finalize(FinalizePaymentUcError),
    Subscription(FinalizeSubscriptionUcError),
}

impl From<VerifyPaymentUcError> for WebhookUcError {
    fn from(value: VerifyPaymentUcError) -> Self {
        Self::Verify(value)
    }
}
impl From<FinalizePaymentUcError> for WebhookUcError {
    fn from(value: FinalizePaymentUcError) -> Self {
        Self::Finalize(value)
    }
}
impl From<FinalizeSubscriptionUcError> for WebhookUcError {
    fn from(value: FinalizeSubscriptionUcError) -> Self {
        Self::Subscription(value)
    }
}

#[derive(Debug)]
pub enum WebhookDispatched {
    Ignored(String),
    Verified(VerifyPaymentOutcome),
    CheckoutFailed(FinalizedCheckout),
    Subscription(SubscriptionFinalizeResult),
}

#[derive(Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Deserialize)]
struct StripeEventData {
    object: JsnVal,
}

#[derive(Deserialize)]
struct StripeSessionObject {
    id: String,
    mode: Option<String>,
    status: Option<String>,
    client_reference_id: Option<String>,
    subscription: Option<JsnVal>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct StripeInvoiceObject {
    id: String,
    subscription: Option<JsnVal>,
    // newer API versions move the subscription under the invoice parent
    parent: Option<JsnVal>,
    billing_reason: Option<String>,
    #[serde(default)]
    amount_paid: i64,
    currency: Option<String>,
}

#[derive(Deserialize)]
struct ChapaEvent {
    event: Option<String>,
    status: Option<String>,
    tx_ref: Option<String>,
    reference: Option<String>,
}

// expandable field of Stripe resource, either plain id or embedded object
fn expandable_id(v: &JsnVal) -> Option<String> {
    match v {
        JsnVal::String(s) if !s.is_empty() => Some(s.clone()),
        JsnVal::Object(m) => m.get("id").and_then(JsnVal::as_str).map(ToString::to_string),
        _others => None,
    }
}

impl StripeSessionObject {
    fn tx_ref(&self) -> Option<&str> {
        self.client_reference_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .or(self.metadata.get(meta_label::TX_REF).map(String::as_str))
    }
}

impl StripeInvoiceObject {
    fn subscription_id(&self) -> Option<String> {
        self.subscription.as_ref().and_then(expandable_id).or(self
            .parent
            .as_ref()
            .and_then(|p| p.pointer("/subscription_details/subscription"))
            .and_then(expandable_id))
    }
}

/// Dispatches a signed gateway event to the finalization use cases.
///
/// Gateways redeliver an event until they get a success response, every
/// path below is idempotent so redelivery never applies money twice.
pub struct WebhookEventUseCase {
    pub repo: Arc<Box<dyn AbstractLedgerRepo>>,
    pub processors: Arc<Box<dyn AbstractPaymentProcessor>>,
    pub logctx: Arc<AppLogContext>,
    pub max_generated_months: u16,
}

impl WebhookEventUseCase {
    pub async fn execute(
        &self,
        source: PaySource,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookDispatched, WebhookUcError> {
        let sig = signature
            .filter(|v| !v.is_empty())
            .ok_or(WebhookUcError::MissingSignature)?;
        self.processors
            .verify_webhook_signature(source, sig, payload, Utc::now())
            .map_err(WebhookUcError::Signature)?;
        match source {
            PaySource::Stripe => self.dispatch_stripe(payload).await,
            PaySource::Chapa => self.dispatch_chapa(payload).await,
        }
    }

    async fn dispatch_stripe(&self, payload: &[u8]) -> Result<WebhookDispatched, WebhookUcError> {
        let logctx_p = &self.logctx;
        let event = serde_json::from_slice::<StripeEvent>(payload)
            .map_err(|e| WebhookUcError::MalformedPayload(e.to_string()))?;
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "stripe-event:{}, type:{}",
            event.id.as_str(),
            event.event_type.as_str()
        );
        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let obj = Self::parse_object::<StripeSessionObject>(event.data.object)?;
                if obj.mode.as_deref() == Some("subscription") {
                    let sub_id = obj.subscription.as_ref().and_then(expandable_id).ok_or(
                        WebhookUcError::MalformedPayload("session-without-subscription".to_string()),
                    )?;
                    let req = SubscriptionFinalizeReq {
                        is_initial_payment: true,
                        session_id: Some(obj.id),
                        ..Default::default()
                    };
                    let out = self.subscription_uc().execute(sub_id.as_str(), req).await?;
                    Ok(WebhookDispatched::Subscription(out))
                } else {
                    let tx_ref = obj
                        .tx_ref()
                        .ok_or(WebhookUcError::MalformedPayload("missing-tx-ref".to_string()))?;
                    let out = self.verify_uc().execute(tx_ref).await?;
                    Ok(WebhookDispatched::Verified(out))
                }
            }
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                let raw = event.data.object.clone();
                let obj = Self::parse_object::<StripeSessionObject>(event.data.object)?;
                let tx_ref = obj
                    .tx_ref()
                    .ok_or(WebhookUcError::MalformedPayload("missing-tx-ref".to_string()))?;
                let mut result = GatewayVerifyResult::new(GatewayOutcome::Failed);
                result.provider_reference = Some(obj.id.clone());
                result.provider_status = obj.status.clone();
                result.raw = raw;
                let out = self.finalize_uc().execute(tx_ref, result).await?;
                Ok(WebhookDispatched::CheckoutFailed(out))
            }
            "invoice.paid" | "invoice.payment_succeeded" => {
                let obj = Self::parse_object::<StripeInvoiceObject>(event.data.object)?;
                let Some(sub_id) = obj.subscription_id() else {
                    return Ok(WebhookDispatched::Ignored(event.event_type));
                };
                let reason = obj.billing_reason.as_deref().unwrap_or("");
                if reason == "subscription_create" {
                    // the first period is recorded through the completed
                    // checkout session of the same subscription
                    app_log_event!(
                        logctx_p,
                        AppLogLevel::DEBUG,
                        "skip-initial-invoice, sub:{sub_id}, invoice:{}",
                        obj.id.as_str()
                    );
                    return Ok(WebhookDispatched::Ignored(event.event_type));
                }
                let invoice_amount = obj
                    .currency
                    .as_deref()
                    .map(|c| from_gateway_minor(obj.amount_paid, c));
                let req = SubscriptionFinalizeReq {
                    is_initial_payment: false,
                    invoice_id: Some(obj.id),
                    invoice_amount,
                    billing_reason: obj.billing_reason,
                    ..Default::default()
                };
                let out = self.subscription_uc().execute(sub_id.as_str(), req).await?;
                Ok(WebhookDispatched::Subscription(out))
            }
            _others => Ok(WebhookDispatched::Ignored(event.event_type)),
        }
    } // end of fn dispatch_stripe

    async fn dispatch_chapa(&self, payload: &[u8]) -> Result<WebhookDispatched, WebhookUcError> {
        let logctx_p = &self.logctx;
        let raw = serde_json::from_slice::<JsnVal>(payload)
            .map_err(|e| WebhookUcError::MalformedPayload(e.to_string()))?;
        let event = Self::parse_object::<ChapaEvent>(raw.clone())?;
        // older deliveries carry only the charge status
        let label = match (event.event.as_deref(), event.status.as_deref()) {
            (Some(e), _) => e.to_lowercase(),
            (None, Some(s)) => format!("charge.{}", s.to_lowercase()),
            (None, None) => String::new(),
        };
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "chapa-event:{label}, tx_ref:{:?}",
            event.tx_ref
        );
        let tx_ref = match event.tx_ref.as_deref().filter(|v| !v.is_empty()) {
            Some(v) => v,
            None if label.is_empty() => return Ok(WebhookDispatched::Ignored(label)),
            None => return Err(WebhookUcError::MalformedPayload("missing-tx-ref".to_string())),
        };
        match label.as_str() {
            "charge.success" => {
                let out = self.verify_uc().execute(tx_ref).await?;
                Ok(WebhookDispatched::Verified(out))
            }
            "charge.failed" | "charge.cancelled" => {
                let mut result = GatewayVerifyResult::new(GatewayOutcome::Failed);
                result.provider_reference = event.reference.clone();
                result.provider_status = event.status.clone();
                result.raw = raw;
                let out = self.finalize_uc().execute(tx_ref, result).await?;
                Ok(WebhookDispatched::CheckoutFailed(out))
            }
            _others => Ok(WebhookDispatched::Ignored(label)),
        }
    } // end of fn dispatch_chapa

    fn parse_object<T: for<'de> Deserialize<'de>>(v: JsnVal) -> Result<T, WebhookUcError> {
        serde_json::from_value::<T>(v).map_err(|e| WebhookUcError::MalformedPayload(e.to_string()))
    }

    fn verify_uc(&self) -> VerifyPaymentUseCase {
        VerifyPaymentUseCase {
            repo: self.repo.clone(),
            processors: self.processors.clone(),
            logctx: self.logctx.clone(),
            max_generated_months: self.max_generated_months,
        }
    }

    fn finalize_uc(&self) -> FinalizePaymentUseCase {
        FinalizePaymentUseCase {
            repo: self.repo.clone(),
            logctx: self.logctx.clone(),
            max_generated_months: self.max_generated_months,
        }
    }

    fn subscription_uc(&self) -> FinalizeSubscriptionUseCase {
        FinalizeSubscriptionUseCase {
            repo: self.repo.clone(),
            processors: self.processors.clone(),
            logctx: self.logctx.clone(),
        }
    }
} // end of impl WebhookEventUseCase
