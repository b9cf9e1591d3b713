use serde::Serialize;

use crate::model::BillingMonth;
use crate::usecase::{
    FinalizedCheckout, SubscriptionFinalizeResult, VerifyPaymentOutcome, WebhookDispatched,
};

#[derive(Serialize, Debug, Default, PartialEq)]
pub struct VerifyPaymentRespDto {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyPaymentRespDto {
    pub fn error(detail: &str) -> Self {
        Self {
            error: Some(detail.to_string()),
            ..Default::default()
        }
    }
}

impl From<&VerifyPaymentOutcome> for VerifyPaymentRespDto {
    fn from(value: &VerifyPaymentOutcome) -> Self {
        match value {
            VerifyPaymentOutcome::AlreadyFinalized(_) | VerifyPaymentOutcome::Finalized(_) => {
                Self {
                    verified: true,
                    finalized: Some(true),
                    ..Default::default()
                }
            }
            VerifyPaymentOutcome::Failed(_) => Self {
                failed: Some(true),
                finalized: Some(true),
                ..Default::default()
            },
            VerifyPaymentOutcome::Pending(_) => Self {
                pending: Some(true),
                ..Default::default()
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CheckoutSummaryDto {
    pub tx_ref: String,
    pub status: &'static str,
    pub payment_id: Option<u64>,
    pub already_processed: bool,
    pub months: Vec<BillingMonth>,
}

impl From<&FinalizedCheckout> for CheckoutSummaryDto {
    fn from(value: &FinalizedCheckout) -> Self {
        Self {
            tx_ref: value.checkout.tx_ref.clone(),
            status: value.checkout.status.as_str(),
            payment_id: value.checkout.payment_id,
            already_processed: value.already_processed,
            months: value.months_written.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct SubscriptionSummaryDto {
    pub subscription_id: u64,
    pub status: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
}

impl From<&SubscriptionFinalizeResult> for SubscriptionSummaryDto {
    fn from(value: &SubscriptionFinalizeResult) -> Self {
        Self {
            subscription_id: value.subscription_id,
            status: value.status.clone(),
            already_processed: value.already_processed,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(tag = "label")]
pub enum WebhookAckDto {
    Ignored { event: String },
    Checkout(CheckoutSummaryDto),
    Verify(VerifyPaymentRespDto),
    Subscription(SubscriptionSummaryDto),
}

impl From<&WebhookDispatched> for WebhookAckDto {
    fn from(value: &WebhookDispatched) -> Self {
        match value {
            WebhookDispatched::Ignored(label) => Self::Ignored {
                event: label.clone(),
            },
            WebhookDispatched::Verified(o) => Self::Verify(VerifyPaymentRespDto::from(o)),
            WebhookDispatched::CheckoutFailed(c) => Self::Checkout(CheckoutSummaryDto::from(c)),
            WebhookDispatched::Subscription(s) => {
                Self::Subscription(SubscriptionSummaryDto::from(s))
            }
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorRespDto {
    pub error: String,
}
