use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{GatewayOutcome, GatewayVerifyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayStatus {
    Approved,
    Rejected,
    #[serde(rename = "pending")]
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaySource {
    Stripe,
    Chapa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayIntent {
    Deposit,
    Tuition,
    Subscription,
}

macro_rules! impl_label_conversion {
    ($typ:ty, $( ($variant:path, $label:literal) ),+ ) => {
        impl $typ {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $variant => $label, )+
                }
            }
        }
        impl FromStr for $typ {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($variant), )+
                    _others => Err(s.to_string()),
                }
            }
        }
    };
}

impl_label_conversion!(
    PayStatus,
    (PayStatus::Approved, "Approved"),
    (PayStatus::Rejected, "Rejected"),
    (PayStatus::Pending, "pending")
);
impl_label_conversion!(
    PaySource,
    (PaySource::Stripe, "stripe"),
    (PaySource::Chapa, "chapa")
);
impl_label_conversion!(
    PayIntent,
    (PayIntent::Deposit, "deposit"),
    (PayIntent::Tuition, "tuition"),
    (PayIntent::Subscription, "subscription")
);

impl From<GatewayOutcome> for PayStatus {
    fn from(value: GatewayOutcome) -> Self {
        match value {
            GatewayOutcome::Success => Self::Approved,
            GatewayOutcome::Failed => Self::Rejected,
            GatewayOutcome::Pending => Self::Pending,
        }
    }
}

/// One confirmed monetary event, never deleted
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentModel {
    pub id: u64, // assigned by ledger store on insert
    pub student_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PayStatus,
    pub source: PaySource,
    pub intent: PayIntent,
    // `txRef` of a checkout, or correlation id (session / invoice) of
    // a subscription payment
    pub transaction_id: String,
    pub idempotency_key: Option<String>,
    pub reason: Option<String>,
    pub provider_reference: Option<String>,
    pub provider_status: Option<String>,
    pub provider_fee: Option<Decimal>,
    pub provider_payload: serde_json::Value,
    pub subscription_id: Option<u64>,
    pub create_time: DateTime<Utc>,
}

impl PaymentModel {
    pub fn is_approved(&self) -> bool {
        matches!(self.status, PayStatus::Approved)
    }

    /// copies provenance of normalized gateway result, the status follows
    /// the outcome
    pub fn update_from_gateway(&mut self, result: &GatewayVerifyResult) {
        self.status = PayStatus::from(result.outcome);
        if result.provider_reference.is_some() {
            self.provider_reference = result.provider_reference.clone();
        }
        if result.provider_status.is_some() {
            self.provider_status = result.provider_status.clone();
        }
        if result.provider_fee.is_some() {
            self.provider_fee = result.provider_fee;
        }
        if !result.raw.is_null() {
            self.provider_payload = result.raw.clone();
        }
    }
}
