use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{BillingMonth, GatewayOutcome, PayIntent, PaySource};

const META_FINALIZED_AT: &str = "finalizedAt";
const META_SESSION_ID: &str = "sessionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStatus {
    Pending,
    Completed,
    Failed,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for CheckoutStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _others => Err(s.to_string()),
        }
    }
}

impl From<GatewayOutcome> for CheckoutStatus {
    fn from(value: GatewayOutcome) -> Self {
        match value {
            GatewayOutcome::Success => Self::Completed,
            GatewayOutcome::Failed => Self::Failed,
            GatewayOutcome::Pending => Self::Pending,
        }
    }
}

/// payment attempt initiated by a client, keyed by `tx_ref`
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutModel {
    pub tx_ref: String,
    pub student_id: String,
    pub intent: PayIntent,
    pub months: Vec<BillingMonth>,
    pub amount: Decimal,
    pub currency: String,
    pub source: PaySource,
    pub status: CheckoutStatus,
    pub payment_id: Option<u64>,
    pub metadata: serde_json::Value,
    pub create_time: DateTime<Utc>,
}

impl CheckoutModel {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, CheckoutStatus::Completed)
    }

    /// the checkout has been completed and linked to a payment
    pub fn already_finalized(&self) -> bool {
        self.is_completed() && self.payment_id.is_some()
    }

    /// gateway session id recorded when the checkout was created,
    /// currently only Stripe keeps it
    pub fn session_id(&self) -> Option<&str> {
        self.metadata
            .get(META_SESSION_ID)
            .and_then(serde_json::Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn finalized_at(&self) -> Option<&str> {
        self.metadata
            .get(META_FINALIZED_AT)
            .and_then(serde_json::Value::as_str)
    }

    /// links the payment, mirrors gateway outcome and stamps finalization
    /// time into the metadata
    pub fn finalize(&mut self, outcome: GatewayOutcome, payment_id: u64, now: DateTime<Utc>) {
        self.payment_id = Some(payment_id);
        self.status = CheckoutStatus::from(outcome);
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(m) = self.metadata.as_object_mut() {
            let stamp = serde_json::Value::String(now.to_rfc3339());
            let _old = m.insert(META_FINALIZED_AT.to_string(), stamp);
        }
    }
} // end of impl CheckoutModel
