use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    Failed,
    Pending,
}

/// Provider-agnostic result of querying a gateway for the status of one
/// transaction. Only the fields read by finalization are extracted, the
/// rest of gateway response is kept in `raw` as-is.
#[derive(Debug, Clone)]
pub struct GatewayVerifyResult {
    pub outcome: GatewayOutcome,
    pub provider_reference: Option<String>,
    pub provider_status: Option<String>,
    pub provider_fee: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub raw: serde_json::Value,
}

impl GatewayVerifyResult {
    pub fn new(outcome: GatewayOutcome) -> Self {
        Self {
            outcome,
            provider_reference: None,
            provider_status: None,
            provider_fee: None,
            amount: None,
            currency: None,
            raw: serde_json::Value::Null,
        }
    }
}

/// recurring subscription object retrieved from gateway
#[derive(Debug, Clone)]
pub struct GatewaySubscriptionModel {
    pub id: String,
    pub status: String,
    pub metadata: HashMap<String, String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub latest_invoice: Option<String>,
    pub raw: serde_json::Value,
}

pub(crate) mod meta_label {
    pub const STUDENT_ID: &str = "studentId";
    pub const PACKAGE_ID: &str = "packageId";
    pub const UPGRADED_AT: &str = "upgradedAt";
    pub const DOWNGRADED_AT: &str = "downgradedAt";
    pub const TX_REF: &str = "txRef";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChangeKind {
    Standard, // initial payment or renewal
    Upgrade,
    Downgrade,
}

fn parse_meta_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.trim().parse::<i64>() {
        // gateway metadata may hold either seconds or milliseconds since epoch
        let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
        DateTime::from_timestamp(secs, 0)
    } else {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|t| t.to_utc())
    }
}

impl GatewaySubscriptionModel {
    pub fn student_id(&self) -> Option<&str> {
        self.metadata
            .get(meta_label::STUDENT_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
    pub fn package_id(&self) -> Option<&str> {
        self.metadata
            .get(meta_label::PACKAGE_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// plan change is recorded by the upgrade / downgrade path as timestamps
    /// in the subscription metadata, the most recent one wins
    pub fn change_kind(&self) -> SubscriptionChangeKind {
        self.latest_change()
            .map(|(kind, _t)| kind)
            .unwrap_or(SubscriptionChangeKind::Standard)
    }

    /// same as `change_kind()`, a plan change recorded before `since` is
    /// treated as history
    pub fn change_kind_since(&self, since: DateTime<Utc>) -> SubscriptionChangeKind {
        match self.latest_change() {
            Some((kind, t)) if t >= since => kind,
            _others => SubscriptionChangeKind::Standard,
        }
    }

    fn latest_change(&self) -> Option<(SubscriptionChangeKind, DateTime<Utc>)> {
        let upgraded = self
            .metadata
            .get(meta_label::UPGRADED_AT)
            .and_then(|v| parse_meta_time(v));
        let downgraded = self
            .metadata
            .get(meta_label::DOWNGRADED_AT)
            .and_then(|v| parse_meta_time(v));
        match (upgraded, downgraded) {
            (Some(u), Some(d)) if d > u => Some((SubscriptionChangeKind::Downgrade, d)),
            (Some(u), _) => Some((SubscriptionChangeKind::Upgrade, u)),
            (None, Some(d)) => Some((SubscriptionChangeKind::Downgrade, d)),
            (None, None) => None,
        }
    }
}
