use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    meta_label, money, GatewayOutcome, GatewaySubscriptionModel, GatewayVerifyResult,
};

// only the fields read by this service are declared, see Stripe API reference
// for complete object structure

#[derive(Deserialize)]
pub(super) struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(super) enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    fn id(&self) -> &str {
        match self {
            Self::Id(v) | Self::Object { id: v } => v.as_str(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct CheckoutSession {
    pub id: String,
    pub client_reference_id: Option<String>,
    pub status: Option<String>, // open, complete, expired
    pub payment_status: String, // paid, unpaid, no_payment_required
    pub payment_intent: Option<ExpandableId>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub(super) fn correlates(&self, tx_ref: &str) -> bool {
        self.client_reference_id.as_deref() == Some(tx_ref)
            || self.metadata.get(meta_label::TX_REF).map(String::as_str) == Some(tx_ref)
    }

    pub(super) fn outcome(&self) -> GatewayOutcome {
        let paid = matches!(
            self.payment_status.as_str(),
            "paid" | "no_payment_required"
        );
        match self.status.as_deref() {
            Some("complete") if paid => GatewayOutcome::Success,
            Some("expired") => GatewayOutcome::Failed,
            _others => GatewayOutcome::Pending,
        }
    }

    pub(super) fn into_verify_result(self, raw: serde_json::Value) -> GatewayVerifyResult {
        let mut out = GatewayVerifyResult::new(self.outcome());
        out.provider_reference = Some(
            self.payment_intent
                .as_ref()
                .map(|p| p.id().to_string())
                .unwrap_or(self.id.clone()),
        );
        out.provider_status = Some(self.payment_status.clone());
        out.currency = self.currency.as_ref().map(|c| c.to_uppercase());
        out.amount = match (self.amount_total, out.currency.as_deref()) {
            (Some(a), Some(c)) => Some(money::from_gateway_minor(a, c)),
            _others => None,
        };
        out.raw = raw;
        out
    }
} // end of impl CheckoutSession

#[derive(Serialize)]
pub(super) struct ListCheckoutSessionsQuery {
    pub limit: u16,
}

#[derive(Serialize)]
pub(super) struct ListInvoicesQuery<'a> {
    pub subscription: &'a str,
    pub status: &'static str,
    pub limit: u16,
}

#[derive(Deserialize)]
pub(super) struct SubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Deserialize)]
pub(super) struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub latest_invoice: Option<ExpandableId>,
    pub items: Option<StripeList<SubscriptionItem>>,
}

fn epoch_to_time(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

impl Subscription {
    /// newer API versions moved billing period bounds from the subscription
    /// to its items
    fn period(&self) -> Option<(i64, i64)> {
        let top = self.current_period_start.zip(self.current_period_end);
        top.or_else(|| {
            self.items
                .as_ref()
                .and_then(|lst| lst.data.first())
                .and_then(|i| i.current_period_start.zip(i.current_period_end))
        })
    }

    pub(super) fn into_model(
        self,
        raw: serde_json::Value,
    ) -> Result<GatewaySubscriptionModel, String> {
        let (start, end) = self
            .period()
            .ok_or_else(|| format!("billing-period-missing, sub:{}", self.id))?;
        let (current_period_start, current_period_end) = epoch_to_time(start)
            .zip(epoch_to_time(end))
            .ok_or_else(|| format!("billing-period-invalid, {start}, {end}"))?;
        Ok(GatewaySubscriptionModel {
            latest_invoice: self.latest_invoice.as_ref().map(|v| v.id().to_string()),
            id: self.id,
            status: self.status,
            metadata: self.metadata,
            current_period_start,
            current_period_end,
            raw,
        })
    }
} // end of impl Subscription

#[derive(Deserialize)]
pub(super) struct Invoice {
    pub id: String,
    pub amount_paid: i64,
    pub currency: String,
}
