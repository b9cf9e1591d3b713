use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::model::{GatewayOutcome, GatewayVerifyResult};

#[derive(Deserialize)]
pub(super) struct VerifyTransactionResp {
    pub status: String,
    pub data: Option<VerifyTransactionData>,
}

#[derive(Deserialize)]
pub(super) struct VerifyTransactionData {
    pub status: Option<String>,
    pub reference: Option<String>,
    pub tx_ref: Option<String>,
    pub currency: Option<String>,
    // either JSON number or string, depends on API version
    #[serde(default)]
    pub amount: serde_json::Value,
    #[serde(default)]
    pub charge: serde_json::Value,
}

fn decimal_from_json(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => Decimal::from_str(n.to_string().as_str())
            .or_else(|_e| Decimal::from_scientific(n.to_string().as_str()))
            .ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _others => None,
    }
}

impl VerifyTransactionData {
    pub(super) fn outcome(&self) -> GatewayOutcome {
        let label = self.status.as_deref().map(str::to_lowercase);
        match label.as_deref() {
            Some("success") => GatewayOutcome::Success,
            Some("failed") | Some("cancelled") => GatewayOutcome::Failed,
            _others => GatewayOutcome::Pending,
        }
    }
}

impl VerifyTransactionResp {
    pub(super) fn into_verify_result(self, raw: serde_json::Value) -> GatewayVerifyResult {
        let mut out = match self.data {
            Some(d) => {
                let mut r = GatewayVerifyResult::new(d.outcome());
                r.provider_reference = d.reference.clone().or(d.tx_ref.clone());
                r.provider_status = d.status.clone();
                r.provider_fee = decimal_from_json(&d.charge);
                r.amount = decimal_from_json(&d.amount);
                r.currency = d.currency.as_ref().map(|c| c.to_uppercase());
                r
            }
            None => {
                let mut r = GatewayVerifyResult::new(GatewayOutcome::Pending);
                r.provider_status = Some(self.status.clone());
                r
            }
        };
        out.raw = raw;
        out
    }
}
