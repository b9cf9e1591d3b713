use chrono::{DateTime, Utc};

use super::GatewaySubscriptionModel;

/// local mirror of a recurring subscription at payment gateway
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionModel {
    pub id: u64, // assigned by ledger store on insert
    pub gateway_sub_id: String,
    pub student_id: String,
    pub package_id: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SubscriptionOwnerMismatch {
    pub gateway_sub_id: String,
    pub bound_student: String,
    pub claimed_student: String,
}

impl SubscriptionModel {
    pub fn new(
        gw: &GatewaySubscriptionModel,
        student_id: &str,
        package_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            gateway_sub_id: gw.id.clone(),
            student_id: student_id.to_string(),
            package_id: package_id.to_string(),
            status: gw.status.clone(),
            period_start: gw.current_period_start,
            period_end: gw.current_period_end,
            next_billing_date: Some(gw.current_period_end),
            update_time: now,
        }
    }

    /// student binding of a subscription never changes once created
    pub fn check_owner(&self, student_id: &str) -> Result<(), SubscriptionOwnerMismatch> {
        if self.student_id == student_id {
            Ok(())
        } else {
            Err(SubscriptionOwnerMismatch {
                gateway_sub_id: self.gateway_sub_id.clone(),
                bound_student: self.student_id.clone(),
                claimed_student: student_id.to_string(),
            })
        }
    }

    /// refresh status and billing dates, other fields are left intact
    pub fn refresh(&mut self, gw: &GatewaySubscriptionModel, package_id: &str, now: DateTime<Utc>) {
        self.status = gw.status.clone();
        self.period_start = gw.current_period_start;
        self.period_end = gw.current_period_end;
        self.next_billing_date = Some(gw.current_period_end);
        self.package_id = package_id.to_string();
        self.update_time = now;
    }
}
