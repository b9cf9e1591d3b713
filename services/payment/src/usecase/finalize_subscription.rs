use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::Decimal;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::processor::{AbstractPaymentProcessor, AppProcessorError};
use crate::adapter::repository::{
    AbstractLedgerRepo, AbstractLedgerTx, AppRepoError, PaymentLookup,
};
use crate::model::money::{split_with_remainder, to_whole_units};
use crate::model::{
    BillingMonth, GatewaySubscriptionModel, MonthLedgerModel, PackageModel, PayIntent, PaySource,
    PayStatus, PaymentModel, SubscriptionChangeKind, SubscriptionModel, SubscriptionOwnerMismatch,
};

// payments created by the plan-change path carry one of these prefixes in
// reason or transaction id
const PLAN_CHANGE_PATTERN: &str = r"(?i)^(upgrade|downgrade)";
const PLAN_CHANGE_WINDOW_MINS: i64 = 10;
const BILLING_REASON_PLAN_CHANGE: &str = "subscription_update";

#[derive(Debug)]
pub enum FinalizeSubscriptionUcError {
    MissingMetadata {
        gateway_sub_id: String,
        label: &'static str,
    },
    StudentNotExist(String),
    PackageNotExist(String),
    OwnerMismatch(SubscriptionOwnerMismatch),
    ZeroMonthsGenerated {
        gateway_sub_id: String,
        package_id: String,
    },
    MonthsNotLinked {
        gateway_sub_id: String,
        payment_id: u64,
    },
    AmountOverflow(Decimal),
    ExternalProcessor(AppProcessorError),
    DataStore(AppRepoError),
}

impl From<AppRepoError> for FinalizeSubscriptionUcError {
    fn from(value: AppRepoError) -> Self {
        Self::DataStore(value)
    }
}
impl From<AppProcessorError> for FinalizeSubscriptionUcError {
    fn from(value: AppProcessorError) -> Self {
        Self::ExternalProcessor(value)
    }
}
impl From<SubscriptionOwnerMismatch> for FinalizeSubscriptionUcError {
    fn from(value: SubscriptionOwnerMismatch) -> Self {
        Self::OwnerMismatch(value)
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionFinalizeReq {
    pub is_initial_payment: bool,
    pub session_id: Option<String>,
    pub invoice_id: Option<String>,
    pub invoice_amount: Option<Decimal>,
    pub idempotency_key: Option<String>,
    /// reason of the paid invoice, e.g. `subscription_cycle`
    pub billing_reason: Option<String>,
}

impl SubscriptionFinalizeReq {
    fn correlation_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or(self.invoice_id.as_deref())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug)]
pub struct SubscriptionFinalizeResult {
    pub subscription_id: u64,
    pub gateway_sub_id: String,
    pub status: String,
    pub already_processed: bool,
    pub payment_id: Option<u64>,
    pub months: Vec<BillingMonth>,
    /// false if linked months could not be found again after commit
    pub months_verified: bool,
}

// everything loaded before the unit of work starts
struct SubscriptionContext {
    gw: GatewaySubscriptionModel,
    student_id: String,
    package: PackageModel,
    change: SubscriptionChangeKind,
    charged: Decimal,
    months: Vec<BillingMonth>,
}

struct TxOutcome {
    subscription: SubscriptionModel,
    payment: PaymentModel,
    months_written: Vec<BillingMonth>,
    already_processed: bool,
}

/// Records one paid period of a Stripe subscription: mirrors the gateway
/// subscription locally, records the payment, then marks every billing
/// month of the period paid.
///
/// Safe to run many times for the same gateway event, a replay is detected
/// through the idempotency key and answered with the saved state.
pub struct FinalizeSubscriptionUseCase {
    pub repo: Arc<Box<dyn AbstractLedgerRepo>>,
    pub processors: Arc<Box<dyn AbstractPaymentProcessor>>,
    pub logctx: Arc<AppLogContext>,
}

impl FinalizeSubscriptionUseCase {
    pub async fn execute(
        &self,
        gateway_sub_id: &str,
        req: SubscriptionFinalizeReq,
    ) -> Result<SubscriptionFinalizeResult, FinalizeSubscriptionUcError> {
        let logctx_p = &self.logctx;
        let now = Utc::now();
        let idem_key = match req.idempotency_key.as_ref() {
            Some(k) if !k.is_empty() => k.clone(),
            _others => {
                let suffix = req
                    .correlation_id()
                    .map(ToString::to_string)
                    .unwrap_or(now.timestamp_millis().to_string());
                format!("finalize_{gateway_sub_id}_{suffix}")
            }
        };
        if let Some(out) = self
            .find_processed(gateway_sub_id, idem_key.as_str(), req.correlation_id())
            .await?
        {
            app_log_event!(
                logctx_p,
                AppLogLevel::INFO,
                "already-processed, sub:{gateway_sub_id}, key:{idem_key}"
            );
            return Ok(out);
        }

        let ctx = self.load_context(gateway_sub_id, &req).await?;
        let mut tx = self.repo.begin().await?;
        let result = self
            .run(tx.as_mut(), &ctx, &req, idem_key.as_str(), now)
            .await;
        let txout = match result {
            Ok(v) => {
                tx.commit().await?;
                v
            }
            Err(e) => {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::ERROR,
                    "sub:{gateway_sub_id}, student:{}, package:{}, {:?}",
                    ctx.student_id.as_str(),
                    ctx.package.id.as_str(),
                    &e
                );
                if let Err(e2) = tx.rollback().await {
                    app_log_event!(logctx_p, AppLogLevel::ERROR, "rollback-fail, {:?}", e2);
                }
                return Err(e);
            }
        };

        let months_verified = if txout.months_written.is_empty() {
            true
        } else {
            self.recheck_linked_months(&txout).await
        };
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "sub:{gateway_sub_id}, student:{}, change:{:?}, initial:{}, payment:{}, \
             charged:{}, months-written:{}",
            ctx.student_id.as_str(),
            ctx.change,
            req.is_initial_payment,
            txout.payment.id,
            ctx.charged,
            txout.months_written.len()
        );
        Ok(SubscriptionFinalizeResult {
            subscription_id: txout.subscription.id,
            gateway_sub_id: txout.subscription.gateway_sub_id,
            status: txout.subscription.status,
            already_processed: txout.already_processed,
            payment_id: Some(txout.payment.id),
            months: txout.months_written,
            months_verified,
        })
    } // end of fn execute

    async fn find_processed(
        &self,
        gateway_sub_id: &str,
        idem_key: &str,
        correlation_id: Option<&str>,
    ) -> Result<Option<SubscriptionFinalizeResult>, FinalizeSubscriptionUcError> {
        let mut found = self
            .repo
            .find_payment(PaymentLookup::IdempotencyKey(idem_key))
            .await?;
        if found.is_none() {
            if let Some(cid) = correlation_id {
                found = self
                    .repo
                    .find_payment(PaymentLookup::SubscriptionLinked(cid))
                    .await?;
            }
        }
        let Some(payment) = found else {
            return Ok(None);
        };
        let saved = self.repo.fetch_subscription(gateway_sub_id).await?;
        let (subscription_id, status) = match saved {
            Some(s) => (s.id, s.status),
            None => (
                payment.subscription_id.unwrap_or(0),
                payment
                    .provider_status
                    .clone()
                    .unwrap_or("unknown".to_string()),
            ),
        };
        Ok(Some(SubscriptionFinalizeResult {
            subscription_id,
            gateway_sub_id: gateway_sub_id.to_string(),
            status,
            already_processed: true,
            payment_id: Some(payment.id),
            months: Vec::new(),
            months_verified: true,
        }))
    } // end of fn find_processed

    async fn load_context(
        &self,
        gateway_sub_id: &str,
        req: &SubscriptionFinalizeReq,
    ) -> Result<SubscriptionContext, FinalizeSubscriptionUcError> {
        let logctx_p = &self.logctx;
        let gw = self.processors.retrieve_subscription(gateway_sub_id).await?;
        let missing = |label: &'static str| FinalizeSubscriptionUcError::MissingMetadata {
            gateway_sub_id: gateway_sub_id.to_string(),
            label,
        };
        let student_id = gw.student_id().ok_or(missing("studentId"))?.to_string();
        let package_id = gw.package_id().ok_or(missing("packageId"))?.to_string();

        if let Some(saved) = self.repo.fetch_subscription(gateway_sub_id).await? {
            saved.check_owner(student_id.as_str()).map_err(|e| {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::ERROR,
                    "cross-tenant, sub:{gateway_sub_id}, bound:{}, claimed:{}",
                    e.bound_student.as_str(),
                    e.claimed_student.as_str()
                );
                e
            })?;
        }
        let package = self
            .repo
            .fetch_package(package_id.as_str())
            .await?
            .ok_or(FinalizeSubscriptionUcError::PackageNotExist(package_id))?;
        let _student = self
            .repo
            .fetch_student(student_id.as_str())
            .await?
            .ok_or(FinalizeSubscriptionUcError::StudentNotExist(student_id.clone()))?;

        let charged = match req.invoice_amount {
            Some(v) => v,
            None => match self.processors.latest_invoice_amount(gateway_sub_id).await? {
                Some(v) => v,
                None => package.price,
            },
        };
        let start = BillingMonth::from_date(&gw.current_period_start);
        let months = start.consecutive(package.duration_months as usize);
        let change = if req.is_initial_payment {
            SubscriptionChangeKind::Standard
        } else {
            match req.billing_reason.as_deref() {
                Some(BILLING_REASON_PLAN_CHANGE) => gw.change_kind(),
                Some(_others) => SubscriptionChangeKind::Standard,
                // no invoice at hand, only a plan change within the paid
                // period counts
                None => gw.change_kind_since(gw.current_period_start),
            }
        };
        Ok(SubscriptionContext {
            gw,
            student_id,
            package,
            change,
            charged,
            months,
        })
    } // end of fn load_context

    async fn run(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        ctx: &SubscriptionContext,
        req: &SubscriptionFinalizeReq,
        idem_key: &str,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome, FinalizeSubscriptionUcError> {
        let logctx_p = &self.logctx;
        let gateway_sub_id = ctx.gw.id.as_str();
        let student_id = ctx.student_id.as_str();
        let package_id = ctx.package.id.as_str();

        let subscription = match tx.fetch_subscription(gateway_sub_id).await? {
            Some(mut saved) => {
                saved.check_owner(student_id)?;
                saved.refresh(&ctx.gw, package_id, now);
                saved
            }
            None => SubscriptionModel::new(&ctx.gw, student_id, package_id, now),
        };
        let subscription = tx.save_subscription(subscription).await?;

        // concurrent delivery of the same event may have committed meanwhile
        let mut replayed = tx.find_payment(PaymentLookup::IdempotencyKey(idem_key)).await?;
        if replayed.is_none() {
            if let Some(cid) = req.correlation_id() {
                replayed = tx.find_payment(PaymentLookup::SubscriptionLinked(cid)).await?;
            }
        }
        if let Some(payment) = replayed {
            return Ok(TxOutcome {
                subscription,
                payment,
                months_written: Vec::new(),
                already_processed: true,
            });
        }

        let plan_change = matches!(
            ctx.change,
            SubscriptionChangeKind::Upgrade | SubscriptionChangeKind::Downgrade
        );
        let reused = if plan_change {
            self.find_plan_change_payment(tx, student_id, now).await?
        } else {
            None
        };
        let payment = match reused {
            Some(mut p) => {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::INFO,
                    "reuse-plan-change-payment, sub:{gateway_sub_id}, payment:{}, amount:{}",
                    p.id,
                    p.amount
                );
                // the reused payment has to be found again when the same
                // invoice is delivered after the reuse window
                let mut changed = false;
                if p.subscription_id.is_none() {
                    p.subscription_id = Some(subscription.id);
                    changed = true;
                }
                if p.idempotency_key.is_none() {
                    p.idempotency_key = Some(idem_key.to_string());
                    changed = true;
                }
                if let Some(cid) = req.correlation_id() {
                    if p.provider_reference.as_deref() != Some(cid) {
                        p.provider_reference = Some(cid.to_string());
                        changed = true;
                    }
                }
                if changed {
                    tx.update_payment(&p).await?;
                }
                p
            }
            None => {
                let newpay = self.new_payment(ctx, req, idem_key, subscription.id, now);
                tx.insert_payment(newpay).await?
            }
        };

        if ctx.months.is_empty() {
            return Err(FinalizeSubscriptionUcError::ZeroMonthsGenerated {
                gateway_sub_id: gateway_sub_id.to_string(),
                package_id: package_id.to_string(),
            });
        }
        let total = if plan_change {
            ctx.package.price
        } else {
            ctx.charged
        };
        let currency = ctx.package.currency.as_str();
        let total_units = to_whole_units(total, currency)
            .map_err(|_e| FinalizeSubscriptionUcError::AmountOverflow(total))?;
        let shares = split_with_remainder(total_units, ctx.months.len());

        let mut months_written = Vec::new();
        for (month, share) in ctx.months.iter().zip(shares) {
            let existing = tx.fetch_month(student_id, *month).await?;
            let skip = match (ctx.change, existing.as_ref()) {
                (SubscriptionChangeKind::Downgrade, Some(_)) => true,
                (SubscriptionChangeKind::Upgrade, Some(row)) => row.paid_amount == share,
                _others => false,
            };
            if skip {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::DEBUG,
                    "keep-month, student:{student_id}, month:{month}, change:{:?}",
                    ctx.change
                );
                continue;
            }
            let mut row =
                existing.unwrap_or_else(|| MonthLedgerModel::new(student_id, *month, now));
            row.mark_paid(share, &payment);
            tx.save_month(&row).await?;
            months_written.push(*month);
        }
        if !months_written.is_empty() {
            let linked = tx.fetch_months_by_payment(payment.id).await?;
            if linked.is_empty() {
                return Err(FinalizeSubscriptionUcError::MonthsNotLinked {
                    gateway_sub_id: gateway_sub_id.to_string(),
                    payment_id: payment.id,
                });
            }
        }
        Ok(TxOutcome {
            subscription,
            payment,
            months_written,
            already_processed: false,
        })
    } // end of fn run

    async fn find_plan_change_payment(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        student_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentModel>, FinalizeSubscriptionUcError> {
        let logctx_p = &self.logctx;
        let pattern = match Regex::new(PLAN_CHANGE_PATTERN) {
            Ok(v) => v,
            Err(e) => {
                app_log_event!(logctx_p, AppLogLevel::ERROR, "regex:{:?}", e);
                return Ok(None);
            }
        };
        let since = now - Duration::minutes(PLAN_CHANGE_WINDOW_MINS);
        let recent = tx.fetch_recent_payments(student_id, since).await?;
        let found = recent.into_iter().find(|p| {
            matches!(p.intent, PayIntent::Subscription)
                && (p.reason.as_deref().is_some_and(|r| pattern.is_match(r))
                    || pattern.is_match(p.transaction_id.as_str()))
        });
        Ok(found)
    }

    fn new_payment(
        &self,
        ctx: &SubscriptionContext,
        req: &SubscriptionFinalizeReq,
        idem_key: &str,
        subscription_id: u64,
        now: DateTime<Utc>,
    ) -> PaymentModel {
        let reason = if req.is_initial_payment {
            "subscription initial payment"
        } else {
            "subscription renewal"
        };
        let provider_reference = req
            .invoice_id
            .clone()
            .or(ctx.gw.latest_invoice.clone());
        PaymentModel {
            id: 0,
            student_id: ctx.student_id.clone(),
            amount: ctx.charged,
            currency: ctx.package.currency.clone(),
            status: PayStatus::Approved,
            source: PaySource::Stripe,
            intent: PayIntent::Subscription,
            transaction_id: req
                .correlation_id()
                .unwrap_or(idem_key)
                .to_string(),
            idempotency_key: Some(idem_key.to_string()),
            reason: Some(reason.to_string()),
            provider_reference,
            provider_status: Some(ctx.gw.status.clone()),
            provider_fee: None,
            provider_payload: ctx.gw.raw.clone(),
            subscription_id: Some(subscription_id),
            create_time: now,
        }
    }

    async fn recheck_linked_months(&self, txout: &TxOutcome) -> bool {
        let logctx_p = &self.logctx;
        match self.repo.fetch_months_by_payment(txout.payment.id).await {
            Ok(linked) if !linked.is_empty() => true,
            Ok(_empty) => {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::ERROR,
                    "inconsistent, sub:{}, payment:{}, no month linked after commit",
                    txout.subscription.gateway_sub_id.as_str(),
                    txout.payment.id
                );
                false
            }
            Err(e) => {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::ERROR,
                    "recheck-fail, payment:{}, {:?}",
                    txout.payment.id,
                    e
                );
                false
            }
        }
    }
} // end of impl FinalizeSubscriptionUseCase
