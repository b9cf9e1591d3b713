use std::boxed::Box;
use std::collections::HashSet;
use std::result::Result;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::repository::{
    AbstractLedgerRepo, AbstractLedgerTx, AppRepoError, PaymentLookup,
};
use crate::model::money::{split_with_remainder, to_whole_units};
use crate::model::{
    BillingMonth, CheckoutModel, GatewayOutcome, GatewayVerifyResult, MonthLedgerModel,
    PayIntent, PayStatus, PaymentModel,
};

use super::allocate_deposit::{AllocateDepositUcError, DepositAllocation, DepositAllocator};

#[derive(Debug)]
pub enum FinalizePaymentUcError {
    CheckoutNotExist(String),
    PaymentNotExist(u64),
    StudentNotExist(String),
    AmountOverflow(Decimal),
    Allocation(AllocateDepositUcError),
    DataStore(AppRepoError),
}

impl From<AppRepoError> for FinalizePaymentUcError {
    fn from(value: AppRepoError) -> Self {
        Self::DataStore(value)
    }
}
impl From<AllocateDepositUcError> for FinalizePaymentUcError {
    fn from(value: AllocateDepositUcError) -> Self {
        match value {
            AllocateDepositUcError::DataStore(e) => Self::DataStore(e),
            others => Self::Allocation(others),
        }
    }
}

#[derive(Debug)]
pub struct FinalizedCheckout {
    pub checkout: CheckoutModel,
    pub payment: Option<PaymentModel>,
    /// true if nothing was written because a previous run completed it
    pub already_processed: bool,
    pub allocation: Option<DepositAllocation>,
    pub months_written: Vec<BillingMonth>,
}

impl FinalizedCheckout {
    fn unchanged(checkout: CheckoutModel, payment: Option<PaymentModel>) -> Self {
        Self {
            checkout,
            payment,
            already_processed: true,
            allocation: None,
            months_written: Vec::new(),
        }
    }
}

/// Applies a gateway-verified outcome to the local ledger, in one unit of
/// work: records the payment, links it to the checkout, then applies the
/// money to billing months according to the checkout intent.
///
/// Repeated runs with the same checkout never create a second payment or
/// move any amount twice.
pub struct FinalizePaymentUseCase {
    pub repo: Arc<Box<dyn AbstractLedgerRepo>>,
    pub logctx: Arc<AppLogContext>,
    pub max_generated_months: u16,
}

impl FinalizePaymentUseCase {
    pub async fn execute(
        &self,
        tx_ref: &str,
        result: GatewayVerifyResult,
    ) -> Result<FinalizedCheckout, FinalizePaymentUcError> {
        let logctx_p = &self.logctx;
        let mut tx = self.repo.begin().await?;
        let now = Utc::now();
        match self.run(tx.as_mut(), tx_ref, result, now).await {
            Ok(v) => {
                tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                app_log_event!(logctx_p, AppLogLevel::WARNING, "tx_ref:{tx_ref}, {:?}", &e);
                if let Err(e2) = tx.rollback().await {
                    app_log_event!(logctx_p, AppLogLevel::ERROR, "rollback-fail, {:?}", e2);
                }
                Err(e)
            }
        }
    } // end of fn execute

    async fn run(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        tx_ref: &str,
        result: GatewayVerifyResult,
        now: DateTime<Utc>,
    ) -> Result<FinalizedCheckout, FinalizePaymentUcError> {
        let logctx_p = &self.logctx;
        let mut checkout = tx
            .fetch_checkout(tx_ref)
            .await?
            .ok_or(FinalizePaymentUcError::CheckoutNotExist(tx_ref.to_string()))?;

        // a completed checkout never goes back, whatever the later outcome
        let outcome = if checkout.is_completed() {
            GatewayOutcome::Success
        } else {
            result.outcome
        };
        if checkout.already_finalized() {
            let payment = match checkout.payment_id {
                Some(pid) => tx.fetch_payment(pid).await?,
                None => None,
            };
            let need_heal = match (checkout.intent, payment.as_ref()) {
                (PayIntent::Deposit, Some(p)) => tx.fetch_months_by_payment(p.id).await?.is_empty(),
                _others => false,
            };
            if !need_heal {
                return Ok(FinalizedCheckout::unchanged(checkout, payment));
            }
            app_log_event!(
                logctx_p,
                AppLogLevel::WARNING,
                "self-heal, tx_ref:{tx_ref}, payment:{:?}, no month linked",
                checkout.payment_id
            );
        }

        let payment = self
            .resolve_payment(tx, &checkout, outcome, &result, now)
            .await?;
        checkout.finalize(outcome, payment.id, now);
        tx.update_checkout(&checkout).await?;

        let mut out = FinalizedCheckout {
            checkout,
            payment: None,
            already_processed: false,
            allocation: None,
            months_written: Vec::new(),
        };
        if matches!(outcome, GatewayOutcome::Success) {
            match out.checkout.intent {
                PayIntent::Deposit => {
                    let allocator = DepositAllocator {
                        logctx: self.logctx.clone(),
                        max_generated_months: self.max_generated_months,
                        now,
                    };
                    let alloc = allocator
                        .allocate(tx, &payment, out.checkout.months.as_slice())
                        .await?;
                    out.months_written = alloc.applied.iter().map(|(m, _)| *m).collect();
                    out.allocation = Some(alloc);
                }
                PayIntent::Tuition if !out.checkout.months.is_empty() => {
                    out.months_written = self.apply_tuition(tx, &out.checkout, &payment, now).await?;
                }
                PayIntent::Tuition => {
                    app_log_event!(
                        logctx_p,
                        AppLogLevel::WARNING,
                        "tx_ref:{tx_ref}, tuition without month, payment:{}",
                        payment.id
                    );
                }
                // billing months of a subscription follow the gateway
                // subscription, not the checkout
                PayIntent::Subscription => {}
            }
        }
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "tx_ref:{tx_ref}, outcome:{:?}, payment:{}, months:{}",
            outcome,
            payment.id,
            out.months_written.len()
        );
        out.payment = Some(payment);
        Ok(out)
    } // end of fn run

    async fn resolve_payment(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        checkout: &CheckoutModel,
        outcome: GatewayOutcome,
        result: &GatewayVerifyResult,
        now: DateTime<Utc>,
    ) -> Result<PaymentModel, FinalizePaymentUcError> {
        let logctx_p = &self.logctx;
        let tx_ref = checkout.tx_ref.as_str();
        let existing = match checkout.payment_id {
            Some(pid) => Some(
                tx.fetch_payment(pid)
                    .await?
                    .ok_or(FinalizePaymentUcError::PaymentNotExist(pid))?,
            ),
            None => tx.find_payment(PaymentLookup::TransactionId(tx_ref)).await?,
        };
        if let Some(mut saved) = existing {
            let definitive = !matches!(outcome, GatewayOutcome::Pending);
            if definitive && saved.status != PayStatus::from(outcome) {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::INFO,
                    "tx_ref:{tx_ref}, payment:{}, status:{} -> {:?}",
                    saved.id,
                    saved.status.as_str(),
                    outcome
                );
                let mut corrected = result.clone();
                corrected.outcome = outcome;
                saved.update_from_gateway(&corrected);
                tx.update_payment(&saved).await?;
            }
            return Ok(saved);
        }
        let mut newpay = PaymentModel {
            id: 0,
            student_id: checkout.student_id.clone(),
            amount: checkout.amount,
            currency: checkout.currency.clone(),
            status: PayStatus::Pending,
            source: checkout.source,
            intent: checkout.intent,
            transaction_id: tx_ref.to_string(),
            idempotency_key: None,
            reason: None,
            provider_reference: None,
            provider_status: None,
            provider_fee: None,
            provider_payload: serde_json::Value::Null,
            subscription_id: None,
            create_time: now,
        };
        let mut corrected = result.clone();
        corrected.outcome = outcome;
        newpay.update_from_gateway(&corrected);
        if let (Some(a), Some(c)) = (result.amount, result.currency.as_ref()) {
            let mismatch = a != checkout.amount || !c.eq_ignore_ascii_case(checkout.currency.as_str());
            if mismatch {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::WARNING,
                    "tx_ref:{tx_ref}, amount-mismatch, checkout:{} {}, gateway:{a} {c}",
                    checkout.amount,
                    checkout.currency.as_str()
                );
            }
        }
        let saved = tx.insert_payment(newpay).await?;
        Ok(saved)
    } // end of fn resolve_payment

    async fn apply_tuition(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        checkout: &CheckoutModel,
        payment: &PaymentModel,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillingMonth>, FinalizePaymentUcError> {
        let logctx_p = &self.logctx;
        let student_id = checkout.student_id.as_str();
        let student = tx
            .fetch_student(student_id)
            .await?
            .ok_or(FinalizePaymentUcError::StudentNotExist(student_id.to_string()))?;
        let currency = checkout.currency.as_str();
        let class_fee = to_whole_units(student.class_fee, currency)
            .map_err(|_e| FinalizePaymentUcError::AmountOverflow(student.class_fee))?;
        let total = to_whole_units(checkout.amount, currency)
            .map_err(|_e| FinalizePaymentUcError::AmountOverflow(checkout.amount))?;

        let mut seen = HashSet::new();
        let months = checkout
            .months
            .iter()
            .copied()
            .filter(|m| seen.insert(*m))
            .collect::<Vec<_>>();
        let shares = split_with_remainder(total, months.len());
        for (month, share) in months.iter().zip(shares) {
            let amount = if class_fee > 0 && share > class_fee {
                app_log_event!(
                    logctx_p,
                    AppLogLevel::WARNING,
                    "tuition-capped, student:{student_id}, month:{month}, share:{share}, \
                     cap:{class_fee}, payment:{}",
                    payment.id
                );
                class_fee
            } else {
                share
            };
            let mut row = tx
                .fetch_month(student_id, *month)
                .await?
                .unwrap_or_else(|| MonthLedgerModel::new(student_id, *month, now));
            row.mark_paid(amount, payment);
            tx.save_month(&row).await?;
            app_log_event!(
                logctx_p,
                AppLogLevel::DEBUG,
                "tuition, student:{student_id}, month:{month}, amount:{amount}, payment:{}",
                payment.id
            );
        }
        Ok(months)
    } // end of fn apply_tuition
} // end of impl FinalizePaymentUseCase
