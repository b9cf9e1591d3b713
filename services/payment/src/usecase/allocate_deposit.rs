use std::collections::{HashSet, VecDeque};
use std::result::Result;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::repository::{AbstractLedgerTx, AppRepoError};
use crate::model::money::{clamp_allocation, to_whole_units};
use crate::model::{BillingMonth, MonthLedgerModel, PaymentModel, StudentModel};

#[derive(Debug)]
pub enum AllocateDepositUcError {
    StudentNotExist(String),
    NonPositiveClassFee { student_id: String, class_fee: Decimal },
    NonPositiveDeposit { student_id: String, amount: Decimal },
    AmountOverflow(Decimal),
    DataStore(AppRepoError),
}

impl From<AppRepoError> for AllocateDepositUcError {
    fn from(value: AppRepoError) -> Self {
        Self::DataStore(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositAllocation {
    pub months_applied: u32,
    /// whole units left when no further month can be generated
    pub remaining_balance: i64,
    pub applied: Vec<(BillingMonth, i64)>,
}

// produces consecutive months after an anchor, bounded by configured limit
struct MonthGenerator {
    next: Option<BillingMonth>,
    num_generated: u16,
    limit: u16,
}

enum GenerateStop {
    LimitReached(u16),
    CalendarOverflow,
}

impl MonthGenerator {
    fn generate(&mut self) -> Result<BillingMonth, GenerateStop> {
        if self.num_generated >= self.limit {
            return Err(GenerateStop::LimitReached(self.limit));
        }
        let curr = self.next.ok_or(GenerateStop::CalendarOverflow)?;
        self.next = curr.next();
        self.num_generated += 1;
        Ok(curr)
    }
}

/// Distributes one lump payment over the billing months of a student, in
/// the order: requested months, existing unpaid months (ascending), then
/// months generated after the latest known one.
///
/// Runs inside the unit of work of its caller, every read and write goes
/// through the given ledger transaction.
pub struct DepositAllocator {
    pub logctx: Arc<AppLogContext>,
    pub max_generated_months: u16,
    pub now: DateTime<Utc>,
}

impl DepositAllocator {
    pub async fn allocate(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        payment: &PaymentModel,
        requested_months: &[BillingMonth],
    ) -> Result<DepositAllocation, AllocateDepositUcError> {
        let logctx_p = &self.logctx;
        let student_id = payment.student_id.as_str();
        let currency = payment.currency.as_str();
        let student = tx
            .fetch_student(student_id)
            .await?
            .ok_or(AllocateDepositUcError::StudentNotExist(student_id.to_string()))?;
        let class_fee = to_whole_units(student.class_fee, currency)
            .map_err(|_e| AllocateDepositUcError::AmountOverflow(student.class_fee))?;
        if class_fee <= 0 {
            app_log_event!(
                logctx_p,
                AppLogLevel::ERROR,
                "student:{student_id}, class-fee:{}, payment:{}",
                student.class_fee,
                payment.id
            );
            return Err(AllocateDepositUcError::NonPositiveClassFee {
                student_id: student_id.to_string(),
                class_fee: student.class_fee,
            });
        }
        let deposit = to_whole_units(payment.amount, currency)
            .map_err(|_e| AllocateDepositUcError::AmountOverflow(payment.amount))?;
        if deposit <= 0 {
            app_log_event!(
                logctx_p,
                AppLogLevel::ERROR,
                "student:{student_id}, deposit:{} {currency}, payment:{}",
                payment.amount,
                payment.id
            );
            return Err(AllocateDepositUcError::NonPositiveDeposit {
                student_id: student_id.to_string(),
                amount: payment.amount,
            });
        }

        let (mut queue, mut seen, mut generator) =
            self.build_queue(tx, &student, requested_months).await?;
        let mut remaining = deposit;
        let mut out = DepositAllocation {
            months_applied: 0,
            remaining_balance: 0,
            applied: Vec::new(),
        };
        while remaining > 0 {
            let month = match queue.pop_front() {
                Some(m) => m,
                None => match generator.generate() {
                    Ok(m) if seen.insert(m) => m,
                    Ok(_m) => continue,
                    Err(GenerateStop::LimitReached(limit)) => {
                        app_log_event!(
                            logctx_p,
                            AppLogLevel::WARNING,
                            "generation-cap, student:{student_id}, limit:{limit}, \
                             unapplied:{remaining}, payment:{}",
                            payment.id
                        );
                        break;
                    }
                    Err(GenerateStop::CalendarOverflow) => {
                        app_log_event!(
                            logctx_p,
                            AppLogLevel::WARNING,
                            "calendar-overflow, student:{student_id}, unapplied:{remaining}, \
                             payment:{}",
                            payment.id
                        );
                        break;
                    }
                },
            };
            let applied = self
                .apply_month(tx, payment, month, class_fee, remaining)
                .await?;
            if applied > 0 {
                remaining -= applied;
                out.months_applied += 1;
                out.applied.push((month, applied));
            }
        } // end of loop
        out.remaining_balance = remaining;
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "student:{student_id}, payment:{}, deposit:{deposit}, months-applied:{}, \
             remaining:{remaining}",
            payment.id,
            out.months_applied
        );
        Ok(out)
    } // end of fn allocate

    async fn build_queue(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        student: &StudentModel,
        requested_months: &[BillingMonth],
    ) -> Result<(VecDeque<BillingMonth>, HashSet<BillingMonth>, MonthGenerator), AppRepoError>
    {
        let unpaid = tx.fetch_unpaid_months(student.id.as_str()).await?;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let candidates = requested_months
            .iter()
            .copied()
            .chain(unpaid.iter().map(|m| m.month));
        for m in candidates {
            if seen.insert(m) {
                queue.push_back(m);
            }
        }
        let anchor = match requested_months.iter().max() {
            Some(m) => Some(*m),
            None => match unpaid.iter().map(|m| m.month).max() {
                Some(m) => Some(m),
                None => tx.latest_month(student.id.as_str()).await?,
            },
        };
        let first_generated = match anchor {
            Some(a) => a.next(),
            None => Some(match student.start_date.as_ref() {
                Some(d) => BillingMonth::from_date(d),
                None => BillingMonth::from_date(&self.now),
            }),
        };
        let generator = MonthGenerator {
            next: first_generated,
            num_generated: 0,
            limit: self.max_generated_months,
        };
        Ok((queue, seen, generator))
    }

    /// returns the amount actually applied to the month
    async fn apply_month(
        &self,
        tx: &mut dyn AbstractLedgerTx,
        payment: &PaymentModel,
        month: BillingMonth,
        class_fee: i64,
        remaining: i64,
    ) -> Result<i64, AppRepoError> {
        let logctx_p = &self.logctx;
        let student_id = payment.student_id.as_str();
        let existing = tx.fetch_month(student_id, month).await?;
        if existing.as_ref().is_some_and(|m| m.is_free) {
            app_log_event!(
                logctx_p,
                AppLogLevel::DEBUG,
                "skip-free, student:{student_id}, month:{month}"
            );
            return Ok(0);
        }
        let already_paid = existing.as_ref().map(|m| m.paid_amount).unwrap_or(0);
        if class_fee - already_paid <= 0 {
            app_log_event!(
                logctx_p,
                AppLogLevel::DEBUG,
                "skip-paid, student:{student_id}, month:{month}, paid:{already_paid}"
            );
            return Ok(0);
        }
        let allocation = clamp_allocation(already_paid, class_fee, remaining);
        if allocation < remaining {
            app_log_event!(
                logctx_p,
                AppLogLevel::DEBUG,
                "cap, student:{student_id}, month:{month}, proposed:{remaining}, \
                 applied:{allocation}"
            );
        }
        let mut row =
            existing.unwrap_or_else(|| MonthLedgerModel::new(student_id, month, self.now));
        row.apply_coverage(already_paid + allocation, class_fee, payment);
        tx.save_month(&row).await?;
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "allocate, student:{student_id}, month:{month}, amount:{allocation}, \
             paid:{}, status:{}, payment:{}",
            row.paid_amount,
            row.status.as_str(),
            payment.id
        );
        Ok(allocation)
    } // end of fn apply_month
} // end of impl DepositAllocator
