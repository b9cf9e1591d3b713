use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use school_common::error::AppErrorCode;
use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::datastore::{AppDStoreInMem, AppDataStoreContext, AppInMemTx, InMemRow};
use crate::model::{
    BillingMonth, CheckoutModel, CheckoutStatus, MonthLedgerModel, PackageModel, PaymentModel,
    StudentModel, SubscriptionModel,
};

use super::{
    AbstractLedgerRepo, AbstractLedgerTx, AppRepoError, AppRepoErrorDetail, AppRepoErrorFnLabel,
    PaymentLookup,
};

mod table {
    pub(super) const CHECKOUT: &str = "checkout";
    pub(super) const PAYMENT: &str = "payment";
    pub(super) const MONTH: &str = "ledger_month";
    pub(super) const SUBSCRIPTION: &str = "subscription";
    pub(super) const STUDENT: &str = "student";
    pub(super) const PACKAGE: &str = "package";
}

// every column is a serialised JSON value, the primary key of each row is
// kept as key of the table

enum CheckoutColIdx {
    StudentId,
    Intent,
    Months,
    Amount,
    Currency,
    Source,
    Status,
    PaymentId,
    Metadata,
    CreateTime,
    TotNumColumns,
}

enum PaymentColIdx {
    StudentId,
    Amount,
    Currency,
    Status,
    Source,
    Intent,
    TransactionId,
    IdempotencyKey,
    Reason,
    ProviderRef,
    ProviderStatus,
    ProviderFee,
    ProviderPayload,
    SubscriptionId,
    CreateTime,
    TotNumColumns,
}

enum MonthColIdx {
    StudentId,
    Month,
    PaidAmount,
    Status,
    PayType,
    StartDate,
    EndDate,
    IsFree,
    Provenance,
    PaymentId,
    TotNumColumns,
}

enum SubscriptionColIdx {
    Id,
    StudentId,
    PackageId,
    Status,
    PeriodStart,
    PeriodEnd,
    NextBilling,
    UpdateTime,
    TotNumColumns,
}

enum StudentColIdx {
    ClassFee,
    StartDate,
    TotNumColumns,
}

enum PackageColIdx {
    Duration,
    Price,
    Currency,
    TotNumColumns,
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, AppRepoErrorDetail> {
    serde_json::to_string(value).map_err(|e| AppRepoErrorDetail::DataRowParse(e.to_string()))
}

fn decode<T: DeserializeOwned>(row: &InMemRow, idx: usize) -> Result<T, AppRepoErrorDetail> {
    let raw = row
        .get(idx)
        .ok_or_else(|| AppRepoErrorDetail::DataRowParse(format!("missing-column:{idx}")))?;
    serde_json::from_str::<T>(raw.as_str())
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("column:{idx}, {e}")))
}

fn new_row(num_cols: usize, pairs: Vec<(usize, String)>) -> InMemRow {
    let mut row = vec![String::new(); num_cols];
    pairs.into_iter().for_each(|(idx, val)| row[idx] = val);
    row
}

fn month_key(student_id: &str, month: BillingMonth) -> String {
    // the month part is fixed-length, no ambiguity in the composed key
    format!("{student_id}-{month}")
}

fn checkout_to_row(m: &CheckoutModel) -> Result<InMemRow, AppRepoErrorDetail> {
    let pairs = vec![
        (CheckoutColIdx::StudentId as usize, encode(&m.student_id)?),
        (CheckoutColIdx::Intent as usize, encode(&m.intent)?),
        (CheckoutColIdx::Months as usize, encode(&m.months)?),
        (CheckoutColIdx::Amount as usize, encode(&m.amount)?),
        (CheckoutColIdx::Currency as usize, encode(&m.currency)?),
        (CheckoutColIdx::Source as usize, encode(&m.source)?),
        (CheckoutColIdx::Status as usize, encode(m.status.as_str())?),
        (CheckoutColIdx::PaymentId as usize, encode(&m.payment_id)?),
        (CheckoutColIdx::Metadata as usize, encode(&m.metadata)?),
        (CheckoutColIdx::CreateTime as usize, encode(&m.create_time)?),
    ];
    Ok(new_row(CheckoutColIdx::TotNumColumns as usize, pairs))
}

fn row_to_checkout(tx_ref: &str, row: &InMemRow) -> Result<CheckoutModel, AppRepoErrorDetail> {
    let status_raw = decode::<String>(row, CheckoutColIdx::Status as usize)?;
    let status = status_raw
        .parse::<CheckoutStatus>()
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("checkout-status:{e}")))?;
    Ok(CheckoutModel {
        tx_ref: tx_ref.to_string(),
        student_id: decode(row, CheckoutColIdx::StudentId as usize)?,
        intent: decode(row, CheckoutColIdx::Intent as usize)?,
        months: decode(row, CheckoutColIdx::Months as usize)?,
        amount: decode(row, CheckoutColIdx::Amount as usize)?,
        currency: decode(row, CheckoutColIdx::Currency as usize)?,
        source: decode(row, CheckoutColIdx::Source as usize)?,
        status,
        payment_id: decode(row, CheckoutColIdx::PaymentId as usize)?,
        metadata: decode(row, CheckoutColIdx::Metadata as usize)?,
        create_time: decode(row, CheckoutColIdx::CreateTime as usize)?,
    })
}

fn payment_to_row(m: &PaymentModel) -> Result<InMemRow, AppRepoErrorDetail> {
    let pairs = vec![
        (PaymentColIdx::StudentId as usize, encode(&m.student_id)?),
        (PaymentColIdx::Amount as usize, encode(&m.amount)?),
        (PaymentColIdx::Currency as usize, encode(&m.currency)?),
        (PaymentColIdx::Status as usize, encode(&m.status)?),
        (PaymentColIdx::Source as usize, encode(&m.source)?),
        (PaymentColIdx::Intent as usize, encode(&m.intent)?),
        (PaymentColIdx::TransactionId as usize, encode(&m.transaction_id)?),
        (PaymentColIdx::IdempotencyKey as usize, encode(&m.idempotency_key)?),
        (PaymentColIdx::Reason as usize, encode(&m.reason)?),
        (PaymentColIdx::ProviderRef as usize, encode(&m.provider_reference)?),
        (PaymentColIdx::ProviderStatus as usize, encode(&m.provider_status)?),
        (PaymentColIdx::ProviderFee as usize, encode(&m.provider_fee)?),
        (PaymentColIdx::ProviderPayload as usize, encode(&m.provider_payload)?),
        (PaymentColIdx::SubscriptionId as usize, encode(&m.subscription_id)?),
        (PaymentColIdx::CreateTime as usize, encode(&m.create_time)?),
    ];
    Ok(new_row(PaymentColIdx::TotNumColumns as usize, pairs))
}

fn row_to_payment(key: &str, row: &InMemRow) -> Result<PaymentModel, AppRepoErrorDetail> {
    let id = key
        .parse::<u64>()
        .map_err(|e| AppRepoErrorDetail::DataRowParse(format!("payment-id:{e}")))?;
    Ok(PaymentModel {
        id,
        student_id: decode(row, PaymentColIdx::StudentId as usize)?,
        amount: decode(row, PaymentColIdx::Amount as usize)?,
        currency: decode(row, PaymentColIdx::Currency as usize)?,
        status: decode(row, PaymentColIdx::Status as usize)?,
        source: decode(row, PaymentColIdx::Source as usize)?,
        intent: decode(row, PaymentColIdx::Intent as usize)?,
        transaction_id: decode(row, PaymentColIdx::TransactionId as usize)?,
        idempotency_key: decode(row, PaymentColIdx::IdempotencyKey as usize)?,
        reason: decode(row, PaymentColIdx::Reason as usize)?,
        provider_reference: decode(row, PaymentColIdx::ProviderRef as usize)?,
        provider_status: decode(row, PaymentColIdx::ProviderStatus as usize)?,
        provider_fee: decode(row, PaymentColIdx::ProviderFee as usize)?,
        provider_payload: decode(row, PaymentColIdx::ProviderPayload as usize)?,
        subscription_id: decode(row, PaymentColIdx::SubscriptionId as usize)?,
        create_time: decode(row, PaymentColIdx::CreateTime as usize)?,
    })
}

fn month_to_row(m: &MonthLedgerModel) -> Result<InMemRow, AppRepoErrorDetail> {
    let pairs = vec![
        (MonthColIdx::StudentId as usize, encode(&m.student_id)?),
        (MonthColIdx::Month as usize, encode(&m.month)?),
        (MonthColIdx::PaidAmount as usize, encode(&m.paid_amount)?),
        (MonthColIdx::Status as usize, encode(&m.status)?),
        (MonthColIdx::PayType as usize, encode(&m.pay_type)?),
        (MonthColIdx::StartDate as usize, encode(&m.start_date)?),
        (MonthColIdx::EndDate as usize, encode(&m.end_date)?),
        (MonthColIdx::IsFree as usize, encode(&m.is_free)?),
        (MonthColIdx::Provenance as usize, encode(&m.provenance)?),
        (MonthColIdx::PaymentId as usize, encode(&m.payment_id)?),
    ];
    Ok(new_row(MonthColIdx::TotNumColumns as usize, pairs))
}

fn row_to_month(row: &InMemRow) -> Result<MonthLedgerModel, AppRepoErrorDetail> {
    Ok(MonthLedgerModel {
        student_id: decode(row, MonthColIdx::StudentId as usize)?,
        month: decode(row, MonthColIdx::Month as usize)?,
        paid_amount: decode(row, MonthColIdx::PaidAmount as usize)?,
        status: decode(row, MonthColIdx::Status as usize)?,
        pay_type: decode(row, MonthColIdx::PayType as usize)?,
        start_date: decode(row, MonthColIdx::StartDate as usize)?,
        end_date: decode(row, MonthColIdx::EndDate as usize)?,
        is_free: decode(row, MonthColIdx::IsFree as usize)?,
        provenance: decode(row, MonthColIdx::Provenance as usize)?,
        payment_id: decode(row, MonthColIdx::PaymentId as usize)?,
    })
}

fn subscription_to_row(m: &SubscriptionModel) -> Result<InMemRow, AppRepoErrorDetail> {
    let pairs = vec![
        (SubscriptionColIdx::Id as usize, encode(&m.id)?),
        (SubscriptionColIdx::StudentId as usize, encode(&m.student_id)?),
        (SubscriptionColIdx::PackageId as usize, encode(&m.package_id)?),
        (SubscriptionColIdx::Status as usize, encode(&m.status)?),
        (SubscriptionColIdx::PeriodStart as usize, encode(&m.period_start)?),
        (SubscriptionColIdx::PeriodEnd as usize, encode(&m.period_end)?),
        (SubscriptionColIdx::NextBilling as usize, encode(&m.next_billing_date)?),
        (SubscriptionColIdx::UpdateTime as usize, encode(&m.update_time)?),
    ];
    Ok(new_row(SubscriptionColIdx::TotNumColumns as usize, pairs))
}

fn row_to_subscription(key: &str, row: &InMemRow) -> Result<SubscriptionModel, AppRepoErrorDetail> {
    Ok(SubscriptionModel {
        id: decode(row, SubscriptionColIdx::Id as usize)?,
        gateway_sub_id: key.to_string(),
        student_id: decode(row, SubscriptionColIdx::StudentId as usize)?,
        package_id: decode(row, SubscriptionColIdx::PackageId as usize)?,
        status: decode(row, SubscriptionColIdx::Status as usize)?,
        period_start: decode(row, SubscriptionColIdx::PeriodStart as usize)?,
        period_end: decode(row, SubscriptionColIdx::PeriodEnd as usize)?,
        next_billing_date: decode(row, SubscriptionColIdx::NextBilling as usize)?,
        update_time: decode(row, SubscriptionColIdx::UpdateTime as usize)?,
    })
}

fn row_to_student(key: &str, row: &InMemRow) -> Result<StudentModel, AppRepoErrorDetail> {
    Ok(StudentModel {
        id: key.to_string(),
        class_fee: decode(row, StudentColIdx::ClassFee as usize)?,
        start_date: decode(row, StudentColIdx::StartDate as usize)?,
    })
}

fn row_to_package(key: &str, row: &InMemRow) -> Result<PackageModel, AppRepoErrorDetail> {
    Ok(PackageModel {
        id: key.to_string(),
        duration_months: decode(row, PackageColIdx::Duration as usize)?,
        price: decode(row, PackageColIdx::Price as usize)?,
        currency: decode(row, PackageColIdx::Currency as usize)?,
    })
}

fn repo_error(
    logctx: &Arc<AppLogContext>,
    fn_label: AppRepoErrorFnLabel,
    detail: AppRepoErrorDetail,
) -> AppRepoError {
    let code = match &detail {
        AppRepoErrorDetail::DataStore(_) => AppErrorCode::ExceedingMaxLimit,
        AppRepoErrorDetail::DataRowParse(_) => AppErrorCode::DataCorruption,
        AppRepoErrorDetail::RowNotExist(_) => AppErrorCode::InvalidInput,
        _others => AppErrorCode::Unknown,
    };
    let e = AppRepoError {
        fn_label,
        code,
        detail,
    };
    app_log_event!(logctx, AppLogLevel::ERROR, "{:?}", e);
    e
}

/// Ledger on top of the in-memory store, for testing and single-instance
/// deployment. Reference data (students, packages) and checkouts are
/// normally created by other services, here they can be imported directly.
pub struct LedgerInMemRepo {
    _dstore: Arc<AppDStoreInMem>,
}

struct LedgerInMemTx {
    inner: AppInMemTx,
    logctx: Arc<AppLogContext>,
}

impl LedgerInMemRepo {
    pub fn new(ds: Arc<AppDataStoreContext>) -> Result<Self, AppRepoError> {
        ds.in_mem(None)
            .map(|found| Self { _dstore: found })
            .ok_or(AppRepoError {
                fn_label: AppRepoErrorFnLabel::InitRepo,
                code: AppErrorCode::MissingDataStore,
                detail: AppRepoErrorDetail::Unknown,
            })
    }

    async fn import_rows(&self, table: &str, rows: Vec<(String, InMemRow)>) -> Result<(), AppRepoError> {
        let logctx = self._dstore.log_context();
        let mut tx = self._dstore.begin().await;
        for (key, row) in rows {
            tx.save(table, key, row).map_err(|e| {
                repo_error(&logctx, AppRepoErrorFnLabel::ImportReference, AppRepoErrorDetail::DataStore(e))
            })?;
        }
        tx.commit(&logctx);
        Ok(())
    }

    pub async fn import_student(&self, m: &StudentModel) -> Result<(), AppRepoError> {
        let logctx = self._dstore.log_context();
        let result = encode(&m.class_fee).and_then(|fee| {
            let start = encode(&m.start_date)?;
            let pairs = vec![
                (StudentColIdx::ClassFee as usize, fee),
                (StudentColIdx::StartDate as usize, start),
            ];
            Ok(new_row(StudentColIdx::TotNumColumns as usize, pairs))
        });
        let row = result.map_err(|d| repo_error(&logctx, AppRepoErrorFnLabel::ImportReference, d))?;
        self.import_rows(table::STUDENT, vec![(m.id.clone(), row)]).await
    }

    pub async fn import_package(&self, m: &PackageModel) -> Result<(), AppRepoError> {
        let logctx = self._dstore.log_context();
        let result = encode(&m.duration_months).and_then(|duration| {
            let pairs = vec![
                (PackageColIdx::Duration as usize, duration),
                (PackageColIdx::Price as usize, encode(&m.price)?),
                (PackageColIdx::Currency as usize, encode(&m.currency)?),
            ];
            Ok(new_row(PackageColIdx::TotNumColumns as usize, pairs))
        });
        let row = result.map_err(|d| repo_error(&logctx, AppRepoErrorFnLabel::ImportReference, d))?;
        self.import_rows(table::PACKAGE, vec![(m.id.clone(), row)]).await
    }

    pub async fn import_checkout(&self, m: &CheckoutModel) -> Result<(), AppRepoError> {
        let logctx = self._dstore.log_context();
        let row = checkout_to_row(m)
            .map_err(|d| repo_error(&logctx, AppRepoErrorFnLabel::ImportReference, d))?;
        self.import_rows(table::CHECKOUT, vec![(m.tx_ref.clone(), row)]).await
    }

    /// months recorded before this service takes over, e.g. free months
    /// granted by school staff
    pub async fn import_months(&self, ms: &[MonthLedgerModel]) -> Result<(), AppRepoError> {
        let logctx = self._dstore.log_context();
        let rows = ms
            .iter()
            .map(|m| month_to_row(m).map(|row| (month_key(m.student_id.as_str(), m.month), row)))
            .collect::<Result<Vec<_>, AppRepoErrorDetail>>()
            .map_err(|d| repo_error(&logctx, AppRepoErrorFnLabel::ImportReference, d))?;
        self.import_rows(table::MONTH, rows).await
    }
} // end of impl LedgerInMemRepo

#[async_trait]
impl AbstractLedgerRepo for LedgerInMemRepo {
    async fn begin(&self) -> Result<Box<dyn AbstractLedgerTx>, AppRepoError> {
        let inner = self._dstore.begin().await;
        let obj = LedgerInMemTx {
            inner,
            logctx: self._dstore.log_context(),
        };
        Ok(Box::new(obj))
    }
}

impl LedgerInMemTx {
    fn _map_err(&self, fn_label: AppRepoErrorFnLabel, detail: AppRepoErrorDetail) -> AppRepoError {
        repo_error(&self.logctx, fn_label, detail)
    }

    fn all_payments(&self) -> Result<Vec<PaymentModel>, AppRepoErrorDetail> {
        self.inner
            .filter(table::PAYMENT, |_k, _row| true)
            .into_iter()
            .map(|(k, row)| row_to_payment(k, row))
            .collect()
    }

    fn months_of<F>(&self, pred: F) -> Result<Vec<MonthLedgerModel>, AppRepoErrorDetail>
    where
        F: Fn(&MonthLedgerModel) -> bool,
    {
        let mut out = Vec::new();
        for (_k, row) in self.inner.filter(table::MONTH, |_k, _row| true) {
            let m = row_to_month(row)?;
            if pred(&m) {
                out.push(m);
            }
        }
        out.sort_by(|a, b| a.month.cmp(&b.month));
        Ok(out)
    }
} // end of impl LedgerInMemTx

#[async_trait]
impl AbstractLedgerTx for LedgerInMemTx {
    async fn fetch_checkout(
        &mut self,
        tx_ref: &str,
    ) -> Result<Option<CheckoutModel>, AppRepoError> {
        self.inner
            .fetch(table::CHECKOUT, tx_ref)
            .map(|row| row_to_checkout(tx_ref, row))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchCheckout, d))
    }

    async fn fetch_payment(&mut self, id: u64) -> Result<Option<PaymentModel>, AppRepoError> {
        let key = id.to_string();
        self.inner
            .fetch(table::PAYMENT, key.as_str())
            .map(|row| row_to_payment(key.as_str(), row))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchPayment, d))
    }

    async fn fetch_student(&mut self, id: &str) -> Result<Option<StudentModel>, AppRepoError> {
        self.inner
            .fetch(table::STUDENT, id)
            .map(|row| row_to_student(id, row))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchStudent, d))
    }

    async fn fetch_package(&mut self, id: &str) -> Result<Option<PackageModel>, AppRepoError> {
        self.inner
            .fetch(table::PACKAGE, id)
            .map(|row| row_to_package(id, row))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchPackage, d))
    }

    async fn fetch_subscription(
        &mut self,
        gateway_sub_id: &str,
    ) -> Result<Option<SubscriptionModel>, AppRepoError> {
        self.inner
            .fetch(table::SUBSCRIPTION, gateway_sub_id)
            .map(|row| row_to_subscription(gateway_sub_id, row))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchSubscription, d))
    }

    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<PaymentModel>, AppRepoError> {
        let all = self
            .all_payments()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FindPayment, d))?;
        let found = all
            .into_iter()
            .filter(|m| lookup.matches(m))
            .min_by_key(|m| m.id);
        Ok(found)
    }

    async fn fetch_recent_payments(
        &mut self,
        student_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, AppRepoError> {
        let all = self
            .all_payments()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchRecentPayments, d))?;
        let mut out = all
            .into_iter()
            .filter(|m| m.student_id == student_id && m.create_time >= since)
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.create_time.cmp(&a.create_time).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn fetch_month(
        &mut self,
        student_id: &str,
        month: BillingMonth,
    ) -> Result<Option<MonthLedgerModel>, AppRepoError> {
        let key = month_key(student_id, month);
        self.inner
            .fetch(table::MONTH, key.as_str())
            .map(row_to_month)
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchMonth, d))
    }

    async fn fetch_unpaid_months(
        &mut self,
        student_id: &str,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError> {
        self.months_of(|m| m.student_id == student_id && !m.is_paid() && !m.is_free)
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchUnpaidMonths, d))
    }

    async fn latest_month(
        &mut self,
        student_id: &str,
    ) -> Result<Option<BillingMonth>, AppRepoError> {
        let ms = self
            .months_of(|m| m.student_id == student_id)
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::LatestMonth, d))?;
        Ok(ms.last().map(|m| m.month))
    }

    async fn fetch_months_by_payment(
        &mut self,
        payment_id: u64,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError> {
        self.months_of(|m| m.payment_id == Some(payment_id))
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchMonthsByPayment, d))
    }

    async fn insert_payment(&mut self, mut m: PaymentModel) -> Result<PaymentModel, AppRepoError> {
        m.id = self.inner.next_sequence(table::PAYMENT);
        let row =
            payment_to_row(&m).map_err(|d| self._map_err(AppRepoErrorFnLabel::InsertPayment, d))?;
        self.inner
            .save(table::PAYMENT, m.id.to_string(), row)
            .map_err(|e| {
                self._map_err(AppRepoErrorFnLabel::InsertPayment, AppRepoErrorDetail::DataStore(e))
            })?;
        Ok(m)
    }

    async fn update_payment(&mut self, m: &PaymentModel) -> Result<(), AppRepoError> {
        let key = m.id.to_string();
        if self.inner.fetch(table::PAYMENT, key.as_str()).is_none() {
            let detail = AppRepoErrorDetail::RowNotExist(format!("payment:{key}"));
            return Err(self._map_err(AppRepoErrorFnLabel::UpdatePayment, detail));
        }
        let row =
            payment_to_row(m).map_err(|d| self._map_err(AppRepoErrorFnLabel::UpdatePayment, d))?;
        self.inner.save(table::PAYMENT, key, row).map_err(|e| {
            self._map_err(AppRepoErrorFnLabel::UpdatePayment, AppRepoErrorDetail::DataStore(e))
        })
    }

    async fn update_checkout(&mut self, m: &CheckoutModel) -> Result<(), AppRepoError> {
        if self.inner.fetch(table::CHECKOUT, m.tx_ref.as_str()).is_none() {
            let detail = AppRepoErrorDetail::RowNotExist(format!("checkout:{}", m.tx_ref));
            return Err(self._map_err(AppRepoErrorFnLabel::UpdateCheckout, detail));
        }
        let row = checkout_to_row(m)
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::UpdateCheckout, d))?;
        self.inner
            .save(table::CHECKOUT, m.tx_ref.clone(), row)
            .map_err(|e| {
                self._map_err(AppRepoErrorFnLabel::UpdateCheckout, AppRepoErrorDetail::DataStore(e))
            })
    }

    async fn save_month(&mut self, m: &MonthLedgerModel) -> Result<(), AppRepoError> {
        let key = month_key(m.student_id.as_str(), m.month);
        let row = month_to_row(m).map_err(|d| self._map_err(AppRepoErrorFnLabel::SaveMonth, d))?;
        self.inner.save(table::MONTH, key, row).map_err(|e| {
            self._map_err(AppRepoErrorFnLabel::SaveMonth, AppRepoErrorDetail::DataStore(e))
        })
    }

    async fn save_subscription(
        &mut self,
        mut m: SubscriptionModel,
    ) -> Result<SubscriptionModel, AppRepoError> {
        let existing = self
            .inner
            .fetch(table::SUBSCRIPTION, m.gateway_sub_id.as_str())
            .map(|row| decode::<u64>(row, SubscriptionColIdx::Id as usize))
            .transpose()
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::SaveSubscription, d))?;
        m.id = match existing {
            Some(id) => id,
            None => self.inner.next_sequence(table::SUBSCRIPTION),
        };
        let row = subscription_to_row(&m)
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::SaveSubscription, d))?;
        self.inner
            .save(table::SUBSCRIPTION, m.gateway_sub_id.clone(), row)
            .map_err(|e| {
                self._map_err(AppRepoErrorFnLabel::SaveSubscription, AppRepoErrorDetail::DataStore(e))
            })?;
        Ok(m)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppRepoError> {
        let Self { inner, logctx } = *self;
        inner.commit(&logctx);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppRepoError> {
        Ok(()) // working copy discarded, lock released on drop
    }
} // end of impl LedgerInMemTx
