mod in_mem;
mod mariadb;

use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use school_common::error::AppErrorCode;

use crate::model::{
    BillingMonth, CheckoutModel, MonthLedgerModel, PackageModel, PaymentModel, StudentModel,
    SubscriptionModel,
};

use super::datastore::{AppDStoreError, AppDataStoreContext};

pub use self::in_mem::LedgerInMemRepo;
use self::mariadb::LedgerMariaDbRepo;

#[derive(Debug)]
pub enum AppRepoErrorFnLabel {
    InitRepo,
    BeginTx,
    CommitTx,
    RollbackTx,
    FetchCheckout,
    FetchPayment,
    FetchStudent,
    FetchPackage,
    FetchSubscription,
    FindPayment,
    FetchRecentPayments,
    FetchMonth,
    FetchUnpaidMonths,
    LatestMonth,
    FetchMonthsByPayment,
    InsertPayment,
    UpdatePayment,
    UpdateCheckout,
    SaveMonth,
    SaveSubscription,
    ImportReference,
}

#[derive(Debug)]
pub enum AppRepoErrorDetail {
    DataStore(AppDStoreError),
    DatabaseTxStart(String),
    DatabaseTxCommit(String),
    DatabaseQuery(String),
    DatabaseExec(String),
    DataRowParse(String),
    RowNotExist(String),
    Unknown,
}

#[derive(Debug)]
pub struct AppRepoError {
    pub fn_label: AppRepoErrorFnLabel,
    pub code: AppErrorCode,
    pub detail: AppRepoErrorDetail,
}

/// ways to look up an existing payment before creating a new one
#[derive(Debug, Clone, Copy)]
pub enum PaymentLookup<'a> {
    TransactionId(&'a str),
    /// transaction id or idempotency key equal to the given key
    IdempotencyKey(&'a str),
    /// transaction id or provider reference equal to given correlation id,
    /// and the payment has been linked to a subscription
    SubscriptionLinked(&'a str),
}

impl PaymentLookup<'_> {
    pub fn matches(&self, m: &PaymentModel) -> bool {
        match self {
            Self::TransactionId(v) => m.transaction_id.as_str() == *v,
            Self::IdempotencyKey(v) => {
                m.transaction_id.as_str() == *v || m.idempotency_key.as_deref() == Some(*v)
            }
            Self::SubscriptionLinked(v) => {
                let referred = m.transaction_id.as_str() == *v
                    || m.provider_reference.as_deref() == Some(*v);
                referred && m.subscription_id.is_some()
            }
        }
    }
}

/// One atomic unit of work against the ledger. All writes become visible
/// to other callers only after `commit()`, dropping a unit without commit
/// discards every write in it.
#[async_trait]
pub trait AbstractLedgerTx: Send {
    async fn fetch_checkout(&mut self, tx_ref: &str)
        -> Result<Option<CheckoutModel>, AppRepoError>;

    async fn fetch_payment(&mut self, id: u64) -> Result<Option<PaymentModel>, AppRepoError>;

    async fn fetch_student(&mut self, id: &str) -> Result<Option<StudentModel>, AppRepoError>;

    async fn fetch_package(&mut self, id: &str) -> Result<Option<PackageModel>, AppRepoError>;

    async fn fetch_subscription(
        &mut self,
        gateway_sub_id: &str,
    ) -> Result<Option<SubscriptionModel>, AppRepoError>;

    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<PaymentModel>, AppRepoError>;

    /// payments of a student created at or after `since`, newest first
    async fn fetch_recent_payments(
        &mut self,
        student_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, AppRepoError>;

    async fn fetch_month(
        &mut self,
        student_id: &str,
        month: BillingMonth,
    ) -> Result<Option<MonthLedgerModel>, AppRepoError>;

    /// months not yet paid and not free, in ascending order
    async fn fetch_unpaid_months(
        &mut self,
        student_id: &str,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError>;

    /// the latest month ever recorded for the student, regardless of status
    async fn latest_month(&mut self, student_id: &str)
        -> Result<Option<BillingMonth>, AppRepoError>;

    async fn fetch_months_by_payment(
        &mut self,
        payment_id: u64,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError>;

    /// returns the saved payment with identifier assigned by the store
    async fn insert_payment(&mut self, m: PaymentModel) -> Result<PaymentModel, AppRepoError>;

    async fn update_payment(&mut self, m: &PaymentModel) -> Result<(), AppRepoError>;

    async fn update_checkout(&mut self, m: &CheckoutModel) -> Result<(), AppRepoError>;

    /// insert or update by the natural key `(student_id, month)`
    async fn save_month(&mut self, m: &MonthLedgerModel) -> Result<(), AppRepoError>;

    /// insert or update by gateway subscription id, returns saved object
    /// with identifier assigned by the store
    async fn save_subscription(
        &mut self,
        m: SubscriptionModel,
    ) -> Result<SubscriptionModel, AppRepoError>;

    async fn commit(self: Box<Self>) -> Result<(), AppRepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppRepoError>;
} // end of trait AbstractLedgerTx

#[async_trait]
pub trait AbstractLedgerRepo: Sync + Send {
    async fn begin(&self) -> Result<Box<dyn AbstractLedgerTx>, AppRepoError>;

    // the read operations below run in their own short-lived unit of work,
    // callers holding an open unit MUST read through it instead.

    async fn fetch_checkout(&self, tx_ref: &str) -> Result<Option<CheckoutModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_checkout(tx_ref).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_payment(&self, id: u64) -> Result<Option<PaymentModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_payment(id).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_student(&self, id: &str) -> Result<Option<StudentModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_student(id).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_package(&self, id: &str) -> Result<Option<PackageModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_package(id).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_subscription(
        &self,
        gateway_sub_id: &str,
    ) -> Result<Option<SubscriptionModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_subscription(gateway_sub_id).await;
        tx.rollback().await?;
        out
    }

    async fn find_payment(
        &self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<PaymentModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.find_payment(lookup).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_month(
        &self,
        student_id: &str,
        month: BillingMonth,
    ) -> Result<Option<MonthLedgerModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_month(student_id, month).await;
        tx.rollback().await?;
        out
    }

    async fn fetch_months_by_payment(
        &self,
        payment_id: u64,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError> {
        let mut tx = self.begin().await?;
        let out = tx.fetch_months_by_payment(payment_id).await;
        tx.rollback().await?;
        out
    }
} // end of trait AbstractLedgerRepo

/// picks the first configured database server, falls back to in-memory
/// store if no database server is configured
pub async fn app_repo_ledger(
    dstore: Arc<AppDataStoreContext>,
) -> Result<Box<dyn AbstractLedgerRepo>, AppRepoError> {
    if dstore.mariadb(None).is_some() {
        let repo = LedgerMariaDbRepo::new(dstore)?;
        Ok(Box::new(repo))
    } else {
        let repo = LedgerInMemRepo::new(dstore)?;
        Ok(Box::new(repo))
    }
}
