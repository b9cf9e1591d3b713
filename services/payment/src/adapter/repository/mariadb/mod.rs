mod converter;

use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use mysql_async::prelude::{Query, WithParams};
use mysql_async::{Error as MysqlError, Row, Transaction};

use school_common::error::AppErrorCode;
use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use crate::adapter::datastore::{AppDStoreMariaDB, AppDataStoreContext};
use crate::model::{
    BillingMonth, CheckoutModel, MonthLedgerModel, PackageModel, PaymentModel, StudentModel,
    SubscriptionModel,
};

use self::converter::SqlArgs;
use super::{
    AbstractLedgerRepo, AbstractLedgerTx, AppRepoError, AppRepoErrorDetail, AppRepoErrorFnLabel,
    PaymentLookup,
};

fn repo_error(
    logctx: &Arc<AppLogContext>,
    fn_label: AppRepoErrorFnLabel,
    detail: AppRepoErrorDetail,
) -> AppRepoError {
    let code = match &detail {
        AppRepoErrorDetail::DataStore(_) => AppErrorCode::DatabaseServerBusy,
        AppRepoErrorDetail::DatabaseTxStart(_)
        | AppRepoErrorDetail::DatabaseTxCommit(_)
        | AppRepoErrorDetail::DatabaseQuery(_)
        | AppRepoErrorDetail::DatabaseExec(_) => AppErrorCode::RemoteDbServerFailure,
        AppRepoErrorDetail::DataRowParse(_) => AppErrorCode::DataCorruption,
        AppRepoErrorDetail::RowNotExist(_) => AppErrorCode::InvalidInput,
        AppRepoErrorDetail::Unknown => AppErrorCode::Unknown,
    };
    let e = AppRepoError {
        fn_label,
        code,
        detail,
    };
    app_log_event!(logctx, AppLogLevel::ERROR, "{:?}", e);
    e
}

fn query_failure(e: MysqlError) -> AppRepoErrorDetail {
    AppRepoErrorDetail::DatabaseQuery(e.to_string())
}
fn exec_failure(e: MysqlError) -> AppRepoErrorDetail {
    AppRepoErrorDetail::DatabaseExec(e.to_string())
}

pub(super) struct LedgerMariaDbRepo {
    _dstore: Arc<AppDStoreMariaDB>,
}

struct LedgerMariaDbTx {
    tx: Transaction<'static>,
    logctx: Arc<AppLogContext>,
}

impl LedgerMariaDbRepo {
    pub(super) fn new(ds: Arc<AppDataStoreContext>) -> Result<Self, AppRepoError> {
        ds.mariadb(None)
            .map(|found| Self { _dstore: found })
            .ok_or(AppRepoError {
                fn_label: AppRepoErrorFnLabel::InitRepo,
                code: AppErrorCode::MissingDataStore,
                detail: AppRepoErrorDetail::Unknown,
            })
    }
}

#[async_trait]
impl AbstractLedgerRepo for LedgerMariaDbRepo {
    async fn begin(&self) -> Result<Box<dyn AbstractLedgerTx>, AppRepoError> {
        let logctx = self._dstore.log_context();
        let tx = self._dstore.begin().await.map_err(|e| {
            repo_error(&logctx, AppRepoErrorFnLabel::BeginTx, AppRepoErrorDetail::DataStore(e))
        })?;
        Ok(Box::new(LedgerMariaDbTx { tx, logctx }))
    }
}

impl LedgerMariaDbTx {
    fn _map_err(&self, fn_label: AppRepoErrorFnLabel, detail: AppRepoErrorDetail) -> AppRepoError {
        repo_error(&self.logctx, fn_label, detail)
    }

    async fn query_first(&mut self, args: SqlArgs) -> Result<Option<Row>, AppRepoErrorDetail> {
        let (stmt, params) = args.into_parts();
        stmt.with(params)
            .first::<Row, &mut Transaction<'static>>(&mut self.tx)
            .await
            .map_err(query_failure)
    }

    async fn query_all(&mut self, args: SqlArgs) -> Result<Vec<Row>, AppRepoErrorDetail> {
        let (stmt, params) = args.into_parts();
        let mut rs_stream = stmt
            .with(params)
            .stream::<Row, &mut Transaction<'static>>(&mut self.tx)
            .await
            .map_err(query_failure)?;
        let mut out = Vec::new();
        while let Some(result) = rs_stream.next().await {
            out.push(result.map_err(query_failure)?);
        }
        Ok(out)
    }

    /// returns number of affected rows and the last auto-increment id
    async fn execute(&mut self, args: SqlArgs) -> Result<(u64, Option<u64>), AppRepoErrorDetail> {
        let (stmt, params) = args.into_parts();
        let resultset = stmt
            .with(params)
            .run::<&mut Transaction<'static>>(&mut self.tx)
            .await
            .map_err(exec_failure)?;
        Ok((resultset.affected_rows(), resultset.last_insert_id()))
    }

    async fn _fetch_payments(
        &mut self,
        args: SqlArgs,
    ) -> Result<Vec<PaymentModel>, AppRepoErrorDetail> {
        let rows = self.query_all(args).await?;
        rows.into_iter().map(converter::row_to_payment).collect()
    }

    async fn _fetch_months(
        &mut self,
        args: SqlArgs,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoErrorDetail> {
        let rows = self.query_all(args).await?;
        rows.into_iter().map(converter::row_to_month).collect()
    }

    async fn _fetch_subscription(
        &mut self,
        gateway_sub_id: &str,
    ) -> Result<Option<SubscriptionModel>, AppRepoErrorDetail> {
        let args = converter::fetch_subscription_args(gateway_sub_id);
        self.query_first(args)
            .await?
            .map(converter::row_to_subscription)
            .transpose()
    }
} // end of impl LedgerMariaDbTx

#[async_trait]
impl AbstractLedgerTx for LedgerMariaDbTx {
    async fn fetch_checkout(
        &mut self,
        tx_ref: &str,
    ) -> Result<Option<CheckoutModel>, AppRepoError> {
        let args = converter::fetch_checkout_args(tx_ref);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(|row| converter::row_to_checkout(tx_ref, row)).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchCheckout, d))
    }

    async fn fetch_payment(&mut self, id: u64) -> Result<Option<PaymentModel>, AppRepoError> {
        let args = converter::fetch_payment_args(id);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(converter::row_to_payment).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchPayment, d))
    }

    async fn fetch_student(&mut self, id: &str) -> Result<Option<StudentModel>, AppRepoError> {
        let args = converter::fetch_student_args(id);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(|row| converter::row_to_student(id, row)).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchStudent, d))
    }

    async fn fetch_package(&mut self, id: &str) -> Result<Option<PackageModel>, AppRepoError> {
        let args = converter::fetch_package_args(id);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(|row| converter::row_to_package(id, row)).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchPackage, d))
    }

    async fn fetch_subscription(
        &mut self,
        gateway_sub_id: &str,
    ) -> Result<Option<SubscriptionModel>, AppRepoError> {
        self._fetch_subscription(gateway_sub_id)
            .await
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchSubscription, d))
    }

    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<PaymentModel>, AppRepoError> {
        let args = converter::find_payment_args(lookup);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(converter::row_to_payment).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FindPayment, d))
    }

    async fn fetch_recent_payments(
        &mut self,
        student_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PaymentModel>, AppRepoError> {
        let args = converter::fetch_recent_payments_args(student_id, since);
        self._fetch_payments(args)
            .await
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchRecentPayments, d))
    }

    async fn fetch_month(
        &mut self,
        student_id: &str,
        month: BillingMonth,
    ) -> Result<Option<MonthLedgerModel>, AppRepoError> {
        let args = converter::fetch_month_args(student_id, month);
        let result = match self.query_first(args).await {
            Ok(v) => v.map(converter::row_to_month).transpose(),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchMonth, d))
    }

    async fn fetch_unpaid_months(
        &mut self,
        student_id: &str,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError> {
        let args = converter::fetch_unpaid_months_args(student_id);
        self._fetch_months(args)
            .await
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchUnpaidMonths, d))
    }

    async fn latest_month(
        &mut self,
        student_id: &str,
    ) -> Result<Option<BillingMonth>, AppRepoError> {
        let args = converter::latest_month_args(student_id);
        let result = match self.query_first(args).await {
            Ok(Some(mut row)) => match row.take_opt::<Option<String>, usize>(0) {
                Some(Ok(Some(raw))) => converter::parse_month_label(raw.as_str()).map(Some),
                Some(Ok(None)) | None => Ok(None),
                Some(Err(e)) => Err(AppRepoErrorDetail::DataRowParse(format!("{:?}", e))),
            },
            Ok(None) => Ok(None),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::LatestMonth, d))
    }

    async fn fetch_months_by_payment(
        &mut self,
        payment_id: u64,
    ) -> Result<Vec<MonthLedgerModel>, AppRepoError> {
        let args = converter::fetch_months_by_payment_args(payment_id);
        self._fetch_months(args)
            .await
            .map_err(|d| self._map_err(AppRepoErrorFnLabel::FetchMonthsByPayment, d))
    }

    async fn insert_payment(&mut self, mut m: PaymentModel) -> Result<PaymentModel, AppRepoError> {
        let result = match converter::insert_payment_args(&m) {
            Ok(args) => self.execute(args).await,
            Err(d) => Err(d),
        };
        let (_num_affected, last_id) =
            result.map_err(|d| self._map_err(AppRepoErrorFnLabel::InsertPayment, d))?;
        m.id = last_id.ok_or_else(|| {
            let detail = AppRepoErrorDetail::DatabaseExec("payment-id-missing".to_string());
            self._map_err(AppRepoErrorFnLabel::InsertPayment, detail)
        })?;
        Ok(m)
    }

    async fn update_payment(&mut self, m: &PaymentModel) -> Result<(), AppRepoError> {
        let result = match converter::update_payment_args(m) {
            Ok(args) => self.execute(args).await,
            Err(d) => Err(d),
        };
        match result {
            Ok((0, _)) => {
                let detail = AppRepoErrorDetail::RowNotExist(format!("payment:{}", m.id));
                Err(self._map_err(AppRepoErrorFnLabel::UpdatePayment, detail))
            }
            Ok(_) => Ok(()),
            Err(d) => Err(self._map_err(AppRepoErrorFnLabel::UpdatePayment, d)),
        }
    }

    async fn update_checkout(&mut self, m: &CheckoutModel) -> Result<(), AppRepoError> {
        let result = match converter::update_checkout_args(m) {
            Ok(args) => self.execute(args).await,
            Err(d) => Err(d),
        };
        match result {
            Ok((0, _)) => {
                let detail = AppRepoErrorDetail::RowNotExist(format!("checkout:{}", m.tx_ref));
                Err(self._map_err(AppRepoErrorFnLabel::UpdateCheckout, detail))
            }
            Ok(_) => Ok(()),
            Err(d) => Err(self._map_err(AppRepoErrorFnLabel::UpdateCheckout, d)),
        }
    }

    async fn save_month(&mut self, m: &MonthLedgerModel) -> Result<(), AppRepoError> {
        let result = match converter::save_month_args(m) {
            Ok(args) => self.execute(args).await.map(|_| ()),
            Err(d) => Err(d),
        };
        result.map_err(|d| self._map_err(AppRepoErrorFnLabel::SaveMonth, d))
    }

    async fn save_subscription(
        &mut self,
        m: SubscriptionModel,
    ) -> Result<SubscriptionModel, AppRepoError> {
        let args = converter::save_subscription_args(&m);
        let result = match self.execute(args).await {
            Ok(_) => self._fetch_subscription(m.gateway_sub_id.as_str()).await,
            Err(d) => Err(d),
        };
        let saved = result.map_err(|d| self._map_err(AppRepoErrorFnLabel::SaveSubscription, d))?;
        saved.ok_or_else(|| {
            let detail = AppRepoErrorDetail::RowNotExist(m.gateway_sub_id.clone());
            self._map_err(AppRepoErrorFnLabel::SaveSubscription, detail)
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), AppRepoError> {
        let Self { tx, logctx } = *self;
        tx.commit().await.map_err(|e| {
            let detail = AppRepoErrorDetail::DatabaseTxCommit(e.to_string());
            repo_error(&logctx, AppRepoErrorFnLabel::CommitTx, detail)
        })
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppRepoError> {
        let Self { tx, logctx } = *self;
        tx.rollback().await.map_err(|e| {
            let detail = AppRepoErrorDetail::DatabaseTxCommit(e.to_string());
            repo_error(&logctx, AppRepoErrorFnLabel::RollbackTx, detail)
        })
    }
} // end of impl LedgerMariaDbTx
