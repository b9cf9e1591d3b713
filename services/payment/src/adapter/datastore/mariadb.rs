use std::boxed::Box;
use std::io::ErrorKind;
use std::result::Result;
use std::sync::Arc;

use mysql_async::{
    Error as MysqlError, IoError, IsolationLevel, Opts, OptsBuilder, Pool, PoolConstraints,
    PoolOpts, Transaction, TxOpts,
};
use serde::Deserialize;

use school_common::confidentiality::{try_get_typed, AbstractConfidentiality};
use school_common::config::AppDbServerCfg;
use school_common::error::{AppConfidentialityError, AppErrorCode};
use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use super::AppDStoreError;

// credential layout shared with the other backend services
#[allow(non_snake_case)]
#[derive(Deserialize)]
struct DbSecret {
    HOST: String,
    PORT: u16,
    USER: String,
    PASSWORD: String,
}

impl From<AppConfidentialityError> for AppDStoreError {
    fn from(value: AppConfidentialityError) -> Self {
        Self::Credential(value.code, value.detail)
    }
}

// MariaDB error numbers worth telling apart from generic server failure
fn classify_server_errno(errno: u16) -> AppErrorCode {
    match errno {
        1037 | 1038 | 1041 => AppErrorCode::IOerror(ErrorKind::OutOfMemory),
        1040 | 1129 | 1203 => AppErrorCode::DatabaseServerBusy,
        1146 => AppErrorCode::DataTableNotExist,
        _others => AppErrorCode::RemoteDbServerFailure,
    }
}

impl From<MysqlError> for AppDStoreError {
    fn from(value: MysqlError) -> Self {
        match value {
            MysqlError::Io(IoError::Io(e)) => Self::Network(e.kind(), e.to_string()),
            MysqlError::Io(IoError::Tls(e)) => Self::Network(ErrorKind::Other, e.to_string()),
            MysqlError::Server(e) => Self::Server {
                code: classify_server_errno(e.code),
                errno: e.code,
                detail: e.message,
            },
            MysqlError::Driver(e) => Self::Driver(e.to_string()),
            MysqlError::Url(e) => Self::PoolOption(e.to_string()),
            MysqlError::Other(e) => Self::Driver(e.to_string()),
        }
    }
}

/// Connection pool to the ledger database. The pool connects lazily, a
/// server which is down at startup is only reported at the first
/// transaction.
pub(crate) struct AppDStoreMariaDB {
    pool: Pool,
    _alias: String,
    _logctx: Arc<AppLogContext>,
}

impl AppDStoreMariaDB {
    pub(super) fn try_build(
        cfg: &AppDbServerCfg,
        cfdntl: Arc<Box<dyn AbstractConfidentiality>>,
        logctx: Arc<AppLogContext>,
    ) -> Result<Self, AppDStoreError> {
        let secret = try_get_typed::<DbSecret>(&**cfdntl, cfg.confidentiality_path.as_str())?;
        let max_conns = cfg.max_conns.max(1) as usize;
        let constraints = PoolConstraints::new(1, max_conns)
            .ok_or(AppDStoreError::PoolOption(format!("max-conns:{max_conns}")))?;
        // found-rows makes UPDATE report matched rows, the repository relies
        // on it to tell a missing row from an unchanged one
        let builder = OptsBuilder::default()
            .ip_or_hostname(secret.HOST)
            .tcp_port(secret.PORT)
            .user(Some(secret.USER))
            .pass(Some(secret.PASSWORD))
            .db_name(Some(cfg.db_name.as_str()))
            .wait_timeout(Some(cfg.idle_timeout_secs as usize))
            .client_found_rows(true)
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        let logctx_p = &logctx;
        app_log_event!(
            logctx_p,
            AppLogLevel::INFO,
            "alias:{}, db:{}, max-conns:{max_conns}",
            cfg.alias,
            cfg.db_name
        );
        Ok(Self {
            pool: Pool::new(Opts::from(builder)),
            _alias: cfg.alias.clone(),
            _logctx: logctx,
        })
    }

    pub(super) fn alias(&self) -> &str {
        self._alias.as_str()
    }

    pub(crate) fn log_context(&self) -> Arc<AppLogContext> {
        self._logctx.clone()
    }

    /// every unit of work in the ledger runs in `REPEATABLE READ` isolation,
    /// the natural keys of the tables are backed by unique indexes
    pub(crate) async fn begin(&self) -> Result<Transaction<'static>, AppDStoreError> {
        let mut options = TxOpts::default();
        options.with_isolation_level(IsolationLevel::RepeatableRead);
        self.pool.start_transaction(options).await.map_err(|e| {
            let logctx_p = &self._logctx;
            app_log_event!(logctx_p, AppLogLevel::ERROR, "tx-start, alias:{}, {:?}", self._alias, e);
            AppDStoreError::from(e)
        })
    }
}
