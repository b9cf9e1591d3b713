pub mod adapter;
pub mod api;
pub mod model;
pub mod network;
pub mod usecase;

use std::boxed::Box;
use std::result::Result;
use std::sync::Arc;

use school_common::confidentiality::AbstractConfidentiality;
use school_common::config::AppConfig;
use school_common::logging::AppLogContext;

use crate::adapter::cache::{app_cache_rate_limit, AbstractRateLimitStore};
use crate::adapter::datastore::{AppDStoreError, AppDataStoreContext};
use crate::adapter::processor::{
    app_processor_context, AbstractPaymentProcessor, AppProcessorError,
};

pub mod hard_limit {
    use school_common::config::AppCfgHardLimit;

    pub const MAX_ITEMS_PER_INMEM_TABLE: u32 = 50000u32;
    pub const MAX_DB_CONNECTIONS: u32 = 1800u32;
    pub const MAX_SECONDS_DB_IDLE: u16 = 360u16;

    pub fn cfg_limit() -> AppCfgHardLimit {
        AppCfgHardLimit {
            nitems_per_inmem_table: MAX_ITEMS_PER_INMEM_TABLE,
            num_db_conns: MAX_DB_CONNECTIONS,
            seconds_db_idle: MAX_SECONDS_DB_IDLE,
        }
    }
}

struct SharedInner {
    config: Arc<AppConfig>,
    logctx: Arc<AppLogContext>,
    dstore: Arc<AppDataStoreContext>,
    processors: Arc<Box<dyn AbstractPaymentProcessor>>,
    rate_limit: Arc<Box<dyn AbstractRateLimitStore>>,
}

/// Everything a request handler needs, built once at startup and cloned
/// into each server worker.
#[derive(Clone)]
pub struct AppSharedState(Arc<SharedInner>);

#[derive(Debug)]
pub enum ShrStateInitProgress {
    DataStore,
    ExternalProcessor,
}

#[derive(Debug)]
pub struct ShrStateInitError {
    pub progress: ShrStateInitProgress,
    pub detail: String,
}

impl From<AppDStoreError> for ShrStateInitError {
    fn from(value: AppDStoreError) -> Self {
        Self {
            progress: ShrStateInitProgress::DataStore,
            detail: format!("{:?}", value),
        }
    }
}
impl From<AppProcessorError> for ShrStateInitError {
    fn from(value: AppProcessorError) -> Self {
        Self {
            progress: ShrStateInitProgress::ExternalProcessor,
            detail: format!("{:?}", value),
        }
    }
}

impl AppSharedState {
    pub fn new(
        cfg: AppConfig,
        cfdntl: Box<dyn AbstractConfidentiality>,
    ) -> Result<Self, ShrStateInitError> {
        let logctx = Arc::new(AppLogContext::new(&cfg.basepath, &cfg.api_server.logging));
        let cfdntl = Arc::new(cfdntl);
        let srv_cfg = &cfg.api_server;
        let dstore = AppDataStoreContext::new(&srv_cfg.data_store, cfdntl.clone(), logctx.clone())?;
        let processors = app_processor_context(
            &srv_cfg.third_parties,
            cfdntl,
            srv_cfg.webhook.signature_tolerance_secs,
            logctx.clone(),
        )?;
        let rate_limit = app_cache_rate_limit(&srv_cfg.webhook);
        Ok(Self::from_parts(cfg, logctx, Arc::new(dstore), processors, rate_limit))
    }

    /// assemble from already-built parts, e.g. mock gateways in tests
    pub fn from_parts(
        cfg: AppConfig,
        logctx: Arc<AppLogContext>,
        dstore: Arc<AppDataStoreContext>,
        processors: Box<dyn AbstractPaymentProcessor>,
        rate_limit: Box<dyn AbstractRateLimitStore>,
    ) -> Self {
        let inner = SharedInner {
            config: Arc::new(cfg),
            logctx,
            dstore,
            processors: Arc::new(processors),
            rate_limit: Arc::new(rate_limit),
        };
        Self(Arc::new(inner))
    }

    pub fn datastore(&self) -> Arc<AppDataStoreContext> {
        self.0.dstore.clone()
    }
    pub fn processor_context(&self) -> Arc<Box<dyn AbstractPaymentProcessor>> {
        self.0.processors.clone()
    }
    pub fn rate_limit(&self) -> Arc<Box<dyn AbstractRateLimitStore>> {
        self.0.rate_limit.clone()
    }
    pub fn log_context(&self) -> Arc<AppLogContext> {
        self.0.logctx.clone()
    }
    pub fn config(&self) -> Arc<AppConfig> {
        self.0.config.clone()
    }
}
