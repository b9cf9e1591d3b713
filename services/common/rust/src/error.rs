use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::ErrorKind;

/// Error codes shared by the services. Codes of the config group are only
/// raised at startup, the rest may appear while serving requests.
#[derive(Debug, Clone, PartialEq)]
pub enum AppErrorCode {
    Unknown,
    // -- config
    MissingSysBasePath,
    MissingAppBasePath,
    MissingConfigPath,
    InvalidJsonFormat,
    InvalidVersion,
    InvalidRouteConfig,
    NoRouteApiServerCfg,
    MissingAliasLogHdlerCfg,
    MissingAliasLoggerCfg,
    NoLogHandlerCfg,
    NoLoggerCfg,
    NoHandlerInLoggerCfg,
    InvalidHandlerLoggerCfg,
    No3rdPartyCfg,
    InvalidWebhookCfg,
    NoConfidentialityCfg,
    NoDatabaseCfg,
    ExceedingMaxLimit,
    // -- runtime
    InvalidInput,
    MissingDataStore,
    RemoteDbServerFailure,
    DatabaseServerBusy,
    DataTableNotExist,
    DataCorruption,
    IOerror(ErrorKind),
}

#[derive(Debug)]
pub struct AppCfgError {
    pub detail: Option<String>,
    pub code: AppErrorCode,
}

#[derive(Debug)]
pub struct AppConfidentialityError {
    pub code: AppErrorCode,
    pub detail: String,
}

impl Display for AppCfgError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.detail.as_ref() {
            Some(d) => write!(f, "code:{:?}, detail:{d}", self.code),
            None => write!(f, "code:{:?}", self.code),
        }
    }
}

impl Display for AppConfidentialityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "code:{:?}, detail:{}", self.code, self.detail)
    }
}
