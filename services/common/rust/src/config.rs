use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::result::Result as DefaultResult;
use std::sync::Arc;

use serde::de::{Deserializer, Error as DeserializeError};
use serde::Deserialize;

use crate::constant::{env_vars, limit as const_limit, logging as const_log};
use crate::error::{AppCfgError, AppErrorCode};
use crate::AppLogAlias;

#[derive(Deserialize)]
pub struct AppLogHandlerCfg {
    pub min_level: const_log::Level,
    pub destination: const_log::Destination,
    pub alias: AppLogAlias,
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct AppLoggerCfg {
    pub alias: AppLogAlias, // module path, e.g. `tuition_payment::usecase`
    pub handlers: Vec<String>,
    pub level: Option<const_log::Level>,
}

#[derive(Deserialize)]
pub struct AppLoggingCfg {
    pub handlers: Vec<AppLogHandlerCfg>,
    pub loggers: Vec<AppLoggerCfg>,
}

/// maps a URI path under the versioned scope to one of the handlers the
/// service registers in its route table
#[derive(Deserialize)]
pub struct WebApiRouteCfg {
    #[serde(deserialize_with = "nonempty_string")]
    pub path: String,
    #[serde(deserialize_with = "nonempty_string")]
    pub handler: String,
}

#[derive(Deserialize)]
pub struct WebApiListenCfg {
    #[serde(deserialize_with = "nonempty_string")]
    pub api_version: String,
    #[serde(deserialize_with = "nonempty_string")]
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
    pub routes: Vec<WebApiRouteCfg>,
}

#[derive(Deserialize)]
#[serde(tag = "source")]
pub enum AppConfidentialCfg {
    UserSpace {
        #[serde(deserialize_with = "nonempty_string")]
        sys_path: String,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub enum AppDbServerType {
    MariaDB,
}

#[derive(Deserialize, Debug)]
pub struct AppInMemoryDbCfg {
    #[serde(deserialize_with = "nonempty_string")]
    pub alias: String,
    pub max_items: u32,
}

#[derive(Deserialize, Debug)]
pub struct AppDbServerCfg {
    #[serde(deserialize_with = "nonempty_string")]
    pub alias: String,
    pub srv_type: AppDbServerType,
    pub max_conns: u32,
    pub idle_timeout_secs: u16,
    pub confidentiality_path: String,
    pub db_name: String,
}

#[derive(Deserialize)]
#[serde(tag = "_type")]
pub enum AppDataStoreCfg {
    InMemory(AppInMemoryDbCfg),
    DbServer(AppDbServerCfg),
}

// each payment gateway appears at most once, the variant `test` switches
// the gateway to a local mock which never reaches the network
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug)]
#[serde(tag = "mode")]
pub enum App3rdPartyCfg {
    dev {
        #[serde(deserialize_with = "nonempty_string")]
        name: String,
        #[serde(deserialize_with = "nonempty_string")]
        host: String,
        port: u16,
        #[serde(deserialize_with = "nonempty_string")]
        confidentiality_path: String,
    },
    test {
        #[serde(deserialize_with = "nonempty_string")]
        name: String,
        data_src: String,
    },
}

impl App3rdPartyCfg {
    pub fn name(&self) -> &str {
        match self {
            Self::dev { name, .. } | Self::test { name, .. } => name.as_str(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppWebhookCfg {
    #[serde(default = "dflt_webhook_window")]
    pub rate_limit_window_secs: u32,
    #[serde(default = "dflt_webhook_max_reqs")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "dflt_webhook_sig_tolerance")]
    pub signature_tolerance_secs: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppAllocationCfg {
    #[serde(default = "dflt_alloc_max_months")]
    pub max_generated_months: u16,
}

#[derive(Deserialize)]
pub struct ApiServerCfg {
    pub logging: AppLoggingCfg,
    pub listen: WebApiListenCfg,
    #[serde(default = "dflt_req_body_limit")]
    pub limit_req_body_in_bytes: usize,
    pub num_workers: u8,
    pub data_store: Vec<AppDataStoreCfg>,
    pub third_parties: Vec<Arc<App3rdPartyCfg>>,
    #[serde(default)]
    pub webhook: AppWebhookCfg,
    #[serde(default)]
    pub allocation: AppAllocationCfg,
    pub confidentiality: AppConfidentialCfg,
}

pub struct AppBasepathCfg {
    pub system: String,
    pub service: String,
}

pub struct AppConfig {
    pub basepath: AppBasepathCfg,
    pub api_server: ApiServerCfg,
}

/// upper bounds decided by the service at compile time, a config file
/// asking for more is rejected
pub struct AppCfgHardLimit {
    pub nitems_per_inmem_table: u32,
    pub num_db_conns: u32,
    pub seconds_db_idle: u16,
}

pub struct AppCfgInitArgs {
    pub env_var_map: HashMap<String, String, RandomState>,
    pub limit: AppCfgHardLimit,
}

fn dflt_req_body_limit() -> usize {
    const_limit::REQ_BODY_BYTES
}
fn dflt_webhook_window() -> u32 {
    const_limit::WEBHOOK_WINDOW_SECS
}
fn dflt_webhook_max_reqs() -> u32 {
    const_limit::WEBHOOK_MAX_REQUESTS
}
fn dflt_webhook_sig_tolerance() -> u32 {
    const_limit::WEBHOOK_SIGNATURE_TOLERANCE_SECS
}
fn dflt_alloc_max_months() -> u16 {
    const_limit::ALLOCATION_MAX_GENERATED_MONTHS
}

impl Default for AppWebhookCfg {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: dflt_webhook_window(),
            rate_limit_max_requests: dflt_webhook_max_reqs(),
            signature_tolerance_secs: dflt_webhook_sig_tolerance(),
        }
    }
}
impl Default for AppAllocationCfg {
    fn default() -> Self {
        Self {
            max_generated_months: dflt_alloc_max_months(),
        }
    }
}

fn cfg_error(code: AppErrorCode, detail: Option<String>) -> AppCfgError {
    AppCfgError { detail, code }
}

fn take_env_path(
    env_var_map: &mut HashMap<String, String>,
    label: &str,
    code: AppErrorCode,
) -> DefaultResult<String, AppCfgError> {
    env_var_map
        .remove(label)
        .ok_or(cfg_error(code, Some(label.to_string())))
}

impl AppConfig {
    pub fn new(args: AppCfgInitArgs) -> DefaultResult<Self, AppCfgError> {
        let AppCfgInitArgs {
            mut env_var_map,
            limit,
        } = args;
        let system = take_env_path(
            &mut env_var_map,
            env_vars::SYS_BASEPATH,
            AppErrorCode::MissingSysBasePath,
        )? + "/";
        let service = take_env_path(
            &mut env_var_map,
            env_vars::SERVICE_BASEPATH,
            AppErrorCode::MissingAppBasePath,
        )? + "/";
        let cfg_path = take_env_path(
            &mut env_var_map,
            env_vars::CFG_FILEPATH,
            AppErrorCode::MissingConfigPath,
        )?;
        let api_server = Self::parse_from_file(service.clone() + cfg_path.as_str(), limit)?;
        Ok(Self {
            api_server,
            basepath: AppBasepathCfg { system, service },
        })
    }

    pub fn parse_from_file(
        filepath: String,
        limit: AppCfgHardLimit,
    ) -> DefaultResult<ApiServerCfg, AppCfgError> {
        let fileobj = File::open(filepath).map_err(|e| {
            cfg_error(AppErrorCode::IOerror(e.kind()), Some(e.to_string()))
        })?;
        let parsed = serde_json::from_reader::<_, ApiServerCfg>(BufReader::new(fileobj))
            .map_err(|e| cfg_error(AppErrorCode::InvalidJsonFormat, Some(e.to_string())))?;
        parsed.listen.validate()?;
        parsed.logging.validate()?;
        Self::validate_datastore(parsed.data_store.as_slice(), &limit)?;
        Self::validate_gateways(parsed.third_parties.as_slice())?;
        parsed.webhook.validate()?;
        Ok(parsed)
    }

    fn validate_datastore(
        items: &[AppDataStoreCfg],
        limit: &AppCfgHardLimit,
    ) -> DefaultResult<(), AppCfgError> {
        if items.is_empty() {
            return Err(cfg_error(AppErrorCode::NoDatabaseCfg, None));
        }
        let exceeded = items.iter().find_map(|item| match item {
            AppDataStoreCfg::InMemory(c) if c.max_items > limit.nitems_per_inmem_table => {
                Some(format!("limit:{}", limit.nitems_per_inmem_table))
            }
            AppDataStoreCfg::DbServer(c) if c.max_conns > limit.num_db_conns => {
                Some(format!("limit-conn:{}", limit.num_db_conns))
            }
            AppDataStoreCfg::DbServer(c) if c.idle_timeout_secs > limit.seconds_db_idle => {
                Some(format!("limit-idle-time:{}", limit.seconds_db_idle))
            }
            _others => None,
        });
        match exceeded {
            Some(detail) => Err(cfg_error(AppErrorCode::ExceedingMaxLimit, Some(detail))),
            None => Ok(()),
        }
    }

    fn validate_gateways(items: &[Arc<App3rdPartyCfg>]) -> DefaultResult<(), AppCfgError> {
        if items.is_empty() {
            return Err(cfg_error(AppErrorCode::No3rdPartyCfg, None));
        }
        let mut seen = HashSet::new();
        let dup = items
            .iter()
            .map(|c| c.name().to_lowercase())
            .find(|name| !seen.insert(name.clone()));
        match dup {
            Some(name) => Err(cfg_error(
                AppErrorCode::No3rdPartyCfg,
                Some(format!("duplicate-gateway:{name}")),
            )),
            None => Ok(()),
        }
    }
} // end of impl AppConfig

impl WebApiListenCfg {
    fn validate(&self) -> DefaultResult<(), AppCfgError> {
        if self.routes.is_empty() {
            return Err(cfg_error(AppErrorCode::NoRouteApiServerCfg, None));
        }
        let numeric = self
            .api_version
            .split('.')
            .all(|seg| seg.parse::<u16>().is_ok());
        if !numeric {
            let detail = Some("version must be numeric".to_string());
            return Err(cfg_error(AppErrorCode::InvalidVersion, detail));
        }
        let mut seen = HashSet::new();
        let bad_route = self.routes.iter().find(|r| {
            !r.path.starts_with('/') || !seen.insert((r.path.as_str(), r.handler.as_str()))
        });
        match bad_route {
            Some(r) => {
                let detail = format!("path:{}, handler:{}", r.path, r.handler);
                Err(cfg_error(AppErrorCode::InvalidRouteConfig, Some(detail)))
            }
            None => Ok(()),
        }
    }
}

impl AppLoggingCfg {
    fn validate(&self) -> DefaultResult<(), AppCfgError> {
        if self.handlers.is_empty() {
            return Err(cfg_error(AppErrorCode::NoLogHandlerCfg, None));
        }
        if self.loggers.is_empty() {
            return Err(cfg_error(AppErrorCode::NoLoggerCfg, None));
        }
        if let Some(lgr) = self.loggers.iter().find(|l| l.handlers.is_empty()) {
            let detail = format!("the logger does not have handler: {}", lgr.alias);
            return Err(cfg_error(AppErrorCode::NoHandlerInLoggerCfg, Some(detail)));
        }
        if self.handlers.iter().any(|h| h.alias.is_empty()) {
            return Err(cfg_error(AppErrorCode::MissingAliasLogHdlerCfg, None));
        }
        if self.loggers.iter().any(|l| l.alias.is_empty()) {
            return Err(cfg_error(AppErrorCode::MissingAliasLoggerCfg, None));
        }
        // local file handler cannot work without a path
        let no_path = self.handlers.iter().find(|h| {
            matches!(h.destination, const_log::Destination::LOCALFS) && h.path.is_none()
        });
        if let Some(h) = no_path {
            let detail = format!("file-type handler does not contain path: {}", h.alias);
            return Err(cfg_error(AppErrorCode::InvalidHandlerLoggerCfg, Some(detail)));
        }
        let known: HashSet<&str> = self.handlers.iter().map(|h| h.alias.as_str()).collect();
        let dangling = self
            .loggers
            .iter()
            .find(|l| l.handlers.iter().any(|a| !known.contains(a.as_str())));
        match dangling {
            Some(lgr) => {
                let detail = format!("the logger contains invalid handler alias: {}", lgr.alias);
                Err(cfg_error(AppErrorCode::InvalidHandlerLoggerCfg, Some(detail)))
            }
            None => Ok(()),
        }
    }
}

impl AppWebhookCfg {
    fn validate(&self) -> DefaultResult<(), AppCfgError> {
        if self.rate_limit_window_secs == 0 || self.rate_limit_max_requests == 0 {
            let detail = Some("rate-limit".to_string());
            Err(cfg_error(AppErrorCode::InvalidWebhookCfg, detail))
        } else {
            Ok(())
        }
    }
}

fn nonempty_string<'de, D>(raw: D) -> DefaultResult<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(raw)?;
    if s.trim().is_empty() {
        Err(D::Error::invalid_length(0, &"non-empty string"))
    } else {
        Ok(s)
    }
}
