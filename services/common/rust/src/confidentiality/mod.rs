mod userspace;

use std::boxed::Box;
use std::marker::{Send, Sync};
use std::result::Result as DefaultResult;

use serde::de::DeserializeOwned;

use crate::config::{AppConfidentialCfg, AppConfig};
use crate::error::{AppConfidentialityError, AppErrorCode};

pub use userspace::UserSpaceConfidentiality;

/// secret source selected in the config file, paths are resolved against
/// the system base path
pub fn build_context(
    cfg: &AppConfig,
) -> DefaultResult<Box<dyn AbstractConfidentiality>, AppConfidentialityError> {
    match &cfg.api_server.confidentiality {
        AppConfidentialCfg::UserSpace { sys_path } => {
            if sys_path.trim().is_empty() {
                return Err(AppConfidentialityError {
                    code: AppErrorCode::NoConfidentialityCfg,
                    detail: "empty-sys-path".to_string(),
                });
            }
            let fullpath = cfg.basepath.system.clone() + sys_path.as_str();
            Ok(Box::new(UserSpaceConfidentiality::build(fullpath)))
        }
    }
}

/// Read-only access to private data such as gateway keys or database
/// credentials. `id_` is a slash-separated path into the secret source,
/// the returned string is the serialised JSON value found at that path.
pub trait AbstractConfidentiality: Send + Sync {
    fn try_get_payload(&self, id_: &str) -> DefaultResult<String, AppConfidentialityError>;
}

/// Loads the secret at `id_` and decodes it into `T`. A value that exists
/// but does not match the shape of `T` is reported with
/// `AppErrorCode::DataCorruption`.
pub fn try_get_typed<T: DeserializeOwned>(
    src: &dyn AbstractConfidentiality,
    id_: &str,
) -> DefaultResult<T, AppConfidentialityError> {
    let serial = src.try_get_payload(id_)?;
    serde_json::from_str::<T>(serial.as_str()).map_err(|e| AppConfidentialityError {
        code: AppErrorCode::DataCorruption,
        detail: format!("path:{id_}, {e}"),
    })
}
