use std::fs::File;
use std::io::BufReader;
use std::result::Result as DefaultResult;

use serde_json::Value as JsnVal;

use super::AbstractConfidentiality;
use crate::error::{AppConfidentialityError, AppErrorCode};

// the secret file is re-read on each access, so rotated credentials take
// effect without restarting the service
pub struct UserSpaceConfidentiality {
    srcpath: String,
}

impl UserSpaceConfidentiality {
    pub fn build(srcpath: String) -> Self {
        Self { srcpath }
    }

    fn load_source(&self) -> DefaultResult<JsnVal, AppConfidentialityError> {
        let f = File::open(self.srcpath.as_str()).map_err(|e| AppConfidentialityError {
            code: AppErrorCode::IOerror(e.kind()),
            detail: e.to_string(),
        })?;
        serde_json::from_reader::<BufReader<File>, JsnVal>(BufReader::new(f)).map_err(|e| {
            AppConfidentialityError {
                code: AppErrorCode::InvalidJsonFormat,
                detail: e.to_string(),
            }
        })
    }

    fn traverse<'a>(
        mut node: &'a JsnVal,
        id_: &str,
    ) -> DefaultResult<&'a JsnVal, AppConfidentialityError> {
        for seg in id_.split('/').filter(|s| !s.is_empty()) {
            node = match node {
                JsnVal::Object(map) => map.get(seg).ok_or(AppConfidentialityError {
                    code: AppErrorCode::NoConfidentialityCfg,
                    detail: format!("object, key-not-found:{seg}"),
                })?,
                JsnVal::Array(lst) => {
                    let idx = seg.parse::<usize>().map_err(|_e| AppConfidentialityError {
                        code: AppErrorCode::NoConfidentialityCfg,
                        detail: format!("path-error, non-numeric-index:{seg}"),
                    })?;
                    lst.get(idx).ok_or(AppConfidentialityError {
                        code: AppErrorCode::NoConfidentialityCfg,
                        detail: format!("array, index-out-of-range:{idx}"),
                    })?
                }
                _others => {
                    return Err(AppConfidentialityError {
                        code: AppErrorCode::NoConfidentialityCfg,
                        detail: format!("path-error, leaf-reached-before:{seg}"),
                    });
                }
            };
        }
        Ok(node)
    }
}

impl AbstractConfidentiality for UserSpaceConfidentiality {
    fn try_get_payload(&self, id_: &str) -> DefaultResult<String, AppConfidentialityError> {
        let root = self.load_source()?;
        let found = Self::traverse(&root, id_)?;
        serde_json::to_string(found).map_err(|e| AppConfidentialityError {
            code: AppErrorCode::DataCorruption,
            detail: e.to_string(),
        })
    }
}
