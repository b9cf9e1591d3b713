mod in_mem;
mod mariadb;

use std::boxed::Box;
use std::io::ErrorKind;
use std::result::Result;
use std::sync::Arc;

use school_common::confidentiality::AbstractConfidentiality;
use school_common::config::{AppDataStoreCfg, AppDbServerType};
use school_common::error::AppErrorCode;
use school_common::logging::AppLogContext;

pub use in_mem::{AppDStoreInMem, AppInMemTx, InMemRow};
pub(crate) use mariadb::AppDStoreMariaDB;

#[derive(Debug)]
pub enum AppDStoreError {
    /// secret for the database server is missing or malformed
    Credential(AppErrorCode, String),
    Network(ErrorKind, String),
    Driver(String),
    /// error packet sent back by the database server, `errno` is the
    /// vendor-specific error number
    Server {
        code: AppErrorCode,
        errno: u16,
        detail: String,
    },
    PoolOption(String),
    TableCapacity {
        table: String,
        limit: u32,
    },
}

pub struct AppDataStoreContext {
    _in_mem: Vec<Arc<AppDStoreInMem>>,
    _mariadb: Vec<Arc<AppDStoreMariaDB>>,
}

impl AppDataStoreContext {
    /// builds every configured store, fails on the first store which
    /// cannot be set up
    pub fn new(
        cfgs: &[AppDataStoreCfg],
        cfdntl: Arc<Box<dyn AbstractConfidentiality>>,
        logctx: Arc<AppLogContext>,
    ) -> Result<Self, AppDStoreError> {
        let (mut _in_mem, mut _mariadb) = (Vec::new(), Vec::new());
        for cfg in cfgs {
            match cfg {
                AppDataStoreCfg::InMemory(c) => {
                    let item = AppDStoreInMem::new(c, logctx.clone());
                    _in_mem.push(Arc::new(item));
                }
                AppDataStoreCfg::DbServer(c) => match c.srv_type {
                    AppDbServerType::MariaDB => {
                        let item =
                            AppDStoreMariaDB::try_build(c, cfdntl.clone(), logctx.clone())?;
                        _mariadb.push(Arc::new(item));
                    }
                },
            }
        }
        Ok(Self { _in_mem, _mariadb })
    }

    pub fn in_mem(&self, maybe_alias: Option<&str>) -> Option<Arc<AppDStoreInMem>> {
        let result = if let Some(a) = maybe_alias {
            self._in_mem.iter().find(|m| m.alias() == a)
        } else {
            self._in_mem.first()
        };
        result.cloned()
    }

    pub(crate) fn mariadb(&self, maybe_alias: Option<&str>) -> Option<Arc<AppDStoreMariaDB>> {
        let result = if let Some(a) = maybe_alias {
            self._mariadb.iter().find(|m| m.alias() == a)
        } else {
            self._mariadb.first()
        };
        result.cloned()
    }
} // end of impl AppDataStoreContext
