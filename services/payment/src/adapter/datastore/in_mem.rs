use std::collections::HashMap;
use std::result::Result;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use school_common::config::AppInMemoryDbCfg;
use school_common::logging::{app_log_event, AppLogContext, AppLogLevel};

use super::AppDStoreError;

// Simple in-memory storage. Callers maintain the structure of each row in
// each table, every column of a row is stringified regardless of its
// original type.
pub type InMemRow = Vec<String>;
type InnerTable = HashMap<String, InMemRow>;

#[derive(Clone, Default)]
struct InMemTableSet {
    tables: HashMap<String, InnerTable>,
    sequences: HashMap<String, u64>,
}

pub struct AppDStoreInMem {
    _alias: String,
    max_items_per_table: u32,
    data: Arc<Mutex<InMemTableSet>>,
    logctx: Arc<AppLogContext>,
}

/// Unit of work against the in-memory store, all other callers wait until
/// this one is committed or dropped. Changes are applied to a working copy
/// and only written back on commit.
pub struct AppInMemTx {
    guard: OwnedMutexGuard<InMemTableSet>,
    working: InMemTableSet,
    max_items_per_table: u32,
}

impl AppDStoreInMem {
    pub(super) fn new(cfg: &AppInMemoryDbCfg, logctx: Arc<AppLogContext>) -> Self {
        Self {
            _alias: cfg.alias.clone(),
            max_items_per_table: cfg.max_items,
            data: Arc::new(Mutex::new(InMemTableSet::default())),
            logctx,
        }
    }

    pub fn alias(&self) -> &str {
        self._alias.as_str()
    }

    pub fn log_context(&self) -> Arc<AppLogContext> {
        self.logctx.clone()
    }

    pub async fn begin(&self) -> AppInMemTx {
        let guard = self.data.clone().lock_owned().await;
        let working = guard.clone();
        AppInMemTx {
            guard,
            working,
            max_items_per_table: self.max_items_per_table,
        }
    }
} // end of impl AppDStoreInMem

impl AppInMemTx {
    pub fn fetch(&self, table: &str, key: &str) -> Option<&InMemRow> {
        self.working.tables.get(table).and_then(|t| t.get(key))
    }

    pub fn filter<F>(&self, table: &str, pred: F) -> Vec<(&String, &InMemRow)>
    where
        F: Fn(&str, &InMemRow) -> bool,
    {
        self.working
            .tables
            .get(table)
            .map(|t| {
                t.iter()
                    .filter(|(k, row)| pred(k.as_str(), row))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
    }

    /// insert or overwrite a row, the size of a table is checked only when
    /// a new key is inserted
    pub fn save(&mut self, table: &str, key: String, row: InMemRow) -> Result<(), AppDStoreError> {
        let limit = self.max_items_per_table;
        let t = self.working.tables.entry(table.to_string()).or_default();
        if !t.contains_key(key.as_str()) && t.len() >= limit as usize {
            return Err(AppDStoreError::TableCapacity {
                table: table.to_string(),
                limit,
            });
        }
        let _old = t.insert(key, row);
        Ok(())
    }

    pub fn next_sequence(&mut self, table: &str) -> u64 {
        let seq = self.working.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    pub fn commit(mut self, logctx: &Arc<AppLogContext>) {
        let num_tables = self.working.tables.len();
        *self.guard = self.working;
        app_log_event!(logctx, AppLogLevel::TRACE, "committed, tables:{num_tables}");
    }
} // end of impl AppInMemTx
