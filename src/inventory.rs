//! Stock book: read-only view of inventory levels and the audit trail.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::{DeskError, DeskResult};
use crate::gateway::Gateway;
use crate::models::{AuditEntry, InventoryItem, StockStatus};
use crate::normalize::{self, LoadError, LoadErrors, Loaded};

#[derive(Default)]
struct BookState {
    items: Vec<InventoryItem>,
    audit: Vec<AuditEntry>,
    load_errors: LoadErrors,
}

const INVENTORY: &str = "inventory";
const AUDIT_LOG: &str = "audit log";

pub struct StockBook {
    gateway: Arc<dyn Gateway>,
    state: Mutex<BookState>,
}

impl StockBook {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(BookState::default()),
        }
    }

    fn state(&self) -> DeskResult<MutexGuard<'_, BookState>> {
        self.state
            .lock()
            .map_err(|e| DeskError::Cache(format!("stock book lock poisoned: {e}")))
    }

    pub fn items(&self) -> Vec<InventoryItem> {
        self.state().map(|s| s.items.clone()).unwrap_or_default()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.state().map(|s| s.audit.clone()).unwrap_or_default()
    }

    pub fn load_error(&self) -> Option<LoadError> {
        self.state().ok().and_then(|s| s.load_errors.first().cloned())
    }

    pub fn load_errors(&self) -> LoadErrors {
        self.state().map(|s| s.load_errors.clone()).unwrap_or_default()
    }

    fn fetch_failed(&self, what: &'static str, err: DeskError) -> DeskError {
        warn!(collection = what, error = %err, "fetch failed");
        if let Ok(mut state) = self.state() {
            state
                .load_errors
                .record(what, Some(LoadError(format!("Failed to load {what}: {err}"))));
        }
        err
    }

    /// Items at or below their minimum, out-of-stock first.
    pub fn low_stock(&self) -> Vec<InventoryItem> {
        let mut low: Vec<InventoryItem> = self
            .items()
            .into_iter()
            .filter(|i| i.stock_status != StockStatus::InStock)
            .collect();
        low.sort_by_key(|i| (i.stock_status != StockStatus::OutOfStock, i.quantity));
        low
    }

    /// Refetch inventory. Stock status is derived again from the fresh
    /// quantities.
    pub async fn refresh_inventory(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_inventory()
            .await
            .map_err(|e| self.fetch_failed(INVENTORY, e))?;
        let Loaded { items, error } = normalize::normalize_inventory(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.items = items;
        state.load_errors.record(INVENTORY, error);
        debug!(count, "inventory refreshed");
        Ok(count)
    }

    pub async fn refresh_audit(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_audit_log()
            .await
            .map_err(|e| self.fetch_failed(AUDIT_LOG, e))?;
        let Loaded { items, error } = normalize::normalize_audit_log(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.audit = items;
        state.load_errors.record(AUDIT_LOG, error);
        Ok(count)
    }
}
