//! Stock Desk - back-office core for workshop parts and purchasing.
//!
//! Keeps tickets, their ordered and outsourced parts, purchase orders,
//! inventory and proforma invoices consistent with the remote gateway.
//! The desktop shell drives everything through [`StockDesk`] and turns
//! results into notifications with [`dispatcher::notify`].

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod invoice;
pub mod models;
pub mod normalize;
pub mod projection;
pub mod purchase_orders;
pub mod reconcile;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::DeskConfig;
pub use dispatcher::{notify, notify_result, Notification};
pub use error::{DeskError, DeskResult};
pub use gateway::Gateway;
pub use inventory::StockBook;
pub use invoice::{InvoiceDesk, InvoiceRenderer};
pub use purchase_orders::PurchaseOrderDesk;
pub use reconcile::{OrderBoard, PartStatusOutcome};
pub use session::Session;

// ---------------------------------------------------------------------------
// JSON field helpers
// ---------------------------------------------------------------------------

/// First non-blank string under any of `keys`. Numbers are stringified so
/// identifiers sent as either type read the same.
pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match v.get(*key) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

pub(crate) fn value_i64(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        let parsed = match v.get(*key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install console + daily rolling file logging under `log_dir`.
///
/// The returned guard flushes the file writer when dropped; the shell keeps
/// it for the lifetime of the process.
pub fn init_logging(log_dir: &Path) -> Result<WorkerGuard, String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stock_desk=debug"));

    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {e}", log_dir.display()))?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("Failed to install log subscriber: {e}"))?;

    info!("Starting Stock Desk v{}", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Everything the shell needs for one signed-in user.
pub struct StockDesk {
    session: Session,
    pub orders: OrderBoard,
    pub purchase_orders: PurchaseOrderDesk,
    pub stock: StockBook,
    pub invoices: InvoiceDesk,
    cache: Arc<db::DbState>,
}

impl StockDesk {
    /// Open the desk against the configured gateway. A cache that cannot be
    /// opened on disk is replaced by an in-memory one so the desk still
    /// starts; invoices saved there do not survive a restart.
    pub fn open(
        config: &DeskConfig,
        session: Session,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> DeskResult<Self> {
        session.guard()?;
        let cache = match db::init(&config.cache_dir) {
            Ok(db) => db,
            Err(e) => {
                warn!(error = %e, "falling back to in-memory cache");
                db::init_in_memory().map_err(DeskError::Cache)?
            }
        };
        let gateway = api::HttpGateway::new(config, session.clone())?;
        Ok(Self::with_gateway(
            Arc::new(gateway),
            Arc::new(cache),
            session,
            renderer,
        ))
    }

    pub fn with_gateway(
        gateway: Arc<dyn Gateway>,
        cache: Arc<db::DbState>,
        session: Session,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> Self {
        Self {
            orders: OrderBoard::new(gateway.clone()),
            purchase_orders: PurchaseOrderDesk::new(gateway.clone()),
            stock: StockBook::new(gateway.clone()),
            invoices: InvoiceDesk::new(gateway, cache.clone(), renderer),
            session,
            cache,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache_health(&self) -> DeskResult<Value> {
        diagnostics::get_cache_health(&self.cache).map_err(DeskError::Cache)
    }

    /// Initial load after sign-in. Every fetch of every desk is attempted and
    /// each collection keeps its own load error. The first failure is
    /// returned at the end.
    pub async fn refresh_all(&self) -> DeskResult<()> {
        let results = [
            self.orders.refresh_all().await,
            self.orders.refresh_catalog().await.map(|_| ()),
            self.purchase_orders.refresh().await.map(|_| ()),
            self.purchase_orders.refresh_suppliers().await.map(|_| ()),
            self.stock.refresh_inventory().await.map(|_| ()),
            self.stock.refresh_audit().await.map(|_| ()),
        ];
        results.into_iter().collect::<DeskResult<Vec<()>>>().map(|_| ())
    }

    /// Sign out: wipe the persisted session.
    pub fn sign_out(self) -> DeskResult<()> {
        storage::clear_session().map_err(DeskError::Cache)?;
        info!(user = %self.session.profile().username, "signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::ProformaInvoice;
    use crate::testing::{test_session, ticket_json, MockGateway};
    use serde_json::json;
    use std::path::PathBuf;

    struct NullRenderer;

    impl InvoiceRenderer for NullRenderer {
        fn render(&self, invoice: &ProformaInvoice) -> Result<PathBuf, String> {
            Ok(PathBuf::from(format!("{}.pdf", invoice.invoice_number)))
        }
    }

    #[test]
    fn value_helpers_coerce_numeric_strings() {
        let v = json!({ "a": "12.50", "b": 7, "c": " 42 ", "d": "", "e": 3.9, "f": "x" });
        assert_eq!(value_i64(&v, &["c"]), Some(42));
        assert_eq!(value_i64(&v, &["e"]), Some(3));
        assert_eq!(value_i64(&v, &["f"]), None);
        assert_eq!(value_str(&v, &["d", "b"]), Some("7".into()));
        assert_eq!(value_str(&v, &["missing"]), None);
    }

    #[tokio::test]
    async fn refresh_all_loads_every_collection() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            s.tickets = vec![ticket_json(1, "T-1", "in progress", &[(10, "pending")])];
            s.suppliers = vec![json!({ "id": 1, "name": "Acme Parts" })];
            s.inventory = json!([{ "id": 1, "name": "Fuse", "quantity": 1, "minStock": 3 }]);
        });
        let cache = Arc::new(db::init_in_memory().unwrap());
        let desk = StockDesk::with_gateway(gw.clone(), cache, test_session(), Arc::new(NullRenderer));

        desk.refresh_all().await.unwrap();
        assert_eq!(desk.orders.active_tickets().len(), 1);
        assert_eq!(desk.purchase_orders.suppliers().len(), 1);
        assert_eq!(desk.stock.items().len(), 1);
        assert_eq!(desk.cache_health().unwrap()["pendingInvoices"], 0);
        assert_eq!(desk.session().display_name(), "Sam Rivera");
    }

    #[tokio::test]
    async fn refresh_all_reports_failure_but_tries_everything() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| s.fail_fetches = true);
        let cache = Arc::new(db::init_in_memory().unwrap());
        let desk = StockDesk::with_gateway(gw.clone(), cache, test_session(), Arc::new(NullRenderer));

        assert!(desk.refresh_all().await.is_err());
        assert_eq!(gw.calls_starting_with("fetch_order_history"), 1);
        assert_eq!(gw.calls_starting_with("fetch_inventory"), 1);
        assert_eq!(gw.calls_starting_with("fetch_audit_log"), 1);
        assert!(desk.orders.load_errors().get("order history").is_some());
        assert!(desk.stock.load_errors().get("audit log").is_some());
    }
}
