//! Proforma invoices: numbering, conflict retry, local fallback.
//!
//! **Rules:**
//! - Candidate numbers combine a timestamp and a random suffix.
//! - HTTP 409 from the gateway means the number is taken: regenerate and
//!   resubmit, at most [`MAX_CONFLICT_RETRIES`] times.
//! - Any other failure is not retried over the network. The invoice is
//!   written to the local cache and the PDF is still produced with the
//!   local number; the outcome says the remote save did not happen.
//! - Cached invoices go through the same conflict handling when they are
//!   synced. A renumbered invoice is rendered again under its new number.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::dispatcher::InFlight;
use crate::error::{DeskError, DeskResult};
use crate::gateway::Gateway;
use crate::session::Session;

/// Retries after the first attempt (4 attempts in total).
pub const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
}

impl InvoiceLine {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProformaInvoice {
    pub invoice_number: String,
    pub customer_name: String,
    pub ticket_number: Option<String>,
    pub prepared_by: String,
    pub items: Vec<InvoiceLine>,
    pub notes: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub total: f64,
}

/// What the user filled in on the proforma form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvoiceDraft {
    pub customer_name: String,
    pub ticket_number: Option<String>,
    pub items: Vec<InvoiceLine>,
    pub notes: Option<String>,
}

impl InvoiceDraft {
    fn validate(&self) -> DeskResult<()> {
        if self.customer_name.trim().is_empty() {
            return Err(DeskError::Validation("Customer name is required".into()));
        }
        if self.items.is_empty() {
            return Err(DeskError::Validation("Add at least one item".into()));
        }
        for line in &self.items {
            if line.description.trim().is_empty() {
                return Err(DeskError::Validation("Every item needs a description".into()));
            }
            if line.quantity == 0 {
                return Err(DeskError::Validation(format!(
                    "Quantity for {} must be at least 1",
                    line.description
                )));
            }
            if !line.unit_price.is_finite() || line.unit_price < 0.0 {
                return Err(DeskError::Validation(format!(
                    "Price for {} must be zero or more",
                    line.description
                )));
            }
        }
        Ok(())
    }
}

/// PDF/print renderer collaborator. Returns where the artifact was written.
pub trait InvoiceRenderer: Send + Sync {
    fn render(&self, invoice: &ProformaInvoice) -> Result<PathBuf, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceOutcome {
    pub invoice: ProformaInvoice,
    pub artifact: PathBuf,
    pub saved_remotely: bool,
    /// Why the remote save failed, when it did.
    pub remote_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheSyncReport {
    pub uploaded: usize,
    pub remaining: usize,
    /// `(cached number, number the gateway accepted)` for invoices that hit
    /// a conflict during upload.
    pub renumbered: Vec<(String, String)>,
}

/// `PF-YYYYMMDD-HHMMSS-XXXX`, the suffix being four random hex digits.
pub fn generate_invoice_number(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!("PF-{}-{suffix:04X}", now.format("%Y%m%d-%H%M%S"))
}

/// A fresh candidate that was not tried before in this save.
fn next_candidate(tried: &HashSet<String>) -> String {
    loop {
        let candidate = generate_invoice_number(Utc::now());
        if !tried.contains(&candidate) {
            return candidate;
        }
    }
}

pub struct InvoiceDesk {
    gateway: Arc<dyn Gateway>,
    cache: Arc<DbState>,
    renderer: Arc<dyn InvoiceRenderer>,
    in_flight: InFlight,
}

impl InvoiceDesk {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        cache: Arc<DbState>,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> Self {
        Self {
            gateway,
            cache,
            renderer,
            in_flight: InFlight::new(),
        }
    }

    fn cache_locally(&self, invoice: &ProformaInvoice, error: &str) -> DeskResult<()> {
        let payload = serde_json::to_string(invoice)
            .map_err(|e| DeskError::Cache(format!("serialize invoice: {e}")))?;
        let conn = self
            .cache
            .conn
            .lock()
            .map_err(|e| DeskError::Cache(e.to_string()))?;
        db::cache_invoice(&conn, &invoice.invoice_number, &payload, error).map_err(DeskError::Cache)
    }

    /// Post `invoice`, regenerating its number on each 409. Gives up with
    /// the last `Conflict` after [`MAX_CONFLICT_RETRIES`] retries; any other
    /// error is returned at once.
    async fn submit(&self, invoice: &mut ProformaInvoice) -> DeskResult<()> {
        let mut tried = HashSet::new();
        let mut retries = 0usize;
        loop {
            tried.insert(invoice.invoice_number.clone());
            match self.gateway.save_proforma_invoice(invoice).await {
                Ok(_) => return Ok(()),
                Err(DeskError::Conflict { body }) => {
                    if retries == MAX_CONFLICT_RETRIES {
                        warn!(
                            attempts = retries + 1,
                            "proforma number still conflicting, giving up"
                        );
                        return Err(DeskError::Conflict { body });
                    }
                    retries += 1;
                    let previous = std::mem::replace(
                        &mut invoice.invoice_number,
                        next_candidate(&tried),
                    );
                    warn!(
                        previous = %previous,
                        next = %invoice.invoice_number,
                        retry = retries,
                        "proforma number conflict, regenerating"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Save the invoice remotely (with conflict retry) and render it.
    pub async fn save_and_render(
        &self,
        session: &Session,
        draft: InvoiceDraft,
    ) -> DeskResult<InvoiceOutcome> {
        session.guard()?;
        draft.validate()?;
        let _guard = self.in_flight.begin("invoice:save")?;

        let total = draft.items.iter().map(InvoiceLine::subtotal).sum();
        let mut invoice = ProformaInvoice {
            invoice_number: generate_invoice_number(Utc::now()),
            customer_name: draft.customer_name.trim().to_string(),
            ticket_number: draft.ticket_number,
            prepared_by: session.display_name().to_string(),
            items: draft.items,
            notes: draft.notes,
            issued_at: Utc::now(),
            total,
        };

        let remote_error = match self.submit(&mut invoice).await {
            Ok(()) => None,
            Err(err) if err.is_conflict() => return Err(err),
            Err(err) => {
                warn!(
                    invoice_number = %invoice.invoice_number,
                    error = %err,
                    "remote invoice save failed, keeping a local copy"
                );
                self.cache_locally(&invoice, &err.to_string())?;
                Some(err.to_string())
            }
        };

        let artifact = self
            .renderer
            .render(&invoice)
            .map_err(DeskError::Render)?;
        info!(
            invoice_number = %invoice.invoice_number,
            saved_remotely = remote_error.is_none(),
            "proforma invoice produced"
        );

        Ok(InvoiceOutcome {
            invoice,
            artifact,
            saved_remotely: remote_error.is_none(),
            remote_error,
        })
    }

    pub fn cached_invoices(&self) -> DeskResult<Vec<ProformaInvoice>> {
        let conn = self
            .cache
            .conn
            .lock()
            .map_err(|e| DeskError::Cache(e.to_string()))?;
        let rows = db::list_cached_invoices(&conn).map_err(DeskError::Cache)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match serde_json::from_str(&row.payload) {
                Ok(invoice) => Some(invoice),
                Err(e) => {
                    warn!(invoice_number = %row.invoice_number, error = %e, "unreadable cached invoice");
                    None
                }
            })
            .collect())
    }

    /// Re-upload invoices saved locally. Successful uploads leave the cache;
    /// failures stay for the next attempt. A cached number that collides is
    /// regenerated like a fresh save, and the PDF is produced again.
    pub async fn sync_cached_invoices(&self) -> DeskResult<CacheSyncReport> {
        let _guard = self.in_flight.begin("invoice:sync")?;
        let pending = self.cached_invoices()?;
        let mut report = CacheSyncReport::default();

        for mut invoice in pending {
            let cached_number = invoice.invoice_number.clone();
            let result = self.submit(&mut invoice).await;
            {
                let conn = self
                    .cache
                    .conn
                    .lock()
                    .map_err(|e| DeskError::Cache(e.to_string()))?;
                match &result {
                    Ok(()) => {
                        db::delete_cached_invoice(&conn, &cached_number)
                            .map_err(DeskError::Cache)?;
                        report.uploaded += 1;
                    }
                    Err(err) => {
                        db::record_upload_failure(&conn, &cached_number, &err.to_string())
                            .map_err(DeskError::Cache)?;
                        report.remaining += 1;
                    }
                }
            }

            if result.is_ok() && invoice.invoice_number != cached_number {
                info!(
                    previous = %cached_number,
                    invoice_number = %invoice.invoice_number,
                    "cached invoice uploaded under a new number"
                );
                if let Err(e) = self.renderer.render(&invoice) {
                    warn!(invoice_number = %invoice.invoice_number, error = %e, "re-render failed");
                }
                report
                    .renumbered
                    .push((cached_number, invoice.invoice_number.clone()));
            }
        }

        info!(
            uploaded = report.uploaded,
            remaining = report.remaining,
            renumbered = report.renumbered.len(),
            "cached invoice sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_session, MockGateway};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRenderer {
        rendered: Mutex<Vec<String>>,
    }

    impl InvoiceRenderer for RecordingRenderer {
        fn render(&self, invoice: &ProformaInvoice) -> Result<PathBuf, String> {
            self.rendered
                .lock()
                .unwrap()
                .push(invoice.invoice_number.clone());
            Ok(PathBuf::from(format!("/tmp/{}.pdf", invoice.invoice_number)))
        }
    }

    fn draft() -> InvoiceDraft {
        InvoiceDraft {
            customer_name: "Dana Cruz".into(),
            ticket_number: Some("T-100".into()),
            items: vec![
                InvoiceLine {
                    description: "Brake pads".into(),
                    quantity: 2,
                    unit_price: 25.0,
                },
                InvoiceLine {
                    description: "Labour".into(),
                    quantity: 1,
                    unit_price: 40.0,
                },
            ],
            notes: None,
        }
    }

    fn desk(gw: Arc<MockGateway>) -> (InvoiceDesk, Arc<RecordingRenderer>, Arc<DbState>) {
        let renderer = Arc::new(RecordingRenderer::default());
        let cache = Arc::new(db::init_in_memory().unwrap());
        let desk = InvoiceDesk::new(gw, cache.clone(), renderer.clone());
        (desk, renderer, cache)
    }

    fn conflict() -> DeskResult<serde_json::Value> {
        Err(DeskError::Conflict {
            body: r#"{"message":"invoice number exists"}"#.into(),
        })
    }

    #[test]
    fn invoice_number_format() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:15:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let n = generate_invoice_number(now);
        assert!(n.starts_with("PF-20240501-101530-"), "{n}");
        assert_eq!(n.len(), "PF-20240501-101530-".len() + 4);
    }

    #[tokio::test]
    async fn saves_remotely_and_renders() {
        let gw = Arc::new(MockGateway::new());
        let (desk, renderer, _) = desk(gw.clone());
        let outcome = desk.save_and_render(&test_session(), draft()).await.unwrap();
        assert!(outcome.saved_remotely);
        assert_eq!(outcome.invoice.total, 90.0);
        assert_eq!(outcome.invoice.prepared_by, "Sam Rivera");
        assert_eq!(gw.calls_starting_with("save_proforma_invoice"), 1);
        assert_eq!(renderer.rendered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflict_retry_is_bounded_with_distinct_numbers() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            for _ in 0..4 {
                s.proforma_responses.push_back(conflict());
            }
        });
        let (desk, renderer, cache) = desk(gw.clone());

        let err = desk
            .save_and_render(&test_session(), draft())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("invoice number exists"));

        let numbers = gw.with(|s| s.proforma_numbers.clone());
        assert_eq!(numbers.len(), MAX_CONFLICT_RETRIES + 1);
        let distinct: HashSet<_> = numbers.iter().collect();
        assert_eq!(distinct.len(), numbers.len());

        assert!(renderer.rendered.lock().unwrap().is_empty());
        let conn = cache.conn.lock().unwrap();
        assert!(db::list_cached_invoices(&conn).unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflict_then_success_uses_the_regenerated_number() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            s.proforma_responses.push_back(conflict());
            s.proforma_responses.push_back(Ok(json!({})));
        });
        let (desk, _, _) = desk(gw.clone());
        let outcome = desk.save_and_render(&test_session(), draft()).await.unwrap();
        let numbers = gw.with(|s| s.proforma_numbers.clone());
        assert_eq!(numbers.len(), 2);
        assert_eq!(outcome.invoice.invoice_number, numbers[1]);
        assert!(outcome.saved_remotely);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_local_cache() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            s.proforma_responses
                .push_back(Err(DeskError::transport("Connection timed out")))
        });
        let (desk, renderer, _) = desk(gw.clone());

        let outcome = desk.save_and_render(&test_session(), draft()).await.unwrap();
        assert!(!outcome.saved_remotely);
        assert_eq!(outcome.remote_error.as_deref(), Some("Connection timed out"));
        assert_eq!(gw.calls_starting_with("save_proforma_invoice"), 1);
        assert_eq!(
            renderer.rendered.lock().unwrap().as_slice(),
            &[outcome.invoice.invoice_number.clone()]
        );

        let cached = desk.cached_invoices().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].invoice_number, outcome.invoice.invoice_number);

        let report = desk.sync_cached_invoices().await.unwrap();
        assert_eq!(
            report,
            CacheSyncReport {
                uploaded: 1,
                remaining: 0,
                renumbered: Vec::new(),
            }
        );
        assert!(desk.cached_invoices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn colliding_cached_invoice_is_renumbered_on_sync() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            s.proforma_responses
                .push_back(Err(DeskError::transport("Connection timed out")));
            s.proforma_responses.push_back(conflict());
            s.proforma_responses.push_back(Ok(json!({})));
        });
        let (desk, renderer, _) = desk(gw.clone());
        let outcome = desk.save_and_render(&test_session(), draft()).await.unwrap();
        let cached_number = outcome.invoice.invoice_number;

        let report = desk.sync_cached_invoices().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.renumbered.len(), 1);
        let (previous, accepted) = report.renumbered[0].clone();
        assert_eq!(previous, cached_number);
        assert_ne!(accepted, cached_number);
        assert!(desk.cached_invoices().unwrap().is_empty());

        let numbers = gw.with(|s| s.proforma_numbers.clone());
        assert_eq!(numbers, vec![cached_number.clone(), cached_number, accepted.clone()]);
        assert_eq!(renderer.rendered.lock().unwrap().last(), Some(&accepted));
    }

    #[tokio::test]
    async fn exhausted_conflicts_keep_the_invoice_cached() {
        let gw = Arc::new(MockGateway::new());
        gw.with(|s| {
            s.proforma_responses
                .push_back(Err(DeskError::transport("Connection timed out")));
            for _ in 0..=MAX_CONFLICT_RETRIES {
                s.proforma_responses.push_back(conflict());
            }
        });
        let (desk, _, cache) = desk(gw.clone());
        let outcome = desk.save_and_render(&test_session(), draft()).await.unwrap();

        let report = desk.sync_cached_invoices().await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.remaining, 1);
        assert!(report.renumbered.is_empty());

        let conn = cache.conn.lock().unwrap();
        let rows = db::list_cached_invoices(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_number, outcome.invoice.invoice_number);
        assert_eq!(rows[0].upload_attempts, 2);
    }

    #[tokio::test]
    async fn validation_happens_before_any_request() {
        let gw = Arc::new(MockGateway::new());
        let (desk, _, _) = desk(gw.clone());
        let mut bad = draft();
        bad.customer_name = "  ".into();
        let err = desk.save_and_render(&test_session(), bad).await.unwrap_err();
        assert_eq!(err, DeskError::Validation("Customer name is required".into()));

        let mut bad = draft();
        bad.items.clear();
        assert!(matches!(
            desk.save_and_render(&test_session(), bad).await,
            Err(DeskError::Validation(_))
        ));
        assert!(gw.calls().is_empty());
    }
}
