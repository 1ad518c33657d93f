//! Purchase order workflow.
//!
//! Status only moves forward:
//!
//! ```text
//! pending ──approve──▶ approved ──order──▶ ordered ──receive──▶ received
//!    │                    │
//!    └──────cancel────────┴──────────▶ rejected
//! ```
//!
//! Approval happens outside the desk; the desk offers Order, Cancel and
//! Receive. Illegal moves are refused before any request is sent. A status
//! the desk does not recognise has no transitions, so nothing is offered.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{info, warn};

use crate::dispatcher::InFlight;
use crate::error::{DeskError, DeskResult};
use crate::gateway::{Gateway, NewPurchaseOrder, NewPurchaseOrderItem};
use crate::models::{PoStatus, Priority, PurchaseOrder, Supplier};
use crate::normalize::{self, LoadError, LoadErrors, Loaded};
use crate::session::Session;

impl PoStatus {
    pub fn can_transition_to(&self, target: &PoStatus) -> bool {
        matches!(
            (self, target),
            (PoStatus::Pending, PoStatus::Approved | PoStatus::Rejected)
                | (PoStatus::Approved, PoStatus::Ordered | PoStatus::Rejected)
                | (PoStatus::Ordered, PoStatus::Received)
        )
    }

    /// Successor states reachable in one step.
    pub fn valid_transitions(&self) -> Vec<PoStatus> {
        PoStatus::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(target))
            .collect()
    }

    /// Received and rejected orders are closed. An unrecognised status is
    /// not terminal, only frozen until the desk learns it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PoStatus::Rejected | PoStatus::Received)
    }
}

/// A button the desk shows on a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoAction {
    Order,
    Cancel,
    Receive,
}

impl PoAction {
    pub fn target(self) -> PoStatus {
        match self {
            PoAction::Order => PoStatus::Ordered,
            PoAction::Cancel => PoStatus::Rejected,
            PoAction::Receive => PoStatus::Received,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PoAction::Order => "Order",
            PoAction::Cancel => "Cancel",
            PoAction::Receive => "Receive",
        }
    }
}

/// Actions the user may take on a PO in `status`.
pub fn available_actions(status: &PoStatus) -> Vec<PoAction> {
    [PoAction::Order, PoAction::Cancel, PoAction::Receive]
        .into_iter()
        .filter(|a| status.can_transition_to(&a.target()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrderDraft {
    pub supplier: String,
    pub expected_date: Option<String>,
    pub notes: Option<String>,
    pub priority: Priority,
    pub items: Vec<NewPurchaseOrderItem>,
}

impl PurchaseOrderDraft {
    pub fn total_amount(&self) -> f64 {
        self.items
            .iter()
            .map(|i| i.price * f64::from(i.quantity))
            .sum()
    }
}

#[derive(Default)]
struct PoState {
    orders: Vec<PurchaseOrder>,
    suppliers: Vec<Supplier>,
    load_errors: LoadErrors,
}

const PURCHASE_ORDERS: &str = "purchase orders";
const SUPPLIERS: &str = "suppliers";

pub struct PurchaseOrderDesk {
    gateway: Arc<dyn Gateway>,
    state: Mutex<PoState>,
    in_flight: InFlight,
}

impl PurchaseOrderDesk {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(PoState::default()),
            in_flight: InFlight::new(),
        }
    }

    fn state(&self) -> DeskResult<MutexGuard<'_, PoState>> {
        self.state
            .lock()
            .map_err(|e| DeskError::Cache(format!("purchase order lock poisoned: {e}")))
    }

    pub fn purchase_orders(&self) -> Vec<PurchaseOrder> {
        self.state().map(|s| s.orders.clone()).unwrap_or_default()
    }

    pub fn suppliers(&self) -> Vec<Supplier> {
        self.state().map(|s| s.suppliers.clone()).unwrap_or_default()
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

    pub fn find(&self, po_number: &str) -> Option<PurchaseOrder> {
        self.state()
            .ok()?
            .orders
            .iter()
            .find(|po| po.po_number == po_number)
            .cloned()
    }

    pub async fn refresh(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_purchase_orders()
            .await
            .map_err(|e| self.fetch_failed(PURCHASE_ORDERS, e))?;
        let Loaded { items, error } = normalize::normalize_purchase_orders(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.orders = items;
        state.load_errors.record(PURCHASE_ORDERS, error);
        Ok(count)
    }

    pub async fn refresh_suppliers(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_suppliers()
            .await
            .map_err(|e| self.fetch_failed(SUPPLIERS, e))?;
        let Loaded { items, error } = normalize::normalize_suppliers(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.suppliers = items;
        state.load_errors.record(SUPPLIERS, error);
        Ok(count)
    }

    fn validate(&self, draft: &PurchaseOrderDraft) -> DeskResult<()> {
        let supplier = draft.supplier.trim();
        if supplier.is_empty() {
            return Err(DeskError::Validation("Supplier is required".into()));
        }
        let authorized = self
            .state()?
            .suppliers
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(supplier));
        if !authorized {
            return Err(DeskError::Validation(format!(
                "{supplier} is not an authorized supplier"
            )));
        }
        if draft.items.is_empty() {
            return Err(DeskError::Validation("Add at least one item".into()));
        }
        for item in &draft.items {
            if item.name.trim().is_empty() {
                return Err(DeskError::Validation("Every item needs a name".into()));
            }
            if item.quantity == 0 {
                return Err(DeskError::Validation(format!(
                    "Quantity for {} must be at least 1",
                    item.name
                )));
            }
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(DeskError::Validation(format!(
                    "Price for {} cannot be negative",
                    item.name
                )));
            }
        }
        Ok(())
    }

    /// Submit a "Request PO" form. The creator is recorded as the session's
    /// display name.
    pub async fn create_purchase_order(
        &self,
        session: &Session,
        draft: PurchaseOrderDraft,
    ) -> DeskResult<Option<String>> {
        session.guard()?;
        self.validate(&draft)?;
        let _guard = self.in_flight.begin("po:create")?;

        let order = NewPurchaseOrder {
            supplier: draft.supplier.trim().to_string(),
            expected_date: draft.expected_date.clone(),
            notes: draft.notes.clone(),
            priority: draft.priority,
            created_by: session.display_name().to_string(),
            total_amount: draft.total_amount(),
            items: draft.items,
        };
        let created = self.gateway.create_purchase_order(&order).await?;
        let po_number = created
            .get("poNumber")
            .or_else(|| created.get("po_number"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        info!(
            supplier = %order.supplier,
            po_number = po_number.as_deref().unwrap_or("?"),
            "purchase order requested"
        );

        if let Err(err) = self.refresh().await {
            warn!(error = %err, "refetch of purchase orders after create failed");
        }
        Ok(po_number)
    }

    /// Move a PO to `next`. Illegal moves fail without a request; legal ones
    /// are written and the list is refetched.
    pub async fn handle_status_update(
        &self,
        session: &Session,
        po_number: &str,
        next: PoStatus,
    ) -> DeskResult<()> {
        session.guard()?;
        let po = self
            .find(po_number)
            .ok_or_else(|| DeskError::Validation(format!("Unknown purchase order {po_number}")))?;
        if !po.status.can_transition_to(&next) {
            return Err(DeskError::InvalidTransition(format!(
                "Cannot move {po_number} from {} to {}",
                po.status.as_str(),
                next.as_str()
            )));
        }

        let _guard = self.in_flight.begin(format!("po:{po_number}"))?;
        self.gateway
            .update_purchase_order_status(po_number, &next)
            .await
            .map_err(|e| match e {
                DeskError::SessionExpired => e,
                other => DeskError::MutationFailed(other.to_string()),
            })?;
        info!(
            po_number = %po_number,
            from = po.status.as_str(),
            to = next.as_str(),
            "purchase order status updated"
        );

        if let Err(err) = self.refresh().await {
            warn!(error = %err, "refetch of purchase orders after status update failed");
        }
        Ok(())
    }

    pub async fn apply_action(
        &self,
        session: &Session,
        po_number: &str,
        action: PoAction,
    ) -> DeskResult<()> {
        self.handle_status_update(session, po_number, action.target())
            .await
    }
}
