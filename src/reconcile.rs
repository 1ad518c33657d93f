//! Order reconciliation engine.
//!
//! Keeps a ticket, its ordered parts and its outsourced parts consistent
//! across independent fetch/update cycles.
//!
//! **Rules:**
//! - Part status updates are pessimistic: local state changes only after
//!   the gateway confirms.
//! - A ticket completes only when every ordered part is `given`; the
//!   completion write is issued after the part write has settled.
//! - Active and history membership always comes from the gateway. After a
//!   completion both collections are refetched in full.
//! - Outsourcing batches are reported as one result even though each part
//!   is a separate request; parts the gateway already stored are not
//!   rolled back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::dispatcher::InFlight;
use crate::error::{DeskError, DeskResult};
use crate::gateway::{Gateway, NewOrderedPart, OutsourceRequest};
use crate::models::{CatalogPart, OutsourcedPart, PartStatus, Ticket, TicketStatus};
use crate::normalize::{self, LoadError, LoadErrors, Loaded};

/// Result of a successful part status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartStatusOutcome {
    /// The part changed; the ticket still has pending parts.
    Updated,
    /// The last pending part was handed over and the ticket is completed.
    TicketCompleted,
    /// The part changed but the ticket completion write failed. The part
    /// update is kept; the ticket stays active so the user can retry.
    CompletionFailed { message: String },
}

/// One part entered on the outsourcing form.
#[derive(Debug, Clone, PartialEq)]
pub struct OutsourceDraft {
    pub name: String,
    pub category: String,
    pub quantity: u32,
    pub notes: Option<String>,
}

#[derive(Default)]
struct BoardState {
    active: Vec<Ticket>,
    history: Vec<Ticket>,
    catalog: Vec<CatalogPart>,
    outsourced: HashMap<String, Vec<OutsourcedPart>>,
    load_errors: LoadErrors,
}

const ORDERS: &str = "orders";
const ORDER_HISTORY: &str = "order history";
const PARTS: &str = "parts";
const OUTSOURCED: &str = "outsourced parts";

pub struct OrderBoard {
    gateway: Arc<dyn Gateway>,
    state: Mutex<BoardState>,
    in_flight: InFlight,
}

impl OrderBoard {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            state: Mutex::new(BoardState::default()),
            in_flight: InFlight::new(),
        }
    }

    fn state(&self) -> DeskResult<MutexGuard<'_, BoardState>> {
        self.state
            .lock()
            .map_err(|e| DeskError::Cache(format!("order board lock poisoned: {e}")))
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn active_tickets(&self) -> Vec<Ticket> {
        self.state().map(|s| s.active.clone()).unwrap_or_default()
    }

    pub fn history_tickets(&self) -> Vec<Ticket> {
        self.state().map(|s| s.history.clone()).unwrap_or_default()
    }

    pub fn catalog(&self) -> Vec<CatalogPart> {
        self.state().map(|s| s.catalog.clone()).unwrap_or_default()
    }

    pub fn outsourced_for(&self, ticket_number: &str) -> Vec<OutsourcedPart> {
        self.state()
            .ok()
            .and_then(|s| s.outsourced.get(ticket_number).cloned())
            .unwrap_or_default()
    }

    /// Banner text for the board: the first collection whose last load
    /// failed or was malformed.
    pub fn load_error(&self) -> Option<LoadError> {
        self.state().ok().and_then(|s| s.load_errors.first().cloned())
    }

    pub fn load_errors(&self) -> LoadErrors {
        self.state().map(|s| s.load_errors.clone()).unwrap_or_default()
    }

    pub fn find_ticket(&self, ticket_number: &str) -> Option<Ticket> {
        let state = self.state().ok()?;
        state
            .active
            .iter()
            .chain(state.history.iter())
            .find(|t| t.ticket_number == ticket_number)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Fetches (last write wins)
    // -----------------------------------------------------------------------

    fn transport_failure(&self, what: &'static str, err: DeskError) -> DeskError {
        warn!(collection = what, error = %err, "fetch failed");
        if let Ok(mut state) = self.state() {
            state
                .load_errors
                .record(what, Some(LoadError(format!("Failed to load {what}: {err}"))));
        }
        err
    }

    /// Replace the active collection with tickets that still have a pending
    /// part, or no parts at all.
    pub async fn refresh_active(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_active_orders()
            .await
            .map_err(|e| self.transport_failure(ORDERS, e))?;
        let Loaded { items, error } = normalize::normalize_tickets(&payload);
        let active: Vec<Ticket> = items.into_iter().filter(Ticket::is_active).collect();
        let count = active.len();
        let mut state = self.state()?;
        state.active = active;
        state.load_errors.record(ORDERS, error);
        debug!(count, "active orders refreshed");
        Ok(count)
    }

    pub async fn refresh_history(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_order_history()
            .await
            .map_err(|e| self.transport_failure(ORDER_HISTORY, e))?;
        let Loaded { items, error } = normalize::normalize_tickets(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.history = items;
        state.load_errors.record(ORDER_HISTORY, error);
        debug!(count, "order history refreshed");
        Ok(count)
    }

    pub async fn refresh_catalog(&self) -> DeskResult<usize> {
        let payload = self
            .gateway
            .fetch_catalog_parts()
            .await
            .map_err(|e| self.transport_failure(PARTS, e))?;
        let Loaded { items, error } = normalize::normalize_catalog(&payload);
        let count = items.len();
        let mut state = self.state()?;
        state.catalog = items;
        state.load_errors.record(PARTS, error);
        Ok(count)
    }

    /// Refetch outsourced parts for a batch of tickets. Each requested ticket
    /// gets its list replaced, empty when the gateway returned nothing for it.
    pub async fn refresh_outsourced(&self, ticket_numbers: &[String]) -> DeskResult<usize> {
        if ticket_numbers.is_empty() {
            return Ok(0);
        }
        let payload = self
            .gateway
            .fetch_outsourced_parts(ticket_numbers)
            .await
            .map_err(|e| self.transport_failure(OUTSOURCED, e))?;
        let Loaded { items, error } = normalize::normalize_outsourced_parts(&payload);
        let count = items.len();

        let mut grouped: HashMap<String, Vec<OutsourcedPart>> = ticket_numbers
            .iter()
            .map(|t| (t.clone(), Vec::new()))
            .collect();
        for part in items {
            if let Some(list) = grouped.get_mut(&part.ticket_number) {
                list.push(part);
            }
        }

        let mut state = self.state()?;
        state.outsourced.extend(grouped);
        state.load_errors.record(OUTSOURCED, error);
        Ok(count)
    }

    /// Active orders, history and the outsourced parts of every loaded
    /// ticket. Every fetch is attempted; the first failure is returned
    /// afterwards.
    pub async fn refresh_all(&self) -> DeskResult<()> {
        let active = self.refresh_active().await;
        let history = self.refresh_history().await;
        let numbers: Vec<String> = {
            let state = self.state()?;
            state
                .active
                .iter()
                .chain(state.history.iter())
                .map(|t| t.ticket_number.clone())
                .collect()
        };
        let outsourced = self.refresh_outsourced(&numbers).await;
        active?;
        history?;
        outsourced?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Part status
    // -----------------------------------------------------------------------

    /// Change one ordered part's status and complete the ticket when every
    /// part has been given.
    pub async fn update_part_status(
        &self,
        ticket_number: &str,
        part_id: i64,
        new_status: PartStatus,
    ) -> DeskResult<PartStatusOutcome> {
        let ticket = self
            .find_ticket(ticket_number)
            .ok_or_else(|| DeskError::Validation(format!("Unknown ticket {ticket_number}")))?;
        if ticket.status.is_completed() {
            return Err(DeskError::InvalidTransition(format!(
                "Ticket {ticket_number} is completed; its parts can no longer change"
            )));
        }
        let part = ticket.part(part_id).ok_or_else(|| {
            DeskError::Validation(format!("Part {part_id} is not on ticket {ticket_number}"))
        })?;
        if part.status == PartStatus::Given && new_status == PartStatus::Pending {
            return Err(DeskError::InvalidTransition(format!(
                "{} was already handed over",
                part.name
            )));
        }

        let _guard = self.in_flight.begin(format!("ticket:{ticket_number}"))?;

        if part.status != new_status {
            self.gateway
                .update_part_status(part_id, new_status)
                .await
                .map_err(|e| match e {
                    DeskError::SessionExpired => e,
                    other => DeskError::MutationFailed(other.to_string()),
                })?;
            info!(
                ticket_number = %ticket_number,
                part_id,
                status = new_status.as_str(),
                "part status updated"
            );
        }

        // Apply to the single part and re-read the ticket as it now stands.
        let updated = {
            let mut state = self.state()?;
            let Some(local) = state
                .active
                .iter_mut()
                .find(|t| t.ticket_number == ticket_number)
            else {
                return Ok(PartStatusOutcome::Updated);
            };
            if let Some(p) = local.ordered_parts.iter_mut().find(|p| p.id == part_id) {
                p.status = new_status;
            }
            local.clone()
        };

        if !updated.all_parts_given() || updated.status.is_completed() {
            return Ok(PartStatusOutcome::Updated);
        }

        let completed_at = Utc::now();
        if let Err(err) = self
            .gateway
            .update_ticket_status(updated.ticket_id, &TicketStatus::Completed, Some(completed_at))
            .await
        {
            warn!(
                ticket_number = %ticket_number,
                error = %err,
                "all parts given but ticket completion failed"
            );
            return Ok(PartStatusOutcome::CompletionFailed {
                message: format!("Parts updated, but the ticket could not be completed: {err}"),
            });
        }

        {
            let mut state = self.state()?;
            if let Some(local) = state
                .active
                .iter_mut()
                .find(|t| t.ticket_number == ticket_number)
            {
                local.status = TicketStatus::Completed;
                local.completion_date = Some(completed_at);
            }
            // No longer active by the partition rule; history takes it from
            // the refetch below.
            state.active.retain(|t| t.ticket_number != ticket_number);
        }
        info!(ticket_number = %ticket_number, "ticket completed");

        if let Err(err) = self.refresh_active().await {
            warn!(error = %err, "refetch of active orders after completion failed");
        }
        if let Err(err) = self.refresh_history().await {
            warn!(error = %err, "refetch of order history after completion failed");
        }

        Ok(PartStatusOutcome::TicketCompleted)
    }

    // -----------------------------------------------------------------------
    // Ordering and outsourcing
    // -----------------------------------------------------------------------

    /// Request catalog parts against an open ticket.
    pub async fn order_parts(
        &self,
        ticket_number: &str,
        items: &[NewOrderedPart],
    ) -> DeskResult<usize> {
        if items.is_empty() {
            return Err(DeskError::Validation("Select at least one part".into()));
        }
        let ticket = self
            .find_ticket(ticket_number)
            .ok_or_else(|| DeskError::Validation(format!("Unknown ticket {ticket_number}")))?;
        if ticket.status.is_completed() {
            return Err(DeskError::InvalidTransition(format!(
                "Ticket {ticket_number} is completed"
            )));
        }

        let catalog = self.catalog();
        for item in items {
            if item.quantity == 0 {
                return Err(DeskError::Validation("Quantity must be at least 1".into()));
            }
            if catalog.is_empty() {
                continue;
            }
            let part = catalog
                .iter()
                .find(|p| p.id == item.item_id)
                .ok_or_else(|| DeskError::Validation(format!("Unknown part {}", item.item_id)))?;
            if i64::from(item.quantity) > part.stock {
                return Err(DeskError::Validation(format!(
                    "Only {} of {} in stock",
                    part.stock.max(0),
                    part.name
                )));
            }
        }

        let _guard = self.in_flight.begin(format!("ticket:{ticket_number}"))?;
        self.gateway
            .create_ordered_parts(ticket_number, items)
            .await
            .map_err(|e| match e {
                DeskError::SessionExpired => e,
                other => DeskError::MutationFailed(other.to_string()),
            })?;
        info!(ticket_number = %ticket_number, count = items.len(), "parts ordered");

        if let Err(err) = self.refresh_active().await {
            warn!(error = %err, "refetch of active orders after ordering failed");
        }
        if !catalog.is_empty() {
            if let Err(err) = self.refresh_catalog().await {
                warn!(error = %err, "refetch of parts catalog after ordering failed");
            }
        }
        Ok(items.len())
    }

    /// Submit several outsourced parts for one ticket. Each part is its own
    /// request; all are issued at once and the batch succeeds only when all
    /// of them do. The ticket's outsourced list is always refetched.
    pub async fn submit_outsourced_batch(
        &self,
        ticket_number: &str,
        parts: &[OutsourceDraft],
    ) -> DeskResult<usize> {
        if parts.is_empty() {
            return Err(DeskError::Validation("Add at least one part to outsource".into()));
        }
        for part in parts {
            if part.name.trim().is_empty() {
                return Err(DeskError::Validation("Every part needs a name".into()));
            }
            if part.quantity == 0 {
                return Err(DeskError::Validation(format!(
                    "Quantity for {} must be at least 1",
                    part.name
                )));
            }
        }

        let _guard = self.in_flight.begin(format!("outsource:{ticket_number}"))?;
        let requests: Vec<OutsourceRequest> = parts
            .iter()
            .map(|p| OutsourceRequest {
                ticket_number: ticket_number.to_string(),
                name: p.name.trim().to_string(),
                category: p.category.trim().to_string(),
                quantity: p.quantity,
                notes: p.notes.clone(),
            })
            .collect();

        let results = join_all(
            requests
                .iter()
                .map(|r| self.gateway.create_outsourced_part(r)),
        )
        .await;
        let total = results.len();
        let failed = results.iter().filter(|r| r.is_err()).count();

        if let Err(err) = self.refresh_outsourced(&[ticket_number.to_string()]).await {
            warn!(error = %err, "refetch of outsourced parts failed");
        }

        if failed > 0 {
            warn!(
                ticket_number = %ticket_number,
                failed,
                total,
                "outsourcing batch partially failed; stored parts are not rolled back"
            );
            return Err(DeskError::PartialBatchFailure { failed, total });
        }
        info!(ticket_number = %ticket_number, total, "outsourcing batch submitted");
        Ok(total)
    }
}
