//! Typed in-memory records produced by the normalizer.
//!
//! Status strings coming from the gateway are modelled as closed enums
//! where the workflow depends on them (part status, PO status) and as
//! tagged variants with a fallback where the backend is free to invent new
//! values (ticket status, outsourced part status).

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum TicketStatus {
    Pending,
    Assigned,
    InProgress,
    Ready,
    ReadyForInspection,
    AwaitingBill,
    Completed,
    /// Any backend status this build does not know yet. Rendered verbatim.
    Other(String),
}

impl TicketStatus {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match lower.as_str() {
            "pending" => TicketStatus::Pending,
            "assigned" => TicketStatus::Assigned,
            "in progress" => TicketStatus::InProgress,
            "ready" => TicketStatus::Ready,
            "ready for inspection" => TicketStatus::ReadyForInspection,
            "awaiting bill" => TicketStatus::AwaitingBill,
            "completed" => TicketStatus::Completed,
            _ => TicketStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Assigned => "assigned",
            TicketStatus::InProgress => "in progress",
            TicketStatus::Ready => "ready",
            TicketStatus::ReadyForInspection => "ready for inspection",
            TicketStatus::AwaitingBill => "awaiting bill",
            TicketStatus::Completed => "completed",
            TicketStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TicketStatus::Completed)
    }
}

impl From<TicketStatus> for String {
    fn from(value: TicketStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Ordered part status. Only ever moves pending -> given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Pending,
    Given,
}

impl PartStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PartStatus::Pending),
            "given" => Some(PartStatus::Given),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartStatus::Pending => "pending",
            PartStatus::Given => "given",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" | "urgent" => Priority::High,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    Sos,
    Regular,
    Appointment,
    Service,
}

impl TicketType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sos" => TicketType::Sos,
            "appointment" => TicketType::Appointment,
            "service" => TicketType::Service,
            _ => TicketType::Regular,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum OutsourceStatus {
    Requested,
    Ordered,
    Received,
    Cancelled,
    Other(String),
}

impl OutsourceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "requested" => OutsourceStatus::Requested,
            "ordered" => OutsourceStatus::Ordered,
            "received" => OutsourceStatus::Received,
            "cancelled" | "canceled" => OutsourceStatus::Cancelled,
            _ => OutsourceStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OutsourceStatus::Requested => "requested",
            OutsourceStatus::Ordered => "ordered",
            OutsourceStatus::Received => "received",
            OutsourceStatus::Cancelled => "cancelled",
            OutsourceStatus::Other(s) => s.as_str(),
        }
    }
}

impl From<OutsourceStatus> for String {
    fn from(value: OutsourceStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Purchase order workflow state. Transition rules live in
/// `purchase_orders`. A status the desk does not know is kept verbatim in
/// `Other` and has no transitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum PoStatus {
    Pending,
    Approved,
    Rejected,
    Ordered,
    Received,
    Other(String),
}

impl PoStatus {
    pub const ALL: [PoStatus; 5] = [
        PoStatus::Pending,
        PoStatus::Approved,
        PoStatus::Rejected,
        PoStatus::Ordered,
        PoStatus::Received,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => PoStatus::Pending,
            "approved" => PoStatus::Approved,
            "rejected" | "cancelled" => PoStatus::Rejected,
            "ordered" => PoStatus::Ordered,
            "received" => PoStatus::Received,
            _ => PoStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PoStatus::Pending => "pending",
            PoStatus::Approved => "approved",
            PoStatus::Rejected => "rejected",
            PoStatus::Ordered => "ordered",
            PoStatus::Received => "received",
            PoStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PoStatus::Other(_))
    }
}

impl From<PoStatus> for String {
    fn from(value: PoStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StockStatus {
    #[serde(rename = "In Stock")]
    InStock,
    #[serde(rename = "Low Stock")]
    LowStock,
    #[serde(rename = "Out of Stock")]
    OutOfStock,
}

impl StockStatus {
    pub const ALL: [StockStatus; 3] = [
        StockStatus::InStock,
        StockStatus::LowStock,
        StockStatus::OutOfStock,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StockStatus::InStock => "In Stock",
            StockStatus::LowStock => "Low Stock",
            StockStatus::OutOfStock => "Out of Stock",
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderedPart {
    pub id: i64,
    pub item_id: i64,
    pub name: String,
    pub category: String,
    pub sku: String,
    pub price: f64,
    pub quantity: u32,
    pub status: PartStatus,
    pub ordered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub ticket_id: i64,
    pub ticket_number: String,
    pub customer_name: String,
    pub vehicle_info: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub ticket_type: TicketType,
    pub status: TicketStatus,
    pub mechanic: Option<String>,
    pub inspector: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub completion_date: Option<DateTime<Utc>>,
    pub ordered_parts: Vec<OrderedPart>,
}

impl Ticket {
    /// True when every ordered part has been handed over. Vacuously true
    /// for a ticket without parts.
    pub fn all_parts_given(&self) -> bool {
        self.ordered_parts
            .iter()
            .all(|p| p.status == PartStatus::Given)
    }

    /// Active partition membership: at least one pending part, or no parts.
    pub fn is_active(&self) -> bool {
        self.ordered_parts.is_empty()
            || self
                .ordered_parts
                .iter()
                .any(|p| p.status == PartStatus::Pending)
    }

    pub fn part(&self, part_id: i64) -> Option<&OrderedPart> {
        self.ordered_parts.iter().find(|p| p.id == part_id)
    }

    pub fn parts_total(&self) -> f64 {
        self.ordered_parts
            .iter()
            .map(|p| p.price * f64::from(p.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutsourcedPart {
    pub id: i64,
    pub ticket_number: String,
    pub name: String,
    pub category: String,
    pub sku: String,
    pub quantity: u32,
    pub price: f64,
    /// Computed by the gateway (shop markups apply). Never recomputed here.
    pub total_cost: f64,
    pub source_shop: Option<String>,
    pub status: OutsourceStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: i64,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrder {
    pub po_number: String,
    pub supplier: Option<String>,
    pub status: PoStatus,
    pub order_date: Option<DateTime<Utc>>,
    pub expected_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub total_amount: f64,
    pub item_count: u32,
    pub created_by: String,
    pub notes: Option<String>,
    pub priority: Priority,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryItem {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub category: String,
    pub quantity: i64,
    pub min_stock: i64,
    pub max_stock: Option<i64>,
    pub price: f64,
    pub supplier: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub stock_status: StockStatus,
}

/// A catalog item that can be ordered against a ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogPart {
    pub id: i64,
    pub name: String,
    pub sku: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub user: String,
    pub entity: String,
    pub details: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}
