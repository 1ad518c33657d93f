//! Search, filter and count views over desk collections.
//!
//! Everything here is a pure function of the collection it is given. Counts
//! are recomputed by a full scan on every call.

use std::collections::BTreeMap;

use crate::models::{
    AuditEntry, InventoryItem, OutsourceStatus, OutsourcedPart, PoStatus, Priority, PurchaseOrder,
    StockStatus, Ticket, TicketStatus,
};

/// Entities that take part in the free-text search box.
pub trait Searchable {
    /// Display fields matched by the search box.
    fn search_fields(&self) -> Vec<&str>;

    /// Case-insensitive substring match on any search field. A blank query
    /// matches everything.
    fn matches_search(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.search_fields()
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

impl Searchable for Ticket {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.ticket_number.as_str(),
            self.customer_name.as_str(),
            self.vehicle_info.as_str(),
        ]
    }
}

impl Searchable for OutsourcedPart {
    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.ticket_number.as_str(),
            self.name.as_str(),
            self.category.as_str(),
            self.sku.as_str(),
        ]
    }
}

impl Searchable for PurchaseOrder {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.po_number.as_str(), self.created_by.as_str()];
        if let Some(supplier) = &self.supplier {
            fields.push(supplier.as_str());
        }
        fields
    }
}

impl Searchable for InventoryItem {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.sku.as_str(), self.category.as_str()]
    }
}

impl Searchable for AuditEntry {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.action.as_str(), self.user.as_str(), self.entity.as_str()];
        if let Some(details) = &self.details {
            fields.push(details.as_str());
        }
        fields
    }
}

fn exact<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
    wanted.as_ref().map_or(true, |w| w == actual)
}

fn exact_text(wanted: &Option<String>, actual: &str) -> bool {
    wanted
        .as_deref()
        .map_or(true, |w| w.eq_ignore_ascii_case(actual))
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    pub search: String,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
}

impl TicketFilter {
    pub fn apply<'a>(&self, tickets: &'a [Ticket]) -> Vec<&'a Ticket> {
        tickets
            .iter()
            .filter(|t| exact(&self.status, &t.status))
            .filter(|t| exact(&self.priority, &t.priority))
            .filter(|t| t.matches_search(&self.search))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutsourcedFilter {
    pub search: String,
    pub status: Option<OutsourceStatus>,
}

impl OutsourcedFilter {
    pub fn apply<'a>(&self, parts: &'a [OutsourcedPart]) -> Vec<&'a OutsourcedPart> {
        parts
            .iter()
            .filter(|p| exact(&self.status, &p.status))
            .filter(|p| p.matches_search(&self.search))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoFilter {
    pub search: String,
    pub status: Option<PoStatus>,
    pub supplier: Option<String>,
}

impl PoFilter {
    pub fn apply<'a>(&self, orders: &'a [PurchaseOrder]) -> Vec<&'a PurchaseOrder> {
        orders
            .iter()
            .filter(|po| exact(&self.status, &po.status))
            .filter(|po| exact_text(&self.supplier, po.supplier.as_deref().unwrap_or_default()))
            .filter(|po| po.matches_search(&self.search))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryFilter {
    pub search: String,
    pub category: Option<String>,
    pub stock_status: Option<StockStatus>,
}

impl InventoryFilter {
    pub fn apply<'a>(&self, items: &'a [InventoryItem]) -> Vec<&'a InventoryItem> {
        items
            .iter()
            .filter(|i| exact_text(&self.category, &i.category))
            .filter(|i| exact(&self.stock_status, &i.stock_status))
            .filter(|i| i.matches_search(&self.search))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub search: String,
    pub action: Option<String>,
    pub user: Option<String>,
}

impl AuditFilter {
    pub fn apply<'a>(&self, entries: &'a [AuditEntry]) -> Vec<&'a AuditEntry> {
        entries
            .iter()
            .filter(|e| exact_text(&self.action, &e.action))
            .filter(|e| exact_text(&self.user, &e.user))
            .filter(|e| e.matches_search(&self.search))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// One entry per PO status, zero counts included.
pub fn po_status_counts(orders: &[PurchaseOrder]) -> Vec<(PoStatus, usize)> {
    PoStatus::ALL
        .into_iter()
        .map(|status| {
            let count = orders.iter().filter(|po| po.status == status).count();
            (status, count)
        })
        .collect()
}

pub fn stock_status_counts(items: &[InventoryItem]) -> Vec<(StockStatus, usize)> {
    StockStatus::ALL
        .iter()
        .map(|&status| (status, items.iter().filter(|i| i.stock_status == status).count()))
        .collect()
}

pub fn audit_action_counts(entries: &[AuditEntry]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.action.clone()).or_insert(0) += 1;
    }
    counts
}

pub fn outsourced_status_counts(parts: &[OutsourcedPart]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for part in parts {
        *counts.entry(part.status.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Distinct inventory categories, sorted, for the category dropdown.
pub fn categories(items: &[InventoryItem]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|i| i.category.clone())
        .filter(|c| !c.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
