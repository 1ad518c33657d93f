//! Entity normalizer: raw gateway JSON -> typed records.
//!
//! Every fetch path goes through this module before anything lands in a
//! desk collection. Coercion of money fields and nullable relational fields
//! is driven by [`FIELD_RULES`] so each wire key is handled in exactly one
//! place, whatever entity it appears on.
//!
//! Nothing here fails hard: a payload with the wrong shape becomes an empty
//! collection plus a [`LoadError`] for the banner.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{
    AuditEntry, CatalogPart, InventoryItem, OrderItem, OrderedPart, OutsourceStatus,
    OutsourcedPart, PartStatus, PoStatus, Priority, PurchaseOrder, StockStatus, Supplier, Ticket,
    TicketStatus, TicketType,
};
use crate::{value_i64, value_str};

// ---------------------------------------------------------------------------
// Field rule table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Parse as f64; anything unparsable becomes 0.
    Number,
    /// JSON null or blank string becomes "absent" (key removed).
    Optional,
}

pub const FIELD_RULES: &[(&str, Coercion)] = &[
    ("price", Coercion::Number),
    ("unit_price", Coercion::Number),
    ("unitPrice", Coercion::Number),
    ("totalAmount", Coercion::Number),
    ("total_amount", Coercion::Number),
    ("total_cost", Coercion::Number),
    ("totalCost", Coercion::Number),
    ("maxStock", Coercion::Optional),
    ("max_stock", Coercion::Optional),
    ("imageUrl", Coercion::Optional),
    ("image_url", Coercion::Optional),
    ("supplier", Coercion::Optional),
    ("description", Coercion::Optional),
    ("expectedDate", Coercion::Optional),
    ("expected_date", Coercion::Optional),
    ("receivedDate", Coercion::Optional),
    ("received_date", Coercion::Optional),
];

/// Coerce a wire value to a number. Numbers pass through unchanged, numeric
/// strings are parsed, everything else is `0`.
pub fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Apply [`FIELD_RULES`] to one raw object. Keys not in the table are kept
/// untouched.
pub fn apply_field_rules(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut out = raw.clone();
    for (key, rule) in FIELD_RULES {
        let Some(value) = out.get(*key) else {
            continue;
        };
        match rule {
            Coercion::Number => {
                let n = coerce_number(value);
                out.insert((*key).to_string(), Value::from(n));
            }
            Coercion::Optional => {
                if is_absent(value) {
                    out.remove(*key);
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Non-fatal load problem surfaced as a banner by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError(pub String);

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of normalizing a collection: whatever could be read, plus an
/// optional banner message.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub items: Vec<T>,
    pub error: Option<LoadError>,
}

impl<T> Loaded<T> {
    pub fn ok(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            error: Some(LoadError(message.into())),
        }
    }
}

/// Banner messages keyed by collection. A refresh only ever touches its own
/// entry, so a successful fetch of one collection never hides the failure of
/// another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadErrors(BTreeMap<&'static str, LoadError>);

impl LoadErrors {
    /// Set or clear the entry for `collection`.
    pub fn record(&mut self, collection: &'static str, error: Option<LoadError>) {
        match error {
            Some(err) => {
                self.0.insert(collection, err);
            }
            None => {
                self.0.remove(collection);
            }
        }
    }

    pub fn get(&self, collection: &str) -> Option<&LoadError> {
        self.0.get(collection)
    }

    pub fn first(&self) -> Option<&LoadError> {
        self.0.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &LoadError)> + '_ {
        self.0.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn normalize_array<T>(
    payload: &Value,
    what: &str,
    one: impl Fn(&Map<String, Value>) -> Option<T>,
) -> Loaded<T> {
    let Some(rows) = payload.as_array() else {
        warn!(entity = what, "expected an array payload, got something else");
        return Loaded::failed(format!("Failed to load {what}: unexpected response shape"));
    };
    let mut items = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for row in rows {
        match row.as_object().map(apply_field_rules).as_ref().and_then(&one) {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(entity = what, skipped, "skipped malformed rows");
    }
    Loaded::ok(items)
}

/// Parse the timestamp formats the gateway emits: RFC 3339, SQL datetime,
/// or a bare date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Money field after [`apply_field_rules`] has run: every key in the table
/// already holds a number, so this only picks the first key present.
fn money(obj: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_f64))
        .unwrap_or(0.0)
}

fn ts(obj: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    value_str(obj, keys).and_then(|s| parse_timestamp(&s))
}

fn qty(obj: &Value, keys: &[&str]) -> u32 {
    value_i64(obj, keys)
        .map(|q| q.clamp(1, i64::from(u32::MAX)) as u32)
        .unwrap_or(1)
}

/// Stock level classification. Pure; recomputed on every fetch.
pub fn derive_stock_status(quantity: i64, min_stock: i64) -> StockStatus {
    if quantity <= 0 {
        StockStatus::OutOfStock
    } else if quantity <= min_stock {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

// ---------------------------------------------------------------------------
// Tickets and ordered parts
// ---------------------------------------------------------------------------

fn normalize_ordered_part(raw: &Map<String, Value>) -> Option<OrderedPart> {
    let obj = Value::Object(raw.clone());
    let id = value_i64(&obj, &["id", "ordered_part_id"])?;
    let status = value_str(&obj, &["status"])
        .and_then(|s| PartStatus::parse(&s))
        .unwrap_or(PartStatus::Pending);
    Some(OrderedPart {
        id,
        item_id: value_i64(&obj, &["item_id", "itemId"]).unwrap_or(0),
        name: value_str(&obj, &["name", "item_name"]).unwrap_or_default(),
        category: value_str(&obj, &["category"]).unwrap_or_default(),
        sku: value_str(&obj, &["sku"]).unwrap_or_default(),
        price: money(&obj, &["price", "unit_price", "unitPrice"]),
        quantity: qty(&obj, &["quantity"]),
        status,
        ordered_at: ts(&obj, &["ordered_at", "orderedAt"]),
    })
}

fn vehicle_info(obj: &Value) -> String {
    if let Some(info) = value_str(obj, &["vehicle_info", "vehicleInfo", "vehicle"]) {
        return info;
    }
    let parts: Vec<String> = [
        "vehicle_make",
        "vehicle_model",
        "vehicle_year",
        "license_plate",
    ]
    .iter()
    .filter_map(|k| value_str(obj, &[*k]))
    .collect();
    parts.join(" ")
}

fn normalize_ticket(raw: &Map<String, Value>) -> Option<Ticket> {
    let obj = Value::Object(raw.clone());
    let ticket_number = value_str(&obj, &["ticket_number", "ticketNumber"])?;
    let parts = obj
        .get("ordered_parts")
        .or_else(|| obj.get("orderedParts"))
        .or_else(|| obj.get("parts"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .map(apply_field_rules)
                .filter_map(|row| normalize_ordered_part(&row))
                .collect()
        })
        .unwrap_or_default();
    let customer_name = value_str(&obj, &["customer_name", "customerName"])
        .or_else(|| obj.get("customer").and_then(|c| value_str(c, &["name"])))
        .unwrap_or_default();

    Some(Ticket {
        ticket_id: value_i64(&obj, &["ticket_id", "ticketId", "id"]).unwrap_or(0),
        ticket_number,
        customer_name,
        vehicle_info: vehicle_info(&obj),
        title: value_str(&obj, &["title"]).unwrap_or_default(),
        description: value_str(&obj, &["description"]),
        priority: value_str(&obj, &["priority"])
            .map(|s| Priority::parse(&s))
            .unwrap_or(Priority::Medium),
        ticket_type: value_str(&obj, &["type", "ticket_type", "ticketType"])
            .map(|s| TicketType::parse(&s))
            .unwrap_or(TicketType::Regular),
        status: value_str(&obj, &["status", "ticket_status"])
            .map(|s| TicketStatus::parse(&s))
            .unwrap_or(TicketStatus::Pending),
        mechanic: value_str(&obj, &["mechanic", "assigned_mechanic", "mechanic_name"]),
        inspector: value_str(&obj, &["inspector", "assigned_inspector", "inspector_name"]),
        created_at: ts(&obj, &["created_at", "createdAt"]),
        updated_at: ts(&obj, &["updated_at", "updatedAt"]),
        estimated_completion: ts(
            &obj,
            &["estimated_completion_date", "estimated_completion", "estimatedCompletion"],
        ),
        completion_date: ts(&obj, &["completion_date", "completionDate"]),
        ordered_parts: parts,
    })
}

pub fn normalize_tickets(payload: &Value) -> Loaded<Ticket> {
    normalize_array(payload, "orders", normalize_ticket)
}

// ---------------------------------------------------------------------------
// Outsourced parts
// ---------------------------------------------------------------------------

fn normalize_outsourced_part(raw: &Map<String, Value>) -> Option<OutsourcedPart> {
    let obj = Value::Object(raw.clone());
    Some(OutsourcedPart {
        id: value_i64(&obj, &["id"])?,
        ticket_number: value_str(&obj, &["ticket_number", "ticketNumber"])?,
        name: value_str(&obj, &["name", "part_name"]).unwrap_or_default(),
        category: value_str(&obj, &["category"]).unwrap_or_default(),
        sku: value_str(&obj, &["sku"]).unwrap_or_default(),
        quantity: qty(&obj, &["quantity"]),
        price: money(&obj, &["price"]),
        total_cost: money(&obj, &["total_cost", "totalCost"]),
        source_shop: value_str(&obj, &["source_shop", "sourceShop"]),
        status: OutsourceStatus::parse(&value_str(&obj, &["status"]).unwrap_or_default()),
        requested_at: ts(&obj, &["requested_at", "requestedAt"]),
        received_at: ts(&obj, &["received_at", "receivedAt"]),
        notes: value_str(&obj, &["notes"]),
    })
}

pub fn normalize_outsourced_parts(payload: &Value) -> Loaded<OutsourcedPart> {
    normalize_array(payload, "outsourced parts", normalize_outsourced_part)
}

// ---------------------------------------------------------------------------
// Purchase orders and suppliers
// ---------------------------------------------------------------------------

fn normalize_order_item(raw: &Map<String, Value>) -> Option<OrderItem> {
    let obj = Value::Object(raw.clone());
    Some(OrderItem {
        id: value_i64(&obj, &["id", "item_id"]).unwrap_or(0),
        name: value_str(&obj, &["name", "item_name"])?,
        quantity: qty(&obj, &["quantity"]),
        price: money(&obj, &["price", "unit_price", "unitPrice"]),
    })
}

fn normalize_purchase_order(raw: &Map<String, Value>) -> Option<PurchaseOrder> {
    let obj = Value::Object(raw.clone());
    let po_number = value_str(&obj, &["poNumber", "po_number"])?;
    let status = PoStatus::parse(&value_str(&obj, &["status"]).unwrap_or_default());
    if !status.is_known() {
        warn!(po_number = %po_number, status = status.as_str(), "unknown PO status, no actions offered");
    }
    let items: Vec<OrderItem> = obj
        .get("items")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .map(apply_field_rules)
                .filter_map(|row| normalize_order_item(&row))
                .collect()
        })
        .unwrap_or_default();
    let item_count = value_i64(&obj, &["itemCount", "item_count"])
        .map(|n| n.max(0) as u32)
        .unwrap_or(items.len() as u32);

    Some(PurchaseOrder {
        po_number,
        supplier: value_str(&obj, &["supplier", "supplier_name"]),
        status,
        order_date: ts(&obj, &["orderDate", "order_date"]),
        expected_date: ts(&obj, &["expectedDate", "expected_date"]),
        received_date: ts(&obj, &["receivedDate", "received_date"]),
        total_amount: money(&obj, &["totalAmount", "total_amount"]),
        item_count,
        created_by: value_str(&obj, &["createdBy", "created_by"]).unwrap_or_default(),
        notes: value_str(&obj, &["notes"]),
        priority: value_str(&obj, &["priority"])
            .map(|s| Priority::parse(&s))
            .unwrap_or(Priority::Medium),
        items,
    })
}

pub fn normalize_purchase_orders(payload: &Value) -> Loaded<PurchaseOrder> {
    normalize_array(payload, "purchase orders", normalize_purchase_order)
}

pub fn normalize_suppliers(payload: &Value) -> Loaded<Supplier> {
    normalize_array(payload, "suppliers", |raw| {
        let obj = Value::Object(raw.clone());
        Some(Supplier {
            id: value_i64(&obj, &["id"])?,
            name: value_str(&obj, &["name", "supplier_name"])?,
        })
    })
}

// ---------------------------------------------------------------------------
// Inventory, catalog, audit log
// ---------------------------------------------------------------------------

fn normalize_inventory_item(raw: &Map<String, Value>) -> Option<InventoryItem> {
    let obj = Value::Object(raw.clone());
    let quantity = value_i64(&obj, &["quantity", "stock"]).unwrap_or(0).max(0);
    let min_stock = value_i64(&obj, &["minStock", "min_stock"]).unwrap_or(0);
    Some(InventoryItem {
        id: value_i64(&obj, &["id"])?,
        name: value_str(&obj, &["name"]).unwrap_or_default(),
        sku: value_str(&obj, &["sku"]).unwrap_or_default(),
        category: value_str(&obj, &["category"]).unwrap_or_default(),
        quantity,
        min_stock,
        max_stock: value_i64(&obj, &["maxStock", "max_stock"]),
        price: money(&obj, &["price", "unitPrice", "unit_price"]),
        supplier: value_str(&obj, &["supplier"]),
        description: value_str(&obj, &["description"]),
        image_url: value_str(&obj, &["imageUrl", "image_url"]),
        stock_status: derive_stock_status(quantity, min_stock),
    })
}

pub fn normalize_inventory(payload: &Value) -> Loaded<InventoryItem> {
    normalize_array(payload, "inventory", normalize_inventory_item)
}

pub fn normalize_catalog(payload: &Value) -> Loaded<CatalogPart> {
    normalize_array(payload, "parts catalog", |raw| {
        let obj = Value::Object(raw.clone());
        Some(CatalogPart {
            id: value_i64(&obj, &["id", "item_id"])?,
            name: value_str(&obj, &["name"]).unwrap_or_default(),
            sku: value_str(&obj, &["sku"]).unwrap_or_default(),
            category: value_str(&obj, &["category"]).unwrap_or_default(),
            price: money(&obj, &["price"]),
            stock: value_i64(&obj, &["quantity", "stock"]).unwrap_or(0),
        })
    })
}

pub fn normalize_audit_log(payload: &Value) -> Loaded<AuditEntry> {
    normalize_array(payload, "audit log", |raw| {
        let obj = Value::Object(raw.clone());
        Some(AuditEntry {
            id: value_i64(&obj, &["id"])?,
            action: value_str(&obj, &["action"])
                .map(|a| a.to_ascii_lowercase())
                .unwrap_or_else(|| "unknown".into()),
            user: value_str(&obj, &["user", "username", "user_name"]).unwrap_or_default(),
            entity: value_str(&obj, &["entity", "item_name", "table_name"]).unwrap_or_default(),
            details: value_str(&obj, &["details"]),
            timestamp: ts(&obj, &["timestamp", "created_at"]),
        })
    })
}
