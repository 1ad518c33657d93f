//! The remote data gateway seam.
//!
//! Every operation returns the raw `data` payload of the JSON envelope (or
//! `()` for pure status writes). Callers pass fetch payloads through
//! `normalize` before storing them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::{DeskError, DeskResult};
use crate::invoice::ProformaInvoice;
use crate::models::{PartStatus, PoStatus, Priority, TicketStatus};

/// One catalog item requested against a ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrderedPart {
    pub item_id: i64,
    pub quantity: u32,
}

/// A single outsourcing request. The gateway creates one row per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutsourceRequest {
    pub ticket_number: String,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseOrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchaseOrder {
    pub supplier: String,
    pub expected_date: Option<String>,
    pub notes: Option<String>,
    pub priority: Priority,
    pub created_by: String,
    pub total_amount: f64,
    pub items: Vec<NewPurchaseOrderItem>,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn fetch_active_orders(&self) -> DeskResult<Value>;
    async fn fetch_order_history(&self) -> DeskResult<Value>;
    async fn fetch_catalog_parts(&self) -> DeskResult<Value>;
    async fn create_ordered_parts(
        &self,
        ticket_number: &str,
        items: &[NewOrderedPart],
    ) -> DeskResult<Value>;
    async fn update_part_status(&self, part_id: i64, status: PartStatus) -> DeskResult<()>;
    async fn update_ticket_status(
        &self,
        ticket_id: i64,
        status: &TicketStatus,
        completion_date: Option<DateTime<Utc>>,
    ) -> DeskResult<()>;
    async fn create_outsourced_part(&self, request: &OutsourceRequest) -> DeskResult<Value>;
    async fn fetch_outsourced_parts(&self, ticket_numbers: &[String]) -> DeskResult<Value>;
    async fn fetch_purchase_orders(&self) -> DeskResult<Value>;
    async fn create_purchase_order(&self, order: &NewPurchaseOrder) -> DeskResult<Value>;
    async fn update_purchase_order_status(&self, po_number: &str, status: &PoStatus)
        -> DeskResult<()>;
    async fn fetch_suppliers(&self) -> DeskResult<Value>;
    async fn fetch_inventory(&self) -> DeskResult<Value>;
    async fn fetch_audit_log(&self) -> DeskResult<Value>;
    async fn save_proforma_invoice(&self, invoice: &ProformaInvoice) -> DeskResult<Value>;
}

/// Unwrap the `{ success, data }` envelope. Anything without
/// `success: true` is a soft failure carrying the server's message.
pub fn unwrap_envelope(body: Value) -> DeskResult<Value> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    if success {
        return Ok(body.get("data").cloned().unwrap_or(Value::Null));
    }
    let message = body
        .get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "Request was not successful".to_string());
    Err(DeskError::transport(message))
}
