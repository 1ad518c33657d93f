//! In-memory gateway used by the unit tests.
//!
//! Behaves like a tiny server: tickets move from the active to the history
//! endpoint once their status is set to completed, outsourced parts and
//! purchase orders are persisted in memory, and every call is recorded so
//! tests can assert on exactly what went over the wire.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::{DeskError, DeskResult};
use crate::gateway::{Gateway, NewOrderedPart, NewPurchaseOrder, OutsourceRequest};
use crate::invoice::ProformaInvoice;
use crate::models::{PartStatus, PoStatus, TicketStatus};

#[derive(Default)]
pub(crate) struct MockState {
    pub tickets: Vec<Value>,
    pub catalog: Vec<Value>,
    pub outsourced: Vec<Value>,
    pub purchase_orders: Vec<Value>,
    pub suppliers: Vec<Value>,
    pub inventory: Value,
    pub audit: Vec<Value>,
    pub calls: Vec<String>,
    pub fail_part_update: bool,
    pub fail_ticket_update: bool,
    pub fail_fetches: bool,
    /// Fetch endpoints (by call name) that fail with a transport error.
    pub failing_fetches: HashSet<&'static str>,
    /// Served by `fetch_active_orders` instead of the ticket list.
    pub active_payload: Option<Value>,
    /// 1-based indexes of outsourcing create calls that fail.
    pub fail_outsource_calls: HashSet<usize>,
    pub outsource_calls: usize,
    pub proforma_responses: VecDeque<DeskResult<Value>>,
    pub proforma_numbers: Vec<String>,
    next_id: i64,
}

#[derive(Default)]
pub(crate) struct MockGateway {
    pub state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gw = Self::default();
        gw.with(|s| {
            s.next_id = 1000;
            s.inventory = json!([]);
        });
        gw
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().expect("mock state lock");
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }

    fn fetch_guard(&self, endpoint: &'static str) -> DeskResult<()> {
        if self.with(|s| s.fail_fetches || s.failing_fetches.contains(endpoint)) {
            return Err(DeskError::transport("Cannot reach the stock server"));
        }
        Ok(())
    }
}

/// Build a ticket payload the way the gateway sends it.
pub(crate) fn ticket_json(id: i64, number: &str, status: &str, parts: &[(i64, &str)]) -> Value {
    let parts: Vec<Value> = parts
        .iter()
        .map(|(part_id, part_status)| {
            json!({
                "id": part_id,
                "item_id": part_id * 10,
                "name": format!("Part {part_id}"),
                "category": "Brakes",
                "sku": format!("SKU-{part_id}"),
                "price": "19.90",
                "quantity": 1,
                "status": part_status,
                "ordered_at": "2024-04-01T09:00:00Z"
            })
        })
        .collect();
    json!({
        "ticket_id": id,
        "ticket_number": number,
        "customer_name": format!("Customer {id}"),
        "vehicle_info": "Toyota Corolla",
        "title": "Service",
        "priority": "medium",
        "type": "regular",
        "status": status,
        "ordered_parts": parts,
    })
}

fn is_completed(ticket: &Value) -> bool {
    ticket.get("status").and_then(Value::as_str) == Some("completed")
}

#[async_trait]
impl Gateway for MockGateway {
    async fn fetch_active_orders(&self) -> DeskResult<Value> {
        self.record("fetch_active_orders".into());
        self.fetch_guard("fetch_active_orders")?;
        Ok(self.with(|s| {
            if let Some(payload) = &s.active_payload {
                return payload.clone();
            }
            Value::Array(
                s.tickets
                    .iter()
                    .filter(|t| !is_completed(t))
                    .cloned()
                    .collect(),
            )
        }))
    }

    async fn fetch_order_history(&self) -> DeskResult<Value> {
        self.record("fetch_order_history".into());
        self.fetch_guard("fetch_order_history")?;
        Ok(self.with(|s| {
            Value::Array(s.tickets.iter().filter(|t| is_completed(t)).cloned().collect())
        }))
    }

    async fn fetch_catalog_parts(&self) -> DeskResult<Value> {
        self.record("fetch_catalog_parts".into());
        self.fetch_guard("fetch_catalog_parts")?;
        Ok(self.with(|s| Value::Array(s.catalog.clone())))
    }

    async fn create_ordered_parts(
        &self,
        ticket_number: &str,
        items: &[NewOrderedPart],
    ) -> DeskResult<Value> {
        self.record(format!("create_ordered_parts:{ticket_number}:{}", items.len()));
        self.with(|s| {
            let mut next_id = s.next_id;
            let ticket = s
                .tickets
                .iter_mut()
                .find(|t| t["ticket_number"] == ticket_number)
                .ok_or_else(|| DeskError::transport("Ticket not found"))?;
            let parts = ticket["ordered_parts"]
                .as_array_mut()
                .ok_or_else(|| DeskError::transport("bad ticket"))?;
            for item in items {
                next_id += 1;
                parts.push(json!({
                    "id": next_id,
                    "item_id": item.item_id,
                    "name": format!("Item {}", item.item_id),
                    "price": 5,
                    "quantity": item.quantity,
                    "status": "pending",
                }));
            }
            s.next_id = next_id;
            Ok(json!({ "created": items.len() }))
        })
    }

    async fn update_part_status(&self, part_id: i64, status: PartStatus) -> DeskResult<()> {
        // Stay in flight across one scheduler turn, like a real request.
        tokio::task::yield_now().await;
        self.record(format!("update_part_status:{part_id}:{}", status.as_str()));
        self.with(|s| {
            if s.fail_part_update {
                return Err(DeskError::transport("Server error (HTTP 500)"));
            }
            for ticket in &mut s.tickets {
                if let Some(parts) = ticket["ordered_parts"].as_array_mut() {
                    for part in parts {
                        if part["id"] == part_id {
                            part["status"] = json!(status.as_str());
                            return Ok(());
                        }
                    }
                }
            }
            Err(DeskError::transport("Part not found"))
        })
    }

    async fn update_ticket_status(
        &self,
        ticket_id: i64,
        status: &TicketStatus,
        completion_date: Option<DateTime<Utc>>,
    ) -> DeskResult<()> {
        self.record(format!("update_ticket_status:{ticket_id}:{}", status.as_str()));
        self.with(|s| {
            if s.fail_ticket_update {
                return Err(DeskError::transport("Server error (HTTP 503)"));
            }
            let ticket = s
                .tickets
                .iter_mut()
                .find(|t| t["ticket_id"] == ticket_id)
                .ok_or_else(|| DeskError::transport("Ticket not found"))?;
            ticket["status"] = json!(status.as_str());
            ticket["completion_date"] = json!(completion_date.map(|d| d.to_rfc3339()));
            Ok(())
        })
    }

    async fn create_outsourced_part(&self, request: &OutsourceRequest) -> DeskResult<Value> {
        // Let concurrently issued requests interleave.
        tokio::task::yield_now().await;
        self.with(|s| {
            s.outsource_calls += 1;
            let n = s.outsource_calls;
            s.calls
                .push(format!("create_outsourced_part:{}:{}", request.ticket_number, request.name));
            if s.fail_outsource_calls.contains(&n) {
                return Err(DeskError::transport("Server error (HTTP 500)"));
            }
            s.next_id += 1;
            let row = json!({
                "id": s.next_id,
                "ticket_number": request.ticket_number,
                "name": request.name,
                "category": request.category,
                "quantity": request.quantity,
                "price": "0",
                "total_cost": "0",
                "status": "requested",
                "notes": request.notes,
            });
            s.outsourced.push(row.clone());
            Ok(row)
        })
    }

    async fn fetch_outsourced_parts(&self, ticket_numbers: &[String]) -> DeskResult<Value> {
        self.record(format!("fetch_outsourced_parts:{}", ticket_numbers.join(",")));
        self.fetch_guard("fetch_outsourced_parts")?;
        Ok(self.with(|s| {
            Value::Array(
                s.outsourced
                    .iter()
                    .filter(|row| {
                        row["ticket_number"]
                            .as_str()
                            .map(|n| ticket_numbers.iter().any(|t| t == n))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect(),
            )
        }))
    }

    async fn fetch_purchase_orders(&self) -> DeskResult<Value> {
        self.record("fetch_purchase_orders".into());
        self.fetch_guard("fetch_purchase_orders")?;
        Ok(self.with(|s| Value::Array(s.purchase_orders.clone())))
    }

    async fn create_purchase_order(&self, order: &NewPurchaseOrder) -> DeskResult<Value> {
        self.record(format!("create_purchase_order:{}", order.supplier));
        self.with(|s| {
            let po_number = format!("PO-{:04}", s.purchase_orders.len() + 1);
            let mut row = serde_json::to_value(order).map_err(|e| DeskError::transport(e.to_string()))?;
            row["poNumber"] = json!(po_number);
            row["status"] = json!("pending");
            row["orderDate"] = json!("2024-06-01");
            s.purchase_orders.push(row);
            Ok(json!({ "poNumber": po_number }))
        })
    }

    async fn update_purchase_order_status(
        &self,
        po_number: &str,
        status: &PoStatus,
    ) -> DeskResult<()> {
        tokio::task::yield_now().await;
        self.record(format!("update_purchase_order_status:{po_number}:{}", status.as_str()));
        self.with(|s| {
            let po = s
                .purchase_orders
                .iter_mut()
                .find(|p| p["poNumber"] == po_number)
                .ok_or_else(|| DeskError::transport("PO not found"))?;
            po["status"] = json!(status.as_str());
            Ok(())
        })
    }

    async fn fetch_suppliers(&self) -> DeskResult<Value> {
        self.record("fetch_suppliers".into());
        self.fetch_guard("fetch_suppliers")?;
        Ok(self.with(|s| Value::Array(s.suppliers.clone())))
    }

    async fn fetch_inventory(&self) -> DeskResult<Value> {
        self.record("fetch_inventory".into());
        self.fetch_guard("fetch_inventory")?;
        Ok(self.with(|s| s.inventory.clone()))
    }

    async fn fetch_audit_log(&self) -> DeskResult<Value> {
        self.record("fetch_audit_log".into());
        self.fetch_guard("fetch_audit_log")?;
        Ok(self.with(|s| Value::Array(s.audit.clone())))
    }

    async fn save_proforma_invoice(&self, invoice: &ProformaInvoice) -> DeskResult<Value> {
        self.record(format!("save_proforma_invoice:{}", invoice.invoice_number));
        self.with(|s| {
            s.proforma_numbers.push(invoice.invoice_number.clone());
            s.proforma_responses
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "invoice_number": invoice.invoice_number })))
        })
    }
}

/// Session with an opaque (non-expiring) token.
pub(crate) fn test_session() -> crate::session::Session {
    crate::session::Session::from_parts(
        "test-token",
        r#"{"id": 3, "username": "sam", "full_name": "Sam Rivera"}"#,
    )
    .expect("test session")
}
