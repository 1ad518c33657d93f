//! REST gateway client.
//!
//! `HttpGateway` implements [`Gateway`] over reqwest with bearer-token
//! authentication. Transport paths live here and nowhere else.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{normalize_gateway_url, DeskConfig};
use crate::error::{DeskError, DeskResult};
use crate::gateway::{unwrap_envelope, Gateway, NewOrderedPart, NewPurchaseOrder, OutsourceRequest};
use crate::invoice::ProformaInvoice;
use crate::models::{PartStatus, PoStatus, TicketStatus};
use crate::session::Session;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach the stock server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "You are not allowed to perform this action".to_string(),
        404 => "Server endpoint not found".to_string(),
        409 => "Conflicting record already exists".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// Map a non-2xx response to a [`DeskError`], keeping the server's message
/// when the body carries one.
fn error_for_status(status: StatusCode, body_text: &str) -> DeskError {
    if status == StatusCode::CONFLICT {
        return DeskError::Conflict {
            body: body_text.trim().to_string(),
        };
    }
    if status == StatusCode::UNAUTHORIZED {
        return DeskError::SessionExpired;
    }
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(|m| format!("{m} (HTTP {})", status.as_u16()))
        })
        .unwrap_or_else(|| status_error(status));
    DeskError::Transport {
        status: Some(status.as_u16()),
        message,
    }
}

/// Append `segments` to the base URL. Each segment is percent-encoded, so
/// identifiers containing `/`, `#` or spaces stay one path segment.
fn endpoint(base: &Url, segments: &[&str]) -> DeskResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| DeskError::transport(format!("Invalid server URL: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// HttpGateway
// ---------------------------------------------------------------------------

pub struct HttpGateway {
    client: Client,
    base_url: Url,
    session: Session,
}

impl HttpGateway {
    pub fn new(config: &DeskConfig, session: Session) -> DeskResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeskError::transport(format!("Failed to create HTTP client: {e}")))?;
        let raw = normalize_gateway_url(&config.gateway_url);
        let base_url = Url::parse(&raw)
            .map_err(|e| DeskError::transport(format!("Invalid server URL {raw}: {e}")))?;
        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    /// Perform an authenticated request and unwrap the JSON envelope.
    ///
    /// `segments` are the unescaped path segments, e.g.
    /// `["api", "orders", "active"]`.
    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> DeskResult<Value> {
        self.session.guard()?;
        let url = endpoint(&self.base_url, segments)?;
        let path = url.path().to_string();
        debug!(method = %method, path = %path, "gateway request");

        let mut req = self
            .client
            .request(method, url)
            .bearer_auth(self.session.bearer())
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeskError::transport(friendly_error(self.base_url.as_str(), &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let err = error_for_status(status, &body_text);
            warn!(path = %path, status = status.as_u16(), error = %err, "gateway request failed");
            return Err(err);
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let json: Value = serde_json::from_str(&body_text)
            .map_err(|e| DeskError::transport(format!("Invalid JSON from server: {e}")))?;
        unwrap_envelope(json)
    }

    async fn get(&self, segments: &[&str]) -> DeskResult<Value> {
        self.request(Method::GET, segments, None).await
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn fetch_active_orders(&self) -> DeskResult<Value> {
        self.get(&["api", "orders", "active"]).await
    }

    async fn fetch_order_history(&self) -> DeskResult<Value> {
        self.get(&["api", "orders", "history"]).await
    }

    async fn fetch_catalog_parts(&self) -> DeskResult<Value> {
        self.get(&["api", "inventory", "parts"]).await
    }

    async fn create_ordered_parts(
        &self,
        ticket_number: &str,
        items: &[NewOrderedPart],
    ) -> DeskResult<Value> {
        let body = json!({ "ticket_number": ticket_number, "items": items });
        self.request(Method::POST, &["api", "orders", "parts"], Some(body))
            .await
    }

    async fn update_part_status(&self, part_id: i64, status: PartStatus) -> DeskResult<()> {
        let part_id = part_id.to_string();
        let path = ["api", "orders", "parts", part_id.as_str(), "status"];
        self.request(Method::PUT, &path, Some(json!({ "status": status.as_str() })))
            .await
            .map(|_| ())
    }

    async fn update_ticket_status(
        &self,
        ticket_id: i64,
        status: &TicketStatus,
        completion_date: Option<DateTime<Utc>>,
    ) -> DeskResult<()> {
        let ticket_id = ticket_id.to_string();
        let path = ["api", "tickets", ticket_id.as_str(), "status"];
        let body = json!({
            "status": status.as_str(),
            "completion_date": completion_date.map(rfc3339),
        });
        self.request(Method::PATCH, &path, Some(body))
            .await
            .map(|_| ())
    }

    async fn create_outsourced_part(&self, request: &OutsourceRequest) -> DeskResult<Value> {
        let body = serde_json::to_value(request)
            .map_err(|e| DeskError::Validation(format!("Invalid outsourcing request: {e}")))?;
        self.request(Method::POST, &["api", "outsourced-parts"], Some(body))
            .await
    }

    async fn fetch_outsourced_parts(&self, ticket_numbers: &[String]) -> DeskResult<Value> {
        let body = json!({ "ticket_numbers": ticket_numbers });
        self.request(Method::POST, &["api", "outsourced-parts", "lookup"], Some(body))
            .await
    }

    async fn fetch_purchase_orders(&self) -> DeskResult<Value> {
        self.get(&["api", "purchase-orders"]).await
    }

    async fn create_purchase_order(&self, order: &NewPurchaseOrder) -> DeskResult<Value> {
        let body = serde_json::to_value(order)
            .map_err(|e| DeskError::Validation(format!("Invalid purchase order: {e}")))?;
        self.request(Method::POST, &["api", "purchase-orders"], Some(body))
            .await
    }

    async fn update_purchase_order_status(
        &self,
        po_number: &str,
        status: &PoStatus,
    ) -> DeskResult<()> {
        let path = ["api", "purchase-orders", po_number, "status"];
        self.request(Method::PUT, &path, Some(json!({ "status": status.as_str() })))
            .await
            .map(|_| ())
    }

    async fn fetch_suppliers(&self) -> DeskResult<Value> {
        self.get(&["api", "suppliers"]).await
    }

    async fn fetch_inventory(&self) -> DeskResult<Value> {
        self.get(&["api", "inventory"]).await
    }

    async fn fetch_audit_log(&self) -> DeskResult<Value> {
        self.get(&["api", "audit-log"]).await
    }

    async fn save_proforma_invoice(&self, invoice: &ProformaInvoice) -> DeskResult<Value> {
        let body = serde_json::to_value(invoice)
            .map_err(|e| DeskError::Validation(format!("Invalid invoice: {e}")))?;
        self.request(Method::POST, &["api", "proforma-invoices"], Some(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_status_keeps_body() {
        let err = error_for_status(StatusCode::CONFLICT, r#"{"message":"duplicate"}"#);
        assert_eq!(
            err,
            DeskError::Conflict {
                body: r#"{"message":"duplicate"}"#.into()
            }
        );
    }

    #[test]
    fn unauthorized_maps_to_session_expired() {
        assert_eq!(
            error_for_status(StatusCode::UNAUTHORIZED, ""),
            DeskError::SessionExpired
        );
    }

    #[test]
    fn server_message_is_preserved() {
        let err = error_for_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"success":false,"message":"Quantity exceeds stock"}"#,
        );
        assert_eq!(
            err,
            DeskError::Transport {
                status: Some(422),
                message: "Quantity exceeds stock (HTTP 422)".into()
            }
        );
    }

    #[test]
    fn identifiers_are_escaped_as_single_path_segments() {
        let base = Url::parse(&normalize_gateway_url("desk.example.com/")).unwrap();
        let url = endpoint(&base, &["api", "purchase-orders", "PO 7/A#1", "status"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://desk.example.com/api/purchase-orders/PO%207%2FA%231/status"
        );

        let nested = Url::parse("https://host.example.com/backend").unwrap();
        let url = endpoint(&nested, &["api", "orders", "active"]).unwrap();
        assert_eq!(url.as_str(), "https://host.example.com/backend/api/orders/active");
    }

    #[test]
    fn plain_text_body_falls_back_to_status_message() {
        let err = error_for_status(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.to_string(), "Server error (HTTP 502)");
    }
}
