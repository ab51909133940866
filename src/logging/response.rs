//! The single HTTP response emitter.
//!
//! Handlers never build JSON responses themselves: they call [`send_json`]
//! with the request's `ResponseWriter`, and the status, message and diagnostic
//! log are all derived from the action tree.

use super::document::LogDocument;
use super::level::ActionLevel;
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header::CONTENT_TYPE, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Default)]
struct Slot {
    written: bool,
    response: Option<Response>,
}

/// Write-once response slot for one request.
///
/// The logging middleware places a writer in the request extensions and
/// returns whatever was written to it.
#[derive(Clone, Default)]
pub struct ResponseWriter {
    slot: Arc<Mutex<Slot>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `response` unless something was already written.
    pub fn write(&self, response: Response) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.written {
            return false;
        }
        slot.written = true;
        slot.response = Some(response);
        true
    }

    pub fn has_written(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .written
    }

    pub fn take(&self) -> Option<Response> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .response
            .take()
    }
}

impl IntoResponse for ResponseWriter {
    fn into_response(self) -> Response {
        // Empty when the middleware is expected to pick the response up.
        self.take()
            .unwrap_or_else(|| StatusCode::NO_CONTENT.into_response())
    }
}

impl<S> FromRequestParts<S> for ResponseWriter
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(writer) = parts.extensions.get::<ResponseWriter>() {
            return Ok(writer.clone());
        }
        let writer = ResponseWriter::new();
        parts.extensions.insert(writer.clone());
        Ok(writer)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    status: &'a str,
    elapsed: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    log: super::document::ActionRecord,
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(CONTENT_TYPE, JSON_CONTENT_TYPE)], Body::from(body)).into_response()
}

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Closes the document, derives the status and writes the envelope
/// `{status, elapsed, message, data, log}` to `w`.
///
/// - `log` of `None` writes `500 {status:"error", message:"no log"}`.
/// - `data` of `None` omits the field; data that fails to serialize becomes
///   `null` and is reported on a root action.
/// - A second call writes nothing and records `emit-called-twice` on the root.
pub fn send_json<T>(w: &ResponseWriter, log: Option<&LogDocument>, data: Option<&T>)
where
    T: Serialize + ?Sized,
{
    let Some(log) = log else {
        tracing::error!("response emitter called without a log document");
        let body = json!({ "status": "error", "message": "no log" }).to_string();
        w.write(json_response(StatusCode::INTERNAL_SERVER_ERROR, body.into_bytes()));
        return;
    };

    if w.has_written() {
        tracing::warn!(path = log.path(), "response emitter called twice");
        log.record_late_warning("emit-called-twice");
        return;
    }

    let data = match data.map(serde_json::to_value).transpose() {
        Ok(value) => value,
        Err(e) => {
            let action = log.add_action("Serialize Response Data", ActionLevel::Warn);
            action.set_error(
                "Response Data Serialization Failed",
                "Report this issue, the response data could not be encoded",
                json!({ "detail": e.to_string() }),
            );
            action.complete();
            Some(Value::Null)
        }
    };

    log.close();
    let (code, status) = log.derive_status();
    let elapsed_ms = log.elapsed_ms();
    let envelope = Envelope {
        status,
        elapsed: format!("{}ms", elapsed_ms),
        message: log.message(),
        data,
        log: log.record(log.min_level()),
    };

    trace_request(log, code, elapsed_ms);

    let body = serde_json::to_vec(&envelope).unwrap_or_else(|e| {
        json!({ "status": "error", "message": format!("envelope encoding failed: {}", e) })
            .to_string()
            .into_bytes()
    });
    w.write(json_response(status_code(code), body));
}

fn trace_request(log: &LogDocument, code: u16, elapsed_ms: u64) {
    let path = log.path();
    let message = log.message();
    match log.aggregate_level() {
        ActionLevel::Error => tracing::error!(path, status = code, elapsed_ms, %message, "request finished"),
        ActionLevel::Warn => tracing::warn!(path, status = code, elapsed_ms, %message, "request finished"),
        ActionLevel::Info => tracing::info!(path, status = code, elapsed_ms, "request finished"),
        ActionLevel::Debug => tracing::debug!(path, status = code, elapsed_ms, "request finished"),
        ActionLevel::Trace => tracing::trace!(path, status = code, elapsed_ms, "request finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::collections::HashMap;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn immediate_flush_is_plain_success() {
        let log = LogDocument::new("/api/health", ActionLevel::Info);
        let w = ResponseWriter::new();
        send_json::<Value>(&w, Some(&log), None);

        let response = w.take().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);

        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "success");
        assert!(body.get("data").is_none());
        assert_eq!(body["log"]["name"], "/api/health");
        assert_eq!(body["log"]["children"], json!([]));
        assert!(body["elapsed"].as_str().unwrap().ends_with("ms"));
    }

    #[tokio::test]
    async fn every_action_is_closed_after_emit() {
        let log = LogDocument::new("/", ActionLevel::Info);
        let a = log.add_action("a", ActionLevel::Info);
        let b = a.add_sub_action("b", ActionLevel::Info);
        send_json(&ResponseWriter::new(), Some(&log), Some(&json!({ "x": 1 })));
        assert!(log.is_closed() && a.is_closed() && b.is_closed());
    }

    #[tokio::test]
    async fn children_and_results_keep_order() {
        let log = LogDocument::new("/", ActionLevel::Info);
        for name in ["A", "B", "C"] {
            log.add_action(name, ActionLevel::Info);
        }
        let c = log.root().children().pop().unwrap();
        c.append_result("k", &1);
        c.append_result("k", &2);
        c.complete();

        let w = ResponseWriter::new();
        send_json::<Value>(&w, Some(&log), None);
        let body = body_json(w.take().unwrap()).await;

        let names: Vec<&str> = body["log"]["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(body["log"]["children"][2]["results"], json!({ "k": 2 }));
    }

    #[tokio::test]
    async fn open_action_is_auto_closed_at_emit() {
        let log = LogDocument::new("/", ActionLevel::Info);
        let c = log.add_action("C", ActionLevel::Info);
        c.append_result("k", &1);
        c.append_result("k", &2);

        let w = ResponseWriter::new();
        send_json::<Value>(&w, Some(&log), None);
        let body = body_json(w.take().unwrap()).await;

        assert!(c.is_closed());
        assert_eq!(
            body["log"]["children"][0]["results"],
            json!({ "k": 2, "__auto_closed": true })
        );
    }

    #[tokio::test]
    async fn second_emit_writes_nothing_and_warns() {
        let log = LogDocument::new("/", ActionLevel::Info);
        let w = ResponseWriter::new();
        send_json(&w, Some(&log), Some(&json!({ "first": true })));
        send_json(&w, Some(&log), Some(&json!({ "second": true })));

        let body = body_json(w.take().unwrap()).await;
        assert_eq!(body["data"], json!({ "first": true }));
        assert!(w.take().is_none());

        let late: Vec<_> = log
            .root()
            .children()
            .into_iter()
            .filter(|a| a.name() == "emit-called-twice")
            .collect();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].level(), ActionLevel::Warn);
    }

    #[tokio::test]
    async fn missing_document_is_500() {
        let w = ResponseWriter::new();
        send_json::<Value>(&w, None, None);
        let response = w.take().unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "status": "error", "message": "no log" })
        );
    }

    #[tokio::test]
    async fn unserializable_data_becomes_null() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not valid JSON object keys");

        let log = LogDocument::new("/", ActionLevel::Info);
        let w = ResponseWriter::new();
        send_json(&w, Some(&log), Some(&bad));

        let response = w.take().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "warning");
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["message"], "Response Data Serialization Failed");
        assert_eq!(body["log"]["children"][0]["name"], "Serialize Response Data");
    }

    #[tokio::test]
    async fn cancelled_error_maps_to_499() {
        let log = LogDocument::new("/api/plex/pin", ActionLevel::Info);
        log.add_action("Plex: Request PIN", ActionLevel::Error)
            .set_error("Cancelled", "", Value::Null);
        let w = ResponseWriter::new();
        send_json::<Value>(&w, Some(&log), None);
        assert_eq!(w.take().unwrap().status().as_u16(), 499);
    }

    #[tokio::test]
    async fn log_is_filtered_by_document_level() {
        let log = LogDocument::new("/", ActionLevel::Warn);
        log.add_action("chatty", ActionLevel::Debug);
        log.add_action("important", ActionLevel::Warn);
        let w = ResponseWriter::new();
        send_json::<Value>(&w, Some(&log), None);

        let body = body_json(w.take().unwrap()).await;
        assert_eq!(body["log"]["children"].as_array().unwrap().len(), 1);
        assert_eq!(body["log"]["children"][0]["name"], "important");
    }
}
