//! Outermost request middleware: binds the logging context, runs the handler
//! on its own task and returns whatever the handler wrote.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use std::any::Any;
use tracing::Instrument;

use crate::error::{AppError, ErrorKind};
use crate::logging::{cancel_pair, create_logging_context, send_json, ActionLevel, ResponseWriter};
use crate::routes::AppState;

/// - Binds a `LogDocument` (root action = request path) and a `ResponseWriter`.
/// - If this future is dropped (client gone), the request's cancel signal
///   fires and in-flight Plex calls abort with `Cancelled`.
/// - A handler panic becomes a 500 envelope with an `InternalPanic` error.
/// - The handler task stays inside the caller's span (`TraceLayer`'s request span).
pub async fn log_request(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let (_cancel_on_drop, cancel) = cancel_pair();
    let writer = ResponseWriter::new();
    req.extensions_mut().insert(cancel);
    req.extensions_mut().insert(writer.clone());
    let ctx = create_logging_context(req.extensions_mut(), &path, state.config.log_level);

    match tokio::spawn(next.run(req).instrument(tracing::Span::current())).await {
        Ok(response) => writer.take().unwrap_or(response),
        Err(join_error) => {
            let detail = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "handler task was aborted".to_string()
            };
            tracing::error!(path = %path, %detail, "handler panicked");

            let err = AppError::new(
                ErrorKind::InternalPanic,
                "Internal Panic",
                "Report this issue with the log below",
            )
            .with_context("detail", detail);
            ctx.log()
                .add_action("Recover Handler Panic", ActionLevel::Error)
                .fail(&err);
            send_json::<Value>(&writer, Some(ctx.log()), None);
            writer.take().unwrap_or_else(|| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({ "status": "error", "message": "Internal Panic" })),
                )
                    .into_response()
            })
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_http;
    use crate::test_support::test_state;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;
    use tower_http::trace::TraceLayer;

    async fn boom() -> &'static str {
        panic!("handler exploded")
    }

    async fn current_span_name() -> String {
        tracing::Span::current()
            .metadata()
            .map(|m| m.name())
            .unwrap_or("none")
            .to_string()
    }

    #[tokio::test]
    async fn handler_task_keeps_the_request_span() {
        let _subscriber = tracing::subscriber::set_default(tracing_subscriber::registry());
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf(), "http://127.0.0.1:9");
        let app = Router::new()
            .route("/span", get(current_span_name))
            .layer(from_fn_with_state(state.clone(), log_request))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/span")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"request");
    }

    #[tokio::test]
    async fn handler_panic_becomes_500_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path().to_path_buf(), "http://127.0.0.1:9");
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(from_fn_with_state(state.clone(), log_request))
            .with_state(state);

        let (status, body) = test_http::get(app, "/boom").await;
        assert_eq!(status, 500);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Internal Panic");
        assert_eq!(test_http::child_names(&body), vec!["Recover Handler Panic"]);
        let error = &body["log"]["children"][0]["error"];
        assert_eq!(error["context"]["kind"], "InternalPanic");
        assert_eq!(error["context"]["detail"], "handler exploded");
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic payload");
    }
}
