//! Per-request logging context.
//!
//! The context bundles the request's `LogDocument`, the action helpers should
//! log under, and the request's cancellation signal. It lives in the request
//! extensions so middleware and handlers share one document.

use super::action::Action;
use super::document::LogDocument;
use super::level::ActionLevel;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, Extensions};
use std::convert::Infallible;
use tokio::sync::watch;

/// Fires when the request is abandoned (the connection future was dropped).
#[derive(Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the sender
    /// is gone without having cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Cancels the paired `CancelSignal` when dropped.
pub struct CancelOnDrop(watch::Sender<bool>);

impl CancelOnDrop {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub fn cancel_pair() -> (CancelOnDrop, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelOnDrop(tx), CancelSignal(rx))
}

#[derive(Clone)]
pub struct RequestContext {
    log: LogDocument,
    current: Action,
    cancel: CancelSignal,
}

impl RequestContext {
    pub fn new(log: LogDocument, cancel: CancelSignal) -> Self {
        let current = log.root();
        Self { log, current, cancel }
    }

    pub fn log(&self) -> &LogDocument {
        &self.log
    }

    /// The action nested helpers should attach their sub-actions to.
    pub fn current_action(&self) -> &Action {
        &self.current
    }

    /// Returns a context whose current action is `action`.
    pub fn with_current_action(&self, action: &Action) -> Self {
        Self {
            log: self.log.clone(),
            current: action.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

/// Binds a fresh `LogDocument` to the request, or returns the one already
/// bound. The root action is named after `path`.
pub fn create_logging_context(
    extensions: &mut Extensions,
    path: &str,
    min_level: ActionLevel,
) -> RequestContext {
    if let Some(existing) = extensions.get::<RequestContext>() {
        return existing.clone();
    }

    let cancel = extensions
        .get::<CancelSignal>()
        .cloned()
        .unwrap_or_else(CancelSignal::never);
    let ctx = RequestContext::new(LogDocument::new(path, min_level), cancel);
    extensions.insert(ctx.clone());
    ctx
}

/// Handlers take `ctx: RequestContext` directly.
///
/// In the router `log_request` always binds the document first, with the
/// configured `LOG_LEVEL`, and this extractor returns that one. The
/// `ActionLevel::Info` fallback below is only reached when a handler is
/// mounted without the middleware, as some unit tests do.
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let path = parts.uri.path().to_owned();
        Ok(create_logging_context(
            &mut parts.extensions,
            &path,
            ActionLevel::Info,
        ))
    }
}
