//! HTTP plumbing shared by every Plex call: identity headers, the hard
//! deadline, cancellation and status/body checks.

use crate::error::AppError;
use crate::logging::RequestContext;
use reqwest::{header::ACCEPT, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Hard deadline for every outbound Plex call.
pub const PLEX_TIMEOUT: Duration = Duration::from_secs(10);

/// The stable client/product/device/platform/version tuple Plex expects on
/// every request. Built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct PlexIdentity {
    pub client_id: String,
    pub product: String,
    pub device: String,
    pub platform: String,
    pub version: String,
}

impl PlexIdentity {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(ACCEPT, "application/json")
            .header("X-Plex-Client-Identifier", &self.client_id)
            .header("X-Plex-Product", &self.product)
            .header("X-Plex-Device", &self.device)
            .header("X-Plex-Platform", &self.platform)
            .header("X-Plex-Version", &self.version)
    }
}

#[derive(Clone)]
pub struct PlexClient {
    http: Client,
    base_url: String,
    identity: Arc<PlexIdentity>,
    timeout: Duration,
}

impl PlexClient {
    pub fn new(identity: PlexIdentity, base_url: &str) -> Result<Self, AppError> {
        let http = Client::builder()
            .build()
            .map_err(|e| AppError::internal("Plex Client Setup Failed", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            identity: Arc::new(identity),
            timeout: PLEX_TIMEOUT,
        })
    }

    /// Overrides the deadline. Tests use short deadlines against slow stubs.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn identity(&self) -> &PlexIdentity {
        &self.identity
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.identity.apply(self.http.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.identity.apply(self.http.post(self.url(path)))
    }

    /// Sends `request` and decodes a JSON body. One attempt, no retry.
    ///
    /// `target` names the call in error contexts. Non-2xx statuses come back as
    /// `Upstream` errors carrying `status_code`.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        target: &str,
        request: RequestBuilder,
    ) -> Result<T, AppError> {
        let call = async {
            let response = request.send().await.map_err(|e| transport_error(target, &e))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(target, &e))?;
            if !status.is_success() {
                let text = String::from_utf8_lossy(&body);
                return Err(AppError::upstream(target, status.as_u16(), &truncate(&text, 512)));
            }
            serde_json::from_slice::<T>(&body).map_err(|e| AppError::parse(target, e))
        };

        tokio::select! {
            _ = ctx.cancel_signal().cancelled() => Err(AppError::cancelled(target)),
            outcome = tokio::time::timeout(self.timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(target, self.timeout.as_secs().max(1))),
            },
        }
    }
}

fn transport_error(target: &str, err: &reqwest::Error) -> AppError {
    if err.is_timeout() {
        return AppError::timeout(target, PLEX_TIMEOUT.as_secs());
    }
    AppError::new(
        crate::error::ErrorKind::Upstream,
        "Plex Unreachable",
        "Check the server's internet connection and try again",
    )
    .with_context("target", target)
    .with_context("detail", err.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
