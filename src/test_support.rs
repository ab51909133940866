//! Shared helpers for unit tests: a local stand-in for plex.tv and a ready
//! application state pointing at it.

use crate::config::{AuthConfig, Config};
use crate::logging::ActionLevel;
use crate::middleware::auth::TokenAuth;
use crate::plex::{PlexClient, PlexIdentity};
use crate::routes::AppState;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn test_identity() -> PlexIdentity {
    PlexIdentity {
        client_id: "test-client-id".to_string(),
        product: "Aura".to_string(),
        device: "Aura Server".to_string(),
        platform: "Web".to_string(),
        version: "0.0.0-test".to_string(),
    }
}

pub fn test_config(config_path: PathBuf, plex_base_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        config_path,
        log_level: ActionLevel::Info,
        auth: None,
        plex_product: "Aura".to_string(),
        plex_device: "Aura Server".to_string(),
        plex_platform: "Web".to_string(),
        plex_base_url: plex_base_url.to_string(),
    }
}

/// State with auth disabled and a 10s Plex deadline.
pub fn test_state(config_path: PathBuf, plex_base_url: &str) -> AppState {
    let config = test_config(config_path, plex_base_url);
    let plex = PlexClient::new(test_identity(), plex_base_url).unwrap();
    AppState::new(config, plex)
}

pub fn with_plex_timeout(mut state: AppState, timeout: Duration) -> AppState {
    state.plex = state.plex.with_timeout(timeout);
    state
}

/// Enables bearer auth; returns the state and a valid token.
pub fn with_auth(mut state: AppState, secret: &str) -> (AppState, String) {
    let mut config = (*state.config).clone();
    config.auth = Some(AuthConfig {
        password_hash: String::new(),
        jwt_secret: secret.to_string(),
    });
    let token_auth = TokenAuth::new(secret, chrono::Duration::hours(1));
    let token = token_auth.issue("admin").unwrap();
    state.config = Arc::new(config);
    state.token_auth = Some(token_auth);
    (state, token)
}
