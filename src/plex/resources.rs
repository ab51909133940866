//! Server connection discovery for a freshly exchanged auth token.

use super::client::PlexClient;
use crate::error::AppError;
use crate::logging::{ActionLevel, RequestContext};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn parse(protocol: &str) -> Option<Self> {
        match protocol.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlexServerConnection {
    pub server_name: String,
    pub server_identifier: String,
    pub address: String,
    pub port: u16,
    pub scheme: Scheme,
    pub local: bool,
    pub relay: bool,
    /// Canonical `scheme://host:port`.
    pub uri: String,
}

impl PlexServerConnection {
    /// Local first, then https first, then by server name and uri.
    pub fn preference(&self, other: &Self) -> Ordering {
        other
            .local
            .cmp(&self.local)
            .then_with(|| other.scheme.cmp(&self.scheme))
            .then_with(|| self.server_name.cmp(&other.server_name))
            .then_with(|| self.uri.cmp(&other.uri))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexResource {
    name: String,
    client_identifier: String,
    #[serde(default)]
    provides: String,
    #[serde(default)]
    connections: Vec<PlexConnection>,
}

#[derive(Debug, Deserialize)]
struct PlexConnection {
    protocol: String,
    address: String,
    port: u16,
    #[serde(default)]
    local: bool,
    #[serde(default)]
    relay: bool,
}

fn flatten(resources: Vec<PlexResource>) -> (Vec<PlexServerConnection>, usize) {
    let mut skipped = 0;
    let mut connections = Vec::new();
    for resource in resources {
        if !resource.provides.split(',').any(|p| p.trim() == "server") {
            continue;
        }
        for conn in resource.connections {
            let Some(scheme) = Scheme::parse(&conn.protocol) else {
                skipped += 1;
                continue;
            };
            connections.push(PlexServerConnection {
                server_name: resource.name.clone(),
                server_identifier: resource.client_identifier.clone(),
                uri: format!("{}://{}:{}", scheme.as_str(), conn.address, conn.port),
                address: conn.address,
                port: conn.port,
                scheme,
                local: conn.local,
                relay: conn.relay,
            });
        }
    }
    connections.sort_by(PlexServerConnection::preference);
    (connections, skipped)
}

/// Lists every connection advertised by every server the token owns.
pub async fn get_server_connections(
    plex: &PlexClient,
    ctx: &RequestContext,
    auth_token: &str,
) -> Result<Vec<PlexServerConnection>, AppError> {
    let action = ctx
        .current_action()
        .add_sub_action("Plex: List Server Connections", ActionLevel::Info);

    let request = plex
        .get("/api/v2/resources")
        .query(&[("includeHttps", "1"), ("includeRelay", "1")])
        .header("X-Plex-Token", auth_token);

    let outcome = plex
        .send_json::<Vec<PlexResource>>(ctx, "resources", request)
        .await
        .map(flatten);

    let result = match outcome {
        Ok((connections, skipped)) => {
            action.append_result("connections", &connections.len());
            if skipped > 0 {
                action.append_result("skipped_unknown_protocol", &skipped);
            }
            Ok(connections)
        }
        Err(err) => {
            action.record_error(&err);
            Err(err)
        }
    };
    action.complete();
    result
}
