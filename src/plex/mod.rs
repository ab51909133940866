//! Plex PIN authenticator.
//!
//! - `client`: identity headers, deadline and cancellation for plex.tv calls
//! - `pin`: mint and poll a PIN
//! - `resources`: list the server connections an auth token can reach
//!
//! Every call records one sub-action under the context's current action.

pub mod client;
pub mod pin;
pub mod resources;

pub use client::{PlexClient, PlexIdentity, PLEX_TIMEOUT};
pub use pin::{check_pin, get_pin_code_and_id, PinSession, PinState};
pub use resources::{get_server_connections, PlexServerConnection, Scheme};
