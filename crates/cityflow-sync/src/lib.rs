//! Live telemetry synchronization for the CityFlow operator dashboard.
//!
//! [`StreamClient`] keeps a single listener supplied with the latest
//! [`StateSnapshot`](cityflow_types::StateSnapshot) for as long as it is
//! attached. Snapshots are pushed over the state `WebSocket` when it is
//! reachable and pulled from `GET /state` when it is not. The client hands
//! over between the two without gaps and reconnects the push transport in
//! the background.
//!
//! # Modules
//!
//! - [`api`] -- `reqwest` client for the CityFlow REST API (state, replay
//!   history, metrics, run listing)
//! - [`client`] -- [`StreamClient`] and its [`SyncHandle`]
//! - [`codec`] -- Decoding of push payloads into snapshots
//! - [`config`] -- Environment-driven configuration and endpoint resolution
//! - [`error`] -- [`SyncError`]
//! - [`session`] -- The pure session state machine driving the client
//! - [`transport`] -- Push and pull transport traits
//! - [`ws`] -- `WebSocket` push transport built on `tokio-tungstenite`

pub mod api;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod ws;

pub use api::ApiClient;
pub use client::{StreamClient, SyncHandle};
pub use config::SyncConfig;
pub use error::SyncError;
pub use session::SessionPhase;
pub use transport::{PullSource, PushConnector, PushStream};
pub use ws::WsConnector;
