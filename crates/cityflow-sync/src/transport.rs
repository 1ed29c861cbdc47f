//! Push and pull transport traits.
//!
//! [`StreamClient`](crate::StreamClient) is generic over both transports
//! so production code runs on `WebSocket` + HTTP while tests inject
//! in-memory fakes. The traits return `Send` futures instead of using
//! `async fn` so the client can drive them on spawned tasks.

use std::future::Future;

use cityflow_types::StateSnapshot;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

/// Stream of raw push messages from one open connection.
///
/// Items are message texts. A [`SyncError::MalformedPayload`] item is a
/// single undecodable frame and does not end the connection; any other
/// error, or the end of the stream, does.
pub type PushStream = BoxStream<'static, Result<String, SyncError>>;

/// Opens push connections to the state stream.
pub trait PushConnector: Send + Sync + 'static {
    /// Open a connection to `endpoint`.
    ///
    /// Once `shutdown` fires the returned stream should close the
    /// connection on its side (a close frame, where the protocol has one)
    /// and then end.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] if the connection
    /// cannot be established.
    fn connect(
        &self,
        endpoint: &str,
        shutdown: CancellationToken,
    ) -> impl Future<Output = Result<PushStream, SyncError>> + Send;
}

/// Fetches the latest snapshot on demand.
pub trait PullSource: Send + Sync + 'static {
    /// Fetch the latest snapshot, or `None` if the simulator has not
    /// reported one yet.
    ///
    /// Implementations must stop work and return
    /// [`SyncError::Cancelled`] once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the request fails or is cancelled.
    fn fetch_state(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Option<StateSnapshot>, SyncError>> + Send;
}
