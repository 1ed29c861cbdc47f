//! Integration tests for [`StreamClient`] session behavior.
//!
//! Both transports are in-memory fakes and the clock is Tokio's paused
//! test clock, so reconnect backoffs and poll intervals are stepped
//! explicitly with `tokio::time::advance`.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cityflow_sync::{
    PullSource, PushConnector, PushStream, SessionPhase, StreamClient, SyncConfig, SyncError,
    SyncHandle,
};
use cityflow_types::StateSnapshot;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

type PushSender = mpsc::UnboundedSender<Result<String, SyncError>>;

// ---------------------------------------------------------------------------
// Fake push transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PushScript {
    accepts: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, SyncError>>>>,
    endpoints: Mutex<Vec<String>>,
    shutdowns: Mutex<Vec<CancellationToken>>,
}

/// Accepts connections queued with [`FakePush::accept`], refuses the rest.
/// An accepted stream ends as soon as its shutdown token fires.
#[derive(Clone, Default)]
struct FakePush {
    script: Arc<PushScript>,
}

impl FakePush {
    fn accept(&self) -> PushSender {
        let (tx, rx) = mpsc::unbounded();
        self.script.accepts.lock().push_back(rx);
        tx
    }

    fn attempts(&self) -> usize {
        self.script.endpoints.lock().len()
    }

    fn shutdown(&self, index: usize) -> CancellationToken {
        self.script.shutdowns.lock().get(index).cloned().unwrap()
    }
}

impl PushConnector for FakePush {
    fn connect(
        &self,
        endpoint: &str,
        shutdown: CancellationToken,
    ) -> impl Future<Output = Result<PushStream, SyncError>> + Send {
        self.script.endpoints.lock().push(endpoint.to_owned());
        self.script.shutdowns.lock().push(shutdown.clone());
        let accepted = self.script.accepts.lock().pop_front();
        async move {
            accepted
                .map(|rx| rx.take_until(shutdown.cancelled_owned()).boxed())
                .ok_or_else(|| SyncError::TransportUnavailable("connection refused".to_owned()))
        }
    }
}

/// Refuses every connection with an error no retry can fix.
struct UnusablePush;

impl PushConnector for UnusablePush {
    fn connect(
        &self,
        endpoint: &str,
        _shutdown: CancellationToken,
    ) -> impl Future<Output = Result<PushStream, SyncError>> + Send {
        let error = SyncError::InvalidUrl(format!("{endpoint} is not a push endpoint"));
        async move { Err(error) }
    }
}

// ---------------------------------------------------------------------------
// Fake pull transport
// ---------------------------------------------------------------------------

enum PullReply {
    Snapshot(u64),
    Empty,
    Fail,
    Hang,
    /// Answers with snapshot `t` after the given delay.
    Slow(Duration, u64),
}

#[derive(Default)]
struct PullScript {
    replies: Mutex<VecDeque<PullReply>>,
    tokens: Mutex<Vec<CancellationToken>>,
    served: AtomicU64,
}

/// Serves queued replies; once the queue is empty every poll returns a
/// snapshot with `t = 1000 + n`.
#[derive(Clone, Default)]
struct FakePull {
    script: Arc<PullScript>,
}

impl FakePull {
    fn queue(&self, reply: PullReply) {
        self.script.replies.lock().push_back(reply);
    }

    fn calls(&self) -> usize {
        self.script.tokens.lock().len()
    }

    fn token(&self, index: usize) -> CancellationToken {
        self.script.tokens.lock().get(index).cloned().unwrap()
    }
}

impl PullSource for FakePull {
    fn fetch_state(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Option<StateSnapshot>, SyncError>> + Send {
        self.script.tokens.lock().push(cancel.clone());
        let n = self.script.served.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .replies
            .lock()
            .pop_front()
            .unwrap_or(PullReply::Snapshot(1000 + n));
        async move {
            match reply {
                PullReply::Snapshot(t) => Ok(Some(snapshot(t))),
                PullReply::Empty => Ok(None),
                PullReply::Fail => Err(SyncError::Http {
                    status: 503,
                    message: "Service Unavailable".to_owned(),
                }),
                PullReply::Hang => {
                    cancel.cancelled().await;
                    Err(SyncError::Cancelled)
                }
                PullReply::Slow(delay, t) => {
                    tokio::select! {
                        () = cancel.cancelled() => Err(SyncError::Cancelled),
                        () = tokio::time::sleep(delay) => Ok(Some(snapshot(t))),
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn snapshot(t: u64) -> StateSnapshot {
    StateSnapshot {
        t,
        ..StateSnapshot::default()
    }
}

fn message(t: u64) -> Result<String, SyncError> {
    Ok(serde_json::json!({"state": {"t": t, "status": "running", "vehicle_count": 1}}).to_string())
}

fn client(push: &FakePush, pull: &FakePull) -> StreamClient<FakePush, FakePull> {
    let config = SyncConfig::new("http://sim.test").unwrap();
    StreamClient::new(config, push.clone(), pull.clone()).unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl FnMut(StateSnapshot) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |snapshot: StateSnapshot| sink.lock().push(snapshot.t))
}

/// Let every runnable task make progress without moving the clock.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

// ---------------------------------------------------------------------------
// Push delivery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn delivers_pushed_snapshots_in_arrival_order() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    assert_eq!(handle.phase(), SessionPhase::Streaming);

    for t in [3, 1, 2] {
        tx.unbounded_send(message(t)).unwrap();
    }
    settle().await;

    assert_eq!(*seen.lock(), vec![3, 1, 2]);
    assert_eq!(pull.calls(), 0);
    assert_eq!(push.script.endpoints.lock().first().unwrap(), "ws://sim.test/ws/state");
}

#[tokio::test(start_paused = true)]
async fn malformed_message_does_not_stop_delivery() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;

    tx.unbounded_send(Ok("{not json".to_owned())).unwrap();
    tx.unbounded_send(message(8)).unwrap();
    settle().await;

    assert_eq!(*seen.lock(), vec![8]);
    assert_eq!(handle.phase(), SessionPhase::Streaming);
}

#[tokio::test(start_paused = true)]
async fn undecodable_frame_does_not_end_connection() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;

    tx.unbounded_send(Err(SyncError::MalformedPayload("binary".to_owned())))
        .unwrap();
    tx.unbounded_send(message(4)).unwrap();
    settle().await;

    assert_eq!(*seen.lock(), vec![4]);
    assert_eq!(handle.phase(), SessionPhase::Streaming);
    assert_eq!(pull.calls(), 0);
}

// ---------------------------------------------------------------------------
// Fallback and reconnect
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn connect_failure_delivers_within_one_poll_interval() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    advance(500).await;

    assert!(!seen.lock().is_empty());
    assert_eq!(handle.phase(), SessionPhase::FallbackPolling);
}

#[tokio::test(start_paused = true)]
async fn fallback_polls_every_interval_and_survives_failures() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    pull.queue(PullReply::Fail);
    pull.queue(PullReply::Empty);
    pull.queue(PullReply::Snapshot(7));
    let (seen, listener) = recorder();

    let _handle = client(&push, &pull).attach(listener);
    settle().await;
    assert_eq!(pull.calls(), 1);
    assert!(seen.lock().is_empty());

    advance(500).await;
    assert_eq!(pull.calls(), 2);
    assert!(seen.lock().is_empty());

    advance(500).await;
    assert_eq!(pull.calls(), 3);
    assert_eq!(*seen.lock(), vec![7]);
}

#[tokio::test(start_paused = true)]
async fn unusable_push_endpoint_still_falls_back_to_polling() {
    let pull = FakePull::default();
    pull.queue(PullReply::Snapshot(3));
    let config = SyncConfig::new("http://sim.test").unwrap();
    let (seen, listener) = recorder();

    let handle = StreamClient::new(config, UnusablePush, pull.clone())
        .unwrap()
        .attach(listener);
    settle().await;
    assert_eq!(handle.phase(), SessionPhase::FallbackPolling);

    advance(500).await;
    assert_eq!(pull.calls(), 2);
    assert_eq!(seen.lock().first(), Some(&3));
}

#[tokio::test(start_paused = true)]
async fn reconnect_is_attempted_after_backoff() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let (_seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    assert_eq!(push.attempts(), 1);

    advance(2_900).await;
    assert_eq!(push.attempts(), 1);

    advance(100).await;
    assert_eq!(push.attempts(), 2);
    assert_eq!(handle.phase(), SessionPhase::FallbackPolling);

    // Still refused: another attempt one backoff later.
    advance(3_000).await;
    assert_eq!(push.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn stream_loss_hands_over_to_polling_and_back() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let first = push.accept();
    let second = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    first.unbounded_send(message(1)).unwrap();
    settle().await;

    // Remote end goes away.
    drop(first);
    settle().await;
    assert_eq!(handle.phase(), SessionPhase::FallbackPolling);
    assert_eq!(pull.calls(), 1);
    assert_eq!(seen.lock().len(), 2);

    advance(3_000).await;
    assert_eq!(handle.phase(), SessionPhase::Streaming);
    assert_eq!(push.attempts(), 2);

    // The poller is gone once the stream is back.
    let polls = pull.calls();
    advance(2_000).await;
    assert_eq!(pull.calls(), polls);

    second.unbounded_send(message(2)).unwrap();
    settle().await;
    let seen = seen.lock();
    assert_eq!(seen.first(), Some(&1));
    assert_eq!(seen.last(), Some(&2));
    assert!(seen.iter().skip(1).rev().skip(1).all(|t| *t >= 1000));
}

#[tokio::test(start_paused = true)]
async fn receive_error_triggers_fallback() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    tx.unbounded_send(Err(SyncError::TransportRuntime("connection reset".to_owned())))
        .unwrap();
    settle().await;

    assert_eq!(handle.phase(), SessionPhase::FallbackPolling);
    assert_eq!(*seen.lock(), vec![1000]);
}

#[tokio::test(start_paused = true)]
async fn next_poll_waits_for_a_slow_request() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    for t in 1..=20 {
        pull.queue(PullReply::Slow(Duration::from_millis(600), t));
    }
    let (seen, listener) = recorder();

    let _handle = client(&push, &pull).attach(listener);
    settle().await;
    assert_eq!(pull.calls(), 1);

    // Each request takes longer than the poll interval. The next one is
    // issued an interval after the previous answer instead of cutting it
    // off.
    for _ in 0..100 {
        advance(100).await;
    }

    let seen = seen.lock();
    assert!(seen.len() >= 5, "only {} deliveries", seen.len());
    assert!(seen.windows(2).all(|pair| pair.first() < pair.get(1)));
    assert!((0..pull.calls()).all(|i| !pull.token(i).is_cancelled()));
}

#[tokio::test(start_paused = true)]
async fn resumed_stream_cancels_outstanding_poll() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let first = push.accept();
    let second = push.accept();
    pull.queue(PullReply::Hang);
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    drop(first);
    settle().await;
    assert_eq!(pull.calls(), 1);
    assert!(!pull.token(0).is_cancelled());

    // A request that never answers holds back the next poll.
    advance(2_000).await;
    assert_eq!(pull.calls(), 1);

    advance(1_000).await;
    assert_eq!(handle.phase(), SessionPhase::Streaming);
    assert!(pull.token(0).is_cancelled());

    drop(second);
    settle().await;
    assert_eq!(pull.calls(), 2);
    assert!(!pull.token(1).is_cancelled());
    assert_eq!(*seen.lock(), vec![1001]);
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn no_delivery_after_detach() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    let delivered = seen.lock().len();
    assert_eq!(delivered, 1);

    handle.detach();
    assert!(handle.is_detached());

    advance(10_000).await;
    assert_eq!(seen.lock().len(), delivered);
    assert_eq!(push.attempts(), 1);
    assert_eq!(pull.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn detach_aborts_in_flight_poll() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    pull.queue(PullReply::Hang);
    let (_seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    assert!(!pull.token(0).is_cancelled());

    handle.detach();
    assert!(pull.token(0).is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn message_in_transit_at_detach_is_dropped() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;

    tx.unbounded_send(message(1)).unwrap();
    handle.detach();
    settle().await;

    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn detach_closes_push_transport() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let (_seen, listener) = recorder();

    let handle = client(&push, &pull).attach(listener);
    settle().await;
    assert!(!tx.is_closed());

    handle.detach();
    assert!(push.shutdown(0).is_cancelled());
    settle().await;
    assert!(tx.is_closed());
}

#[tokio::test(start_paused = true)]
async fn detach_is_idempotent_and_drop_detaches() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let (seen, listener) = recorder();
    let client = client(&push, &pull);

    let handle = client.attach(listener);
    settle().await;
    handle.detach();
    handle.detach();
    drop(handle);

    let (dropped_seen, listener) = recorder();
    let dropped = client.attach(listener);
    settle().await;
    drop(dropped);

    advance(10_000).await;
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(dropped_seen.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn listener_may_detach_its_own_session() {
    let (push, pull) = (FakePush::default(), FakePull::default());
    let tx = push.accept();
    let slot: Arc<Mutex<Option<SyncHandle>>> = Arc::new(Mutex::new(None));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let listener = {
        let slot = Arc::clone(&slot);
        let seen = Arc::clone(&seen);
        move |snapshot: StateSnapshot| {
            seen.lock().push(snapshot.t);
            let handle = slot.lock().take();
            drop(handle);
        }
    };

    let handle = client(&push, &pull).attach(listener);
    *slot.lock() = Some(handle);
    settle().await;

    tx.unbounded_send(message(1)).unwrap();
    tx.unbounded_send(message(2)).unwrap();
    settle().await;

    assert_eq!(*seen.lock(), vec![1]);
    assert!(slot.lock().is_none());
}

#[test]
fn invalid_configuration_fails_at_construction() {
    let config = SyncConfig::new("http://sim.test")
        .unwrap()
        .with_reconnect_delay(Duration::ZERO);
    let result = StreamClient::new(config, FakePush::default(), FakePull::default());
    assert!(matches!(result, Err(SyncError::Config(_))));
}
