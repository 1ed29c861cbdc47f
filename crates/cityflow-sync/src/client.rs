//! [`StreamClient`]: a self-healing feed of live snapshots.
//!
//! [`StreamClient::attach`] starts a sync session and returns a
//! [`SyncHandle`]. The session runs on a driver task that owns the
//! [`SessionState`] and consumes [`SessionEvent`]s from an unbounded
//! channel. Every effect the state machine asks for becomes a spawned task
//! (push reader, reconnect timer, poll timer, poll request) whose handle is
//! kept in the session, so teardown is a single pass over what is stored.
//! Timers and polls are aborted outright. The push reader is asked to shut
//! down so the transport can close cleanly, and gets [`CLOSE_GRACE`] to do
//! so.
//!
//! The listener sits behind a gate. [`SyncHandle::detach`] closes the gate
//! before anything else and waits for a delivery in progress on another
//! thread to finish, so the listener is never invoked once `detach`
//! returns. Detaching from inside the listener is allowed.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cityflow_types::StateSnapshot;
use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::codec::decode_push_payload;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::session::{Effect, SessionEvent, SessionPhase, SessionState, transition};
use crate::transport::{PullSource, PushConnector, PushStream};
use crate::ws::WsConnector;

/// Callback receiving snapshots in arrival order.
type Listener = Box<dyn FnMut(StateSnapshot) + Send>;

/// Sender half of a session's event queue.
type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// How long a push reader may spend closing its transport after shutdown
/// was requested.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Keeps one listener supplied with live snapshots.
///
/// Push delivery over `C` is preferred; while it is down, snapshots are
/// polled from `P` every [`SyncConfig::fallback_poll_interval`] and the
/// push transport is reopened after [`SyncConfig::reconnect_delay`].
pub struct StreamClient<C = WsConnector, P = ApiClient> {
    config: Arc<SyncConfig>,
    connector: Arc<C>,
    pull: Arc<P>,
}

impl StreamClient<WsConnector, ApiClient> {
    /// Create a client that streams over `WebSocket` and polls over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] or [`SyncError::InvalidUrl`] if the
    /// configuration is unusable.
    pub fn from_config(config: SyncConfig) -> Result<Self, SyncError> {
        let pull = ApiClient::new(&config)?;
        Self::new(config, WsConnector::new(), pull)
    }
}

impl<C: PushConnector, P: PullSource> StreamClient<C, P> {
    /// Create a client over explicit transports.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] or [`SyncError::InvalidUrl`] if the
    /// configuration is unusable.
    pub fn new(config: SyncConfig, connector: C, pull: P) -> Result<Self, SyncError> {
        config.validate()?;
        config.push_endpoint()?;
        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            pull: Arc::new(pull),
        })
    }

    /// The configuration sessions are started with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start a sync session delivering snapshots to `listener`.
    ///
    /// Must be called from within a Tokio runtime. The session runs until
    /// the returned handle is detached or dropped. Failures never reach
    /// the caller: they are logged and the session falls back, reconnects
    /// or skips the message.
    pub fn attach<F>(&self, listener: F) -> SyncHandle
    where
        F: FnMut(StateSnapshot) + Send + 'static,
    {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, effects) = SessionState::start();

        let mut session = Session {
            state,
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            pull: Arc::clone(&self.pull),
            events,
            push_shutdown: None,
            reconnect_timer: None,
            poll_timer: None,
            poll_request: None,
        };
        session.execute(effects);

        let shared = Arc::new(Shared {
            session: Mutex::new(session),
            gate: ListenerGate::new(Box::new(listener)),
            driver: Mutex::new(None),
        });

        let driver = tokio::spawn(drive(Arc::clone(&shared), receiver));
        *shared.driver.lock() = Some(driver.abort_handle());

        info!(
            api_url = %self.config.api_url,
            fallback_poll_ms = self.config.fallback_poll_interval.as_millis(),
            reconnect_delay_ms = self.config.reconnect_delay.as_millis(),
            "sync session attached"
        );

        SyncHandle { control: shared }
    }
}

impl<C, P> fmt::Debug for StreamClient<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Handle to an attached sync session.
///
/// Dropping the handle detaches the session.
pub struct SyncHandle {
    control: Arc<dyn SessionControl>,
}

impl SyncHandle {
    /// Tear the session down.
    ///
    /// Closes the push transport, disarms the reconnect and poll timers,
    /// and aborts any in-flight poll. Once this returns the listener is
    /// never called again. Calling it more than once is harmless.
    pub fn detach(&self) {
        self.control.detach();
    }

    /// Current phase of the session.
    pub fn phase(&self) -> SessionPhase {
        self.control.phase()
    }

    /// Whether the session has been detached.
    pub fn is_detached(&self) -> bool {
        self.phase() == SessionPhase::Detached
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.control.detach();
    }
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("phase", &self.phase())
            .finish()
    }
}

/// Type-erased access to a session for [`SyncHandle`].
trait SessionControl: Send + Sync {
    fn detach(&self);
    fn phase(&self) -> SessionPhase;
}

/// State shared between the handle and the driver task.
struct Shared<C, P> {
    session: Mutex<Session<C, P>>,
    gate: ListenerGate,
    driver: Mutex<Option<AbortHandle>>,
}

impl<C: PushConnector, P: PullSource> SessionControl for Shared<C, P> {
    fn detach(&self) {
        self.gate.close();
        let was_attached = {
            let mut session = self.session.lock();
            let was_attached = !session.state.is_detached();
            // Detach produces no deliveries.
            let _ = session.handle(SessionEvent::Detach);
            was_attached
        };
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        if was_attached {
            info!("sync session detached");
        }
    }

    fn phase(&self) -> SessionPhase {
        self.session.lock().state.phase
    }
}

/// Gate in front of the listener.
///
/// The mutex is re-entrant so a listener may detach its own session; the
/// `RefCell` borrow then fails and the listener is released when the gate
/// is dropped instead.
struct ListenerGate {
    closed: AtomicBool,
    slot: ReentrantMutex<RefCell<Option<Listener>>>,
}

impl ListenerGate {
    fn new(listener: Listener) -> Self {
        Self {
            closed: AtomicBool::new(false),
            slot: ReentrantMutex::new(RefCell::new(Some(listener))),
        }
    }

    fn deliver(&self, snapshot: StateSnapshot) {
        let guard = self.slot.lock();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut slot) = guard.try_borrow_mut() else {
            return;
        };
        if let Some(listener) = slot.as_mut() {
            listener(snapshot);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let guard = self.slot.lock();
        if let Ok(mut slot) = guard.try_borrow_mut() {
            slot.take();
        }
    }
}

/// An issued poll request that has not completed yet.
struct InFlightPoll {
    request: u64,
    cancel: CancellationToken,
    task: AbortHandle,
}

impl InFlightPoll {
    fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Session state plus the handles of all work it has spawned.
struct Session<C, P> {
    state: SessionState,
    config: Arc<SyncConfig>,
    connector: Arc<C>,
    pull: Arc<P>,
    events: EventSender,
    push_shutdown: Option<CancellationToken>,
    reconnect_timer: Option<AbortHandle>,
    poll_timer: Option<AbortHandle>,
    poll_request: Option<InFlightPoll>,
}

impl<C: PushConnector, P: PullSource> Session<C, P> {
    /// Apply one event and return the snapshots to deliver.
    fn handle(&mut self, event: SessionEvent) -> Vec<StateSnapshot> {
        match &event {
            SessionEvent::PushFailed { connection, error: cause }
                if *connection == self.state.connection && !self.state.is_detached() =>
            {
                if cause.is_recoverable() {
                    warn!(connection, error = %cause, "push transport down, polling for state");
                } else {
                    error!(connection, error = %cause, "push endpoint unusable, polling for state");
                }
            }
            SessionEvent::PollCompleted { request, result } if *request == self.state.poll => {
                if self.poll_request.as_ref().is_some_and(|poll| poll.request == *request) {
                    self.poll_request = None;
                }
                if let Err(cause) = result {
                    if cause.is_recoverable() {
                        debug!(request, error = %cause, "fallback poll failed");
                    } else {
                        warn!(request, error = %cause, "fallback poll cannot succeed");
                    }
                }
            }
            _ => {}
        }

        let previous = self.state.phase;
        let (next, effects) = transition(self.state, event);
        self.state = next;
        if next.phase != previous {
            info!(from = ?previous, to = ?next.phase, "sync session phase changed");
        }
        self.execute(effects)
    }

    /// Run effects, collecting deliveries for the caller.
    fn execute(&mut self, effects: Vec<Effect>) -> Vec<StateSnapshot> {
        let mut deliveries = Vec::new();
        for effect in effects {
            match effect {
                Effect::OpenPush { connection } => self.open_push(connection),
                Effect::ClosePush => self.close_push(),
                Effect::ScheduleReconnect => {
                    abort(self.reconnect_timer.take());
                    let delay = self.config.reconnect_delay;
                    debug!(delay_ms = delay.as_millis(), "push reconnect scheduled");
                    self.reconnect_timer = Some(self.after(delay, SessionEvent::ReconnectDue));
                }
                Effect::CancelReconnect => abort(self.reconnect_timer.take()),
                Effect::IssuePoll { request } => self.issue_poll(request),
                Effect::SchedulePoll => {
                    abort(self.poll_timer.take());
                    let interval = self.config.fallback_poll_interval;
                    self.poll_timer = Some(self.after(interval, SessionEvent::PollDue));
                }
                Effect::StopPolling => {
                    abort(self.poll_timer.take());
                    if let Some(poll) = self.poll_request.take() {
                        poll.abort();
                    }
                }
                Effect::Deliver(snapshot) => deliveries.push(snapshot),
            }
        }
        deliveries
    }

    fn open_push(&mut self, connection: u64) {
        self.close_push();
        // Resolved per attempt; the configuration itself never changes
        // within a session.
        let endpoint = self.config.push_endpoint();
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        let shutdown = CancellationToken::new();
        self.push_shutdown = Some(shutdown.clone());
        tokio::spawn(read_push(connector, endpoint, connection, events, shutdown));
    }

    fn close_push(&mut self) {
        if let Some(shutdown) = self.push_shutdown.take() {
            shutdown.cancel();
        }
    }

    fn issue_poll(&mut self, request: u64) {
        if let Some(previous) = self.poll_request.take() {
            debug!(request, "superseding outstanding poll");
            previous.abort();
        }
        let cancel = CancellationToken::new();
        let pull = Arc::clone(&self.pull);
        let events = self.events.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let result = pull.fetch_state(token).await;
            let _ = events.send(SessionEvent::PollCompleted { request, result });
        });
        self.poll_request = Some(InFlightPoll {
            request,
            cancel,
            task: task.abort_handle(),
        });
    }

    /// Spawn a timer that sends `event` after `delay`.
    fn after(&self, delay: Duration, event: SessionEvent) -> AbortHandle {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
        .abort_handle()
    }
}

fn abort(handle: Option<AbortHandle>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// Driver loop: apply events in arrival order, deliver outside the lock.
async fn drive<C: PushConnector, P: PullSource>(
    shared: Arc<Shared<C, P>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        let deliveries = shared.session.lock().handle(event);
        for snapshot in deliveries {
            shared.gate.deliver(snapshot);
        }
    }
}

/// Open one push connection and forward what it yields as events.
///
/// Ends with exactly one [`SessionEvent::PushFailed`] unless `shutdown`
/// fires or the session is gone.
async fn read_push<C: PushConnector>(
    connector: Arc<C>,
    endpoint: Result<Url, SyncError>,
    connection: u64,
    events: EventSender,
    shutdown: CancellationToken,
) {
    let error = match endpoint {
        Err(error) => error,
        Ok(endpoint) => {
            let connected = tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                result = connector.connect(endpoint.as_str(), shutdown.clone()) => result,
            };
            match connected {
                Err(error) => error,
                Ok(stream) => match forward(stream, connection, &events, &shutdown).await {
                    Some(error) => error,
                    None => return,
                },
            }
        }
    };
    let _ = events.send(SessionEvent::PushFailed { connection, error });
}

/// Forward one open stream until it fails or shutdown is requested.
///
/// Returns the error that ended the stream, or `None` if it was shut down
/// or the session is gone.
async fn forward(
    mut stream: PushStream,
    connection: u64,
    events: &EventSender,
    shutdown: &CancellationToken,
) -> Option<SyncError> {
    if events.send(SessionEvent::PushOpened { connection }).is_err() {
        return None;
    }
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            next = stream.next() => Some(next),
        };
        let Some(next) = next else {
            // The transport sees the same token and finishes its close
            // handshake; keep polling it until it ends.
            let drain = async { while stream.next().await.is_some() {} };
            if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
                debug!(connection, "push transport did not close in time");
            }
            return None;
        };
        match next {
            Some(Ok(text)) => match decode_push_payload(&text) {
                Ok(snapshot) => {
                    let event = SessionEvent::PushSnapshot {
                        connection,
                        snapshot,
                    };
                    if events.send(event).is_err() {
                        return None;
                    }
                }
                Err(error) => {
                    warn!(connection, error = %error, "dropping malformed state payload");
                }
            },
            Some(Err(SyncError::MalformedPayload(reason))) => {
                warn!(connection, reason = %reason, "dropping undecodable frame");
            }
            Some(Err(error)) => return Some(error),
            None => return Some(SyncError::UnexpectedClose),
        }
    }
}
