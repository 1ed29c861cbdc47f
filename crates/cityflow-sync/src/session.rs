//! The session state machine behind [`StreamClient`](crate::StreamClient).
//!
//! All decisions a sync session makes live in [`transition`], a pure
//! function from the current [`SessionState`] and one [`SessionEvent`] to
//! the next state plus a list of [`Effect`]s. The client executes the
//! effects (opening sockets, arming timers, issuing polls) and feeds the
//! outcomes back in as events.
//!
//! ```text
//!             PushOpened                     PushFailed
//! Connecting ------------> Streaming ---------------------+
//!     |                        ^                          v
//!     | PushFailed             | PushOpened          FallbackPolling
//!     +------------------------+--------------------- (polls + reconnect)
//!
//! any state --Detach--> Detached
//! ```
//!
//! Every push attempt is numbered by a connection generation and every
//! poll by a request number. Events carrying an outdated number come from
//! work that has already been superseded and are ignored, which keeps
//! delivery in arrival order and lets exactly one transport feed the
//! listener at a time.

use std::fmt;

use cityflow_types::StateSnapshot;

use crate::error::SyncError;

/// Coarse phase of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// The first push connection is being opened.
    Connecting,
    /// The push transport is open and feeding the listener.
    Streaming,
    /// The push transport is down; polls feed the listener while a
    /// reconnect is pending or in progress.
    FallbackPolling,
    /// The session has been torn down. Terminal.
    Detached,
}

impl SessionPhase {
    /// Short label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::FallbackPolling => "fallback_polling",
            Self::Detached => "detached",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    /// Current phase.
    pub phase: SessionPhase,
    /// Generation of the latest push connection attempt.
    pub connection: u64,
    /// Number of the latest issued poll request.
    pub poll: u64,
    /// Whether the fallback poller is running.
    pub polling: bool,
    /// Whether a reconnect timer is armed.
    pub reconnect_scheduled: bool,
}

/// Something that happened to a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Push connection `connection` opened.
    PushOpened {
        /// Connection generation.
        connection: u64,
    },
    /// Push connection `connection` delivered a decoded snapshot.
    PushSnapshot {
        /// Connection generation.
        connection: u64,
        /// The decoded snapshot.
        snapshot: StateSnapshot,
    },
    /// Push connection `connection` failed to open, errored, or closed.
    PushFailed {
        /// Connection generation.
        connection: u64,
        /// Why the connection ended.
        error: SyncError,
    },
    /// The reconnect backoff elapsed.
    ReconnectDue,
    /// The fallback poll interval since the last completed poll elapsed.
    PollDue,
    /// Poll request `request` finished.
    PollCompleted {
        /// Request number.
        request: u64,
        /// The fetched snapshot, `None` if the API had none yet.
        result: Result<Option<StateSnapshot>, SyncError>,
    },
    /// The owner detached the session.
    Detach,
}

/// Work the client must perform after a transition.
#[derive(Debug, PartialEq)]
pub enum Effect {
    /// Open push connection `connection`, replacing any previous one.
    OpenPush {
        /// Connection generation to tag its events with.
        connection: u64,
    },
    /// Close the push connection, if any.
    ClosePush,
    /// Arm the reconnect timer.
    ScheduleReconnect,
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Abort any in-flight poll and issue poll `request`.
    IssuePoll {
        /// Request number to tag its completion with.
        request: u64,
    },
    /// Arm the poll timer, replacing any previous one. Emitted once the
    /// current poll has finished, whatever its outcome.
    SchedulePoll,
    /// Disarm the poll timer and abort any in-flight poll.
    StopPolling,
    /// Hand a snapshot to the listener.
    Deliver(StateSnapshot),
}

impl SessionState {
    /// Start a session: the first push connection is opened immediately.
    pub fn start() -> (Self, Vec<Effect>) {
        let state = Self {
            phase: SessionPhase::Connecting,
            connection: 1,
            poll: 0,
            polling: false,
            reconnect_scheduled: false,
        };
        (state, vec![Effect::OpenPush { connection: 1 }])
    }

    /// Whether the session has been detached.
    pub fn is_detached(&self) -> bool {
        self.phase == SessionPhase::Detached
    }
}

/// Compute the next state and the effects to run for one event.
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<Effect>) {
    if state.is_detached() {
        return (state, Vec::new());
    }

    match event {
        SessionEvent::PushOpened { connection } => {
            if connection != state.connection {
                return (state, Vec::new());
            }
            let mut effects = Vec::new();
            if state.polling {
                effects.push(Effect::StopPolling);
            }
            if state.reconnect_scheduled {
                effects.push(Effect::CancelReconnect);
            }
            let next = SessionState {
                phase: SessionPhase::Streaming,
                polling: false,
                reconnect_scheduled: false,
                ..state
            };
            (next, effects)
        }

        SessionEvent::PushSnapshot {
            connection,
            snapshot,
        } => {
            if state.phase == SessionPhase::Streaming && connection == state.connection {
                (state, vec![Effect::Deliver(snapshot)])
            } else {
                (state, Vec::new())
            }
        }

        SessionEvent::PushFailed { connection, .. } => {
            if connection != state.connection {
                return (state, Vec::new());
            }
            let mut next = SessionState {
                phase: SessionPhase::FallbackPolling,
                ..state
            };
            let mut effects = vec![Effect::ClosePush];
            if !state.polling {
                next.polling = true;
                next.poll = state.poll.saturating_add(1);
                effects.push(Effect::IssuePoll { request: next.poll });
            }
            if !state.reconnect_scheduled {
                next.reconnect_scheduled = true;
                effects.push(Effect::ScheduleReconnect);
            }
            (next, effects)
        }

        SessionEvent::ReconnectDue => {
            if !state.reconnect_scheduled {
                return (state, Vec::new());
            }
            let connection = state.connection.saturating_add(1);
            let next = SessionState {
                connection,
                reconnect_scheduled: false,
                ..state
            };
            (next, vec![Effect::OpenPush { connection }])
        }

        SessionEvent::PollDue => {
            if !state.polling {
                return (state, Vec::new());
            }
            let request = state.poll.saturating_add(1);
            let next = SessionState {
                poll: request,
                ..state
            };
            (next, vec![Effect::IssuePoll { request }])
        }

        SessionEvent::PollCompleted { request, result } => {
            if !state.polling || request != state.poll {
                return (state, Vec::new());
            }
            match result {
                Ok(Some(snapshot)) => {
                    (state, vec![Effect::Deliver(snapshot), Effect::SchedulePoll])
                }
                Ok(None) | Err(_) => (state, vec![Effect::SchedulePoll]),
            }
        }

        SessionEvent::Detach => {
            let next = SessionState {
                phase: SessionPhase::Detached,
                polling: false,
                reconnect_scheduled: false,
                ..state
            };
            (
                next,
                vec![Effect::ClosePush, Effect::CancelReconnect, Effect::StopPolling],
            )
        }
    }
}
