//! Frame-by-frame playback over a recorded replay.
//!
//! [`PlaybackCursor`] holds the navigation rules (clamped seek, wrapping
//! step) with no notion of time. [`PlaybackEngine`] owns a frame sequence
//! and a cursor and advances it on a Tokio interval while playing.

use std::sync::Arc;
use std::time::Duration;

use cityflow_types::ReplayFrame;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::TimelineError;

/// Auto-advance interval used by [`PlaybackEngine::new`].
pub const DEFAULT_TICK: Duration = Duration::from_millis(200);

/// Position within a sequence of known length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    len: usize,
    position: usize,
}

impl PlaybackCursor {
    /// Cursor at position 0 of a sequence of `len` frames.
    pub const fn new(len: usize) -> Self {
        Self { len, position: 0 }
    }

    /// Current position. Always 0 for an empty sequence.
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Length of the underlying sequence.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the underlying sequence is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move to `requested`, clamped to `[0, len - 1]`.
    pub fn seek(&mut self, requested: i64) -> usize {
        let last = self.len.saturating_sub(1);
        self.position = usize::try_from(requested).map_or(0, |p| p.min(last));
        self.position
    }

    /// Advance one position, wrapping from the last frame to the first.
    pub fn step(&mut self) -> usize {
        self.position = self
            .position
            .checked_add(1)
            .filter(|next| *next < self.len)
            .unwrap_or(0);
        self.position
    }

    /// Progress through the sequence in percent. 0 for one frame or fewer.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        match self.len.checked_sub(1) {
            Some(last) if last > 0 => self.position as f64 / last as f64 * 100.0,
            _ => 0.0,
        }
    }
}

/// Mutable playback state guarded by one lock.
#[derive(Debug, Default)]
struct PlaybackState {
    frames: Arc<[ReplayFrame]>,
    cursor: PlaybackCursor,
    playing: bool,
    /// Bumped whenever the timer is torn down; ticks carrying an older
    /// value are ignored.
    generation: u64,
    timer: Option<AbortHandle>,
}

impl PlaybackState {
    fn stop_timer(&mut self) {
        self.playing = false;
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<PlaybackState>,
    position: watch::Sender<usize>,
}

impl Inner {
    /// Apply one auto-advance tick. Returns `false` once the tick's timer
    /// has been superseded.
    fn tick(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || !state.playing {
            return false;
        }
        let position = state.cursor.step();
        self.position.send_replace(position);
        true
    }
}

/// Timeline navigation over one pre-loaded replay.
///
/// While playing, the cursor advances by exactly one frame per tick and
/// wraps to the start after the last frame; playback never stops on its
/// own. [`pause`](Self::pause), [`load`](Self::load),
/// [`dispose`](Self::dispose) and dropping the engine cancel the timer, and
/// no tick lands after any of them returns.
///
/// [`play`](Self::play) spawns onto the current Tokio runtime.
#[derive(Debug)]
pub struct PlaybackEngine {
    inner: Arc<Inner>,
    tick: Duration,
}

impl PlaybackEngine {
    /// Engine with the default 200 ms tick and no frames.
    pub fn new() -> Self {
        Self::build(DEFAULT_TICK)
    }

    /// Engine with a custom tick interval.
    pub fn with_tick(tick: Duration) -> Result<Self, TimelineError> {
        if tick.is_zero() {
            return Err(TimelineError::InvalidTickInterval);
        }
        Ok(Self::build(tick))
    }

    fn build(tick: Duration) -> Self {
        let (position, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PlaybackState::default()),
                position,
            }),
            tick,
        }
    }

    /// Auto-advance interval.
    pub const fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Replace the sequence, rewind to position 0 and pause.
    pub fn load(&self, frames: impl Into<Arc<[ReplayFrame]>>) {
        let frames = frames.into();
        let mut state = self.inner.state.lock();
        state.stop_timer();
        state.cursor = PlaybackCursor::new(frames.len());
        debug!(frames = frames.len(), "replay loaded");
        state.frames = frames;
        self.inner.position.send_replace(0);
    }

    /// Start auto-advance. No effect if already playing.
    pub fn play(&self) {
        let mut state = self.inner.state.lock();
        if state.playing {
            return;
        }
        state.playing = true;
        if state.cursor.len() <= 1 {
            return;
        }

        let generation = state.generation;
        let inner = Arc::clone(&self.inner);
        let mut ticker = tokio::time::interval(self.tick);
        let task = tokio::spawn(async move {
            // The first tick of an interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !inner.tick(generation) {
                    break;
                }
            }
        });
        state.timer = Some(task.abort_handle());
        debug!(cursor = state.cursor.position(), "playback started");
    }

    /// Stop auto-advance, keeping the cursor where it is.
    pub fn pause(&self) {
        let mut state = self.inner.state.lock();
        if state.playing {
            debug!(cursor = state.cursor.position(), "playback paused");
        }
        state.stop_timer();
    }

    /// Move the cursor to `position`, clamped to the loaded sequence.
    /// Playback state is unchanged.
    pub fn seek(&self, position: i64) -> usize {
        let mut state = self.inner.state.lock();
        let position = state.cursor.seek(position);
        self.inner.position.send_replace(position);
        position
    }

    /// Frame at the cursor, or `None` when nothing is loaded.
    pub fn current_frame(&self) -> Option<ReplayFrame> {
        let state = self.inner.state.lock();
        state.frames.get(state.cursor.position()).cloned()
    }

    /// Cursor position.
    pub fn cursor(&self) -> usize {
        self.inner.state.lock().cursor.position()
    }

    /// Whether auto-advance is on.
    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }

    /// Number of loaded frames.
    pub fn len(&self) -> usize {
        self.inner.state.lock().cursor.len()
    }

    /// Whether no frames are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The loaded sequence.
    pub fn frames(&self) -> Arc<[ReplayFrame]> {
        Arc::clone(&self.inner.state.lock().frames)
    }

    /// Progress in percent; see [`PlaybackCursor::percent`].
    pub fn timeline_percent(&self) -> f64 {
        self.inner.state.lock().cursor.percent()
    }

    /// Observe cursor movements.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.position.subscribe()
    }

    /// Cancel the auto-advance timer. The loaded frames stay available.
    pub fn dispose(&self) {
        self.inner.state.lock().stop_timer();
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
