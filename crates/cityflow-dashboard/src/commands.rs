//! Implementations of the dashboard subcommands.

use std::collections::BTreeMap;
use std::future;
use std::io::Write;
use std::time::Duration;

use cityflow_sync::{ApiClient, StreamClient};
use cityflow_timeline::{MetricField, PlaybackEngine, merge};
use cityflow_types::{MetricsRecord, StateSnapshot};
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::DashboardConfig;
use crate::error::DashboardError;

/// Runs compared side by side in the charts before output gets unreadable.
const COMPARE_SOFT_LIMIT: usize = 3;

/// Follow the live state until interrupted or `duration` elapses.
pub async fn live(
    config: &DashboardConfig,
    duration: Option<Duration>,
) -> Result<(), DashboardError> {
    let client = StreamClient::from_config(config.sync.clone())?;
    let (tx, mut snapshots) = mpsc::unbounded_channel::<StateSnapshot>();
    let handle = client.attach(move |snapshot| {
        // The receiver only goes away during shutdown.
        let _ = tx.send(snapshot);
    });

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => future::pending().await,
        }
    };
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupt);

    let mut received: u64 = 0;
    loop {
        tokio::select! {
            Some(snapshot) = snapshots.recv() => {
                received = received.saturating_add(1);
                info!(
                    t = snapshot.t,
                    status = %snapshot.status,
                    run_id = snapshot.run_id.as_deref().unwrap_or("-"),
                    vehicles = snapshot.vehicle_count,
                    waiting = snapshot.waiting_total(),
                    transport = %handle.phase(),
                    "state"
                );
            }
            () = &mut deadline => {
                info!("duration elapsed");
                break;
            }
            result = &mut interrupt => {
                result?;
                info!("interrupted");
                break;
            }
        }
    }

    handle.detach();
    info!(snapshots = received, "live view closed");
    Ok(())
}

/// What a replay showed before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Frames logged, counting the first one shown on load.
    pub frames_shown: usize,
    /// Passes that ran through to the last frame and wrapped around.
    pub passes: u32,
}

/// Play a recorded run, logging each frame, for `loops` passes.
pub async fn replay(
    config: &DashboardConfig,
    api: &ApiClient,
    run_id: &str,
    limit: Option<u32>,
    loops: u32,
) -> Result<ReplaySummary, DashboardError> {
    let replay = api.fetch_replay(run_id, limit).await?;
    if replay.frames.is_empty() {
        warn!(run_id, "no frames recorded for run");
        return Ok(ReplaySummary::default());
    }
    if !replay.is_ordered() {
        warn!(run_id, "replay frames are not in tick order");
    }

    let engine = PlaybackEngine::with_tick(config.playback_tick)?;
    engine.load(replay.frames);
    // Subscribed after loading so the reset to the first frame is not
    // mistaken for a wrap.
    let mut positions = engine.subscribe();
    let start = *positions.borrow_and_update();
    info!(run_id, frames = engine.len(), loops, "replay loaded");
    log_frame(&engine, start);

    let mut summary = ReplaySummary {
        frames_shown: 1,
        passes: 0,
    };
    if engine.len() <= 1 {
        return Ok(summary);
    }

    let mut counter = LoopCounter::new(start);
    engine.play();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            changed = positions.changed() => {
                if changed.is_err() {
                    break;
                }
                let position = *positions.borrow_and_update();
                log_frame(&engine, position);
                summary.frames_shown = summary.frames_shown.saturating_add(1);
                if counter.observe(position) {
                    summary.passes = summary.passes.saturating_add(1);
                    if summary.passes >= loops {
                        break;
                    }
                }
            }
            result = &mut interrupt => {
                result?;
                info!("interrupted");
                break;
            }
        }
    }

    engine.dispose();
    info!(run_id, loops = summary.passes, frames = summary.frames_shown, "replay finished");
    Ok(summary)
}

/// Detects the auto-advancing cursor wrapping back to the first frame.
///
/// A watch receiver only sees the latest position, so a slow reader may
/// miss the last frame or the first one. Auto-advance only moves forward,
/// which makes any backward move a wrap.
#[derive(Debug)]
struct LoopCounter {
    last: usize,
}

impl LoopCounter {
    const fn new(start: usize) -> Self {
        Self { last: start }
    }

    /// Record the cursor's new position. Returns `true` if this move
    /// completed a pass.
    const fn observe(&mut self, position: usize) -> bool {
        let wrapped = position < self.last;
        self.last = position;
        wrapped
    }
}

fn log_frame(engine: &PlaybackEngine, position: usize) {
    if let Some(frame) = engine.frames().get(position) {
        info!(
            cursor = position,
            t = frame.t,
            vehicles = frame.vehicle_count,
            lanes = frame.lanes.len(),
            status = %frame.status,
            percent = engine.timeline_percent(),
            "frame"
        );
    }
}

/// Merge one metric of several runs and write the rows as JSON lines.
pub async fn compare(
    api: &ApiClient,
    run_ids: &[String],
    metric: MetricField,
    out: &mut impl Write,
) -> Result<usize, DashboardError> {
    if run_ids.len() > COMPARE_SOFT_LIMIT {
        warn!(
            runs = run_ids.len(),
            limit = COMPARE_SOFT_LIMIT,
            "comparing more runs than the charts display"
        );
    }

    let responses = try_join_all(run_ids.iter().map(|run_id| api.fetch_metrics(run_id))).await?;
    let series: BTreeMap<String, Vec<MetricsRecord>> = responses
        .into_iter()
        .map(|response| (response.run_id, response.records))
        .collect();

    let rows = merge(&series, metric);
    for row in &rows {
        serde_json::to_writer(&mut *out, row)?;
        writeln!(out)?;
    }
    out.flush()?;
    info!(runs = series.len(), rows = rows.len(), %metric, "comparison written");
    Ok(rows.len())
}

/// Print the recorded runs, newest first as returned by the API.
pub async fn runs(api: &ApiClient, out: &mut impl Write) -> Result<usize, DashboardError> {
    let runs = api.list_runs().await?;
    writeln!(out, "{:<36} {:<12} {:>8} {:>6}  STARTED", "RUN", "STATUS", "STEPS", "HZ")?;
    for run in &runs {
        writeln!(
            out,
            "{:<36} {:<12} {:>8} {:>6}  {}",
            run.run_id,
            run.status,
            run.steps,
            run.speed_hz,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
        )?;
    }
    out.flush()?;
    Ok(runs.len())
}
