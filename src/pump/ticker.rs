//! Tick task driving one run of the pump
//!
//! Every start of the pump spawns one task that owns a snapshot of the
//! source and the sink and ticks on a tokio interval. A run holds still
//! until the pump has committed it and the previous run has exited, so runs
//! never overlap. Its first tick comes one cadence after that. Ticks of a
//! run are sequential by construction; a late tick makes the interval skip
//! the ticks it missed instead of bursting.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pipeline::events::{EventPublisher, PumpEvent};
use crate::pipeline::{PumpHealth, SharedSink, SharedSource, VideoFormat};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    // id of the run whose task is currently polling
    static CURRENT_RUN: u64;
}

/// Everything a run needs, captured when the pump starts
pub(crate) struct TickerRun {
    pub source: SharedSource,
    pub sink: Option<(SharedSink, VideoFormat)>,
    pub cadence: Duration,
    pub health: Arc<PumpHealth>,
    pub events: EventPublisher,
    pub stats_interval: Option<Duration>,
}

/// Ownership token of a running tick task.
///
/// Dropping a ticker that still holds its task handle aborts the task.
pub(crate) struct Ticker {
    run_id: u64,
    cancel: CancellationToken,
    // cancelled once the task is gone, whichever way it ended
    done: CancellationToken,
    gate: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Join handle of a cancelled run. Dropping it before the run has been
/// waited for aborts the run.
pub(crate) struct RunExit {
    run_id: u64,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a run on `runtime`. It does not tick before [`Ticker::release`]
    /// is called and `after` (the exit of the previous run) has fired.
    pub(crate) fn spawn(
        run: TickerRun,
        runtime: &Handle,
        after: Option<CancellationToken>,
    ) -> Self {
        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let (gate, released) = oneshot::channel();

        let exited = done.clone().drop_guard();
        let task = run.run(run_id, cancel.clone(), released, after);
        let handle = runtime.spawn(CURRENT_RUN.scope(run_id, async move {
            let _exited = exited;
            task.await
        }));

        Self {
            run_id,
            cancel,
            done,
            gate: Some(gate),
            handle: Some(handle),
        }
    }

    pub(crate) fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Token cancelled when this run's task has ended
    pub(crate) fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Let the run start ticking
    pub(crate) fn release(&mut self) {
        if let Some(gate) = self.gate.take() {
            // the run is only gone if it was aborted
            let _ = gate.send(());
        }
    }

    /// Whether the caller is polled by this ticker's own task
    pub(crate) fn is_current_task(&self) -> bool {
        CURRENT_RUN
            .try_with(|id| *id == self.run_id)
            .unwrap_or(false)
    }

    /// Cancel the run and return the handle to wait on.
    ///
    /// From inside the run itself nothing is returned: the task is detached
    /// and leaves at its next cancellation check.
    pub(crate) fn begin_shutdown(&mut self) -> Option<RunExit> {
        self.cancel.cancel();
        let handle = self.handle.take()?;

        if self.is_current_task() {
            debug!(
                "Frame pump run {} stopped from its own tick, deferring exit",
                self.run_id
            );
            return None;
        }

        Some(RunExit {
            run_id: self.run_id,
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl RunExit {
    /// Wait until the run's task has returned
    pub(crate) async fn wait(mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let result = handle.await;
        self.handle = None;

        match result {
            Err(e) if e.is_panic() => {
                error!("Frame pump run {} panicked: {}", self.run_id, e);
            }
            _ => {}
        }
    }
}

impl Drop for RunExit {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Frame pump run {} abandoned while exiting, aborting", self.run_id);
            handle.abort();
        }
    }
}

impl TickerRun {
    async fn run(
        self,
        run_id: u64,
        cancel: CancellationToken,
        released: oneshot::Receiver<()>,
        after: Option<CancellationToken>,
    ) {
        let ready = async {
            if released.await.is_err() {
                return false;
            }
            if let Some(after) = after {
                after.cancelled().await;
            }
            true
        };
        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            ready = ready => ready,
        };
        if !ready {
            debug!("Frame pump run {} cancelled before its first tick", run_id);
            return;
        }

        let mut interval = time::interval_at(Instant::now() + self.cadence, self.cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_tick: Option<Instant> = None;
        let mut last_stats_log = Instant::now();

        loop {
            let scheduled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                at = interval.tick() => at,
            };

            if let Some(prev) = last_tick {
                let periods = (scheduled - prev).as_nanos() / self.cadence.as_nanos();
                self.health
                    .record_overruns(periods.saturating_sub(1) as u64);
            }
            last_tick = Some(scheduled);
            self.health.record_tick();
            self.log_stats(&mut last_stats_log);

            if !self.source.is_ready() {
                self.health.record_not_ready();
                continue;
            }

            let Some((sink, format)) = &self.sink else {
                self.health.record_no_sink();
                continue;
            };

            let frame = self.source.next_frame(format);
            let size = frame.size();
            let sequence = frame.sequence;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Frame pump run {}: send of frame {} abandoned", run_id, sequence);
                    break;
                }
                result = sink.send(frame) => match result {
                    Ok(()) => self.health.record_delivery(size),
                    Err(error) => {
                        self.health.record_send_failure();
                        warn!("Sink rejected frame {}: {}", sequence, error);
                        self.events.publish(PumpEvent::SendFailed { sequence, error });
                    }
                }
            }
        }

        debug!("Frame pump run {} exited", run_id);
    }

    fn log_stats(&self, last: &mut Instant) {
        let Some(period) = self.stats_interval else {
            return;
        };
        if last.elapsed() >= period {
            info!("Frame pump [{}]: {}", self.source.name(), self.health.summary());
            *last = Instant::now();
        }
    }
}
