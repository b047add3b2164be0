//! Periodic frame pump
//!
//! Pulls frames from a [`FrameSource`] at the cadence declared by the
//! current [`FrameSink`] and hands them over, one tick at a time.
//!
//! # Control surface
//!
//! - `start` / `start_with` begin a run, `AlreadyRunning` if one is active
//! - `stop` ends the run and releases the sink, a no-op when idle
//! - `swap_sink` restarts a running pump on another sink, or stages the
//!   sink for the next `start` when idle
//!
//! The first tick of a run comes one cadence after the call that started it
//! returned, so a new sink never sees a frame before `start_with` or
//! `swap_sink` is done.
//!
//! # Concurrency
//!
//! Transitions are serialized by one async lock held for the whole
//! transition, including the wait for the previous run to exit. Observable
//! state sits behind a short-lived std mutex that is never held across an
//! `.await`, and is committed before any wait: dropping a `stop` or
//! `swap_sink` future halfway leaves the pump stopped or running on the new
//! sink, never in between. Ticks never take either lock: each run owns a
//! snapshot of the source and the sink. A `stop` or `swap_sink` issued from
//! inside a tick (e.g. from `FrameSink::send`) does not wait for itself; the
//! run leaves at its next cancellation check and the next run only starts
//! ticking once it has.
//!
//! Only a completed `stop().await` guarantees that no tick runs afterwards.
//! Dropping the last pump handle aborts the run without waiting for it, so
//! a send that was already executing may still complete.
//!
//! # Runtime
//!
//! Runs are spawned on the tokio runtime polling the control call, or else
//! on the runtime the pump was created in. With neither, `start` and
//! `swap_sink` fail with [`PumpError::NoRuntime`].

mod ticker;

use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assets::MAX_FRAME_RATE;
use crate::config::PumpConfig;
use crate::pipeline::events::EventPublisher;
use crate::pipeline::{
    PumpError, PumpEvent, PumpHealth, PumpState, SharedSink, SharedSource,
};
use ticker::{Ticker, TickerRun};

/// Interval between two ticks for a sink declaring `fps` frames per second
pub fn cadence_for(fps: u32) -> Result<Duration, PumpError> {
    if fps == 0 || fps > MAX_FRAME_RATE {
        return Err(PumpError::InvalidFrameRate { fps });
    }
    Ok(Duration::from_secs(1) / fps)
}

/// Handle to a frame pump. Clones share the same pump; the last clone
/// dropped tears down any active run.
#[derive(Clone)]
pub struct FramePump {
    shared: Arc<PumpShared>,
}

struct PumpShared {
    source: SharedSource,
    config: PumpConfig,
    idle_cadence: Duration,
    health: Arc<PumpHealth>,
    events: EventPublisher,
    // runtime the pump was created in, if any
    runtime: Option<Handle>,
    transition: tokio::sync::Mutex<()>,
    control: Mutex<Control>,
}

/// `ticker` is `Some` exactly while `state` is `Running`
struct Control {
    sink: Option<SharedSink>,
    cadence: Duration,
    state: PumpState,
    ticker: Option<Ticker>,
    // exit of the most recently spawned run, the next run waits for it
    last_run: Option<CancellationToken>,
}

impl FramePump {
    pub fn new(source: SharedSource, config: PumpConfig) -> Self {
        Self::build(source, config, None)
    }

    /// Same as [`FramePump::new`], publishing [`PumpEvent`]s on `events`
    pub fn with_events(
        source: SharedSource,
        config: PumpConfig,
        events: mpsc::Sender<PumpEvent>,
    ) -> Self {
        Self::build(source, config, Some(events))
    }

    fn build(
        source: SharedSource,
        config: PumpConfig,
        events: Option<mpsc::Sender<PumpEvent>>,
    ) -> Self {
        let idle_cadence = Duration::from_secs(1) / config.default_fps.clamp(1, MAX_FRAME_RATE);
        Self {
            shared: Arc::new(PumpShared {
                source,
                config,
                idle_cadence,
                health: Arc::new(PumpHealth::new()),
                events: EventPublisher::new(events),
                runtime: Handle::try_current().ok(),
                transition: tokio::sync::Mutex::new(()),
                control: Mutex::new(Control {
                    sink: None,
                    cadence: idle_cadence,
                    state: PumpState::Idle,
                    ticker: None,
                    last_run: None,
                }),
            }),
        }
    }

    pub fn source(&self) -> &SharedSource {
        &self.shared.source
    }

    pub fn config(&self) -> &PumpConfig {
        &self.shared.config
    }

    pub fn health(&self) -> Arc<PumpHealth> {
        Arc::clone(&self.shared.health)
    }

    pub fn state(&self) -> PumpState {
        self.shared.control().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Cadence of the current run, or of the next one when idle
    pub fn cadence(&self) -> Duration {
        self.shared.control().cadence
    }

    pub fn sink(&self) -> Option<SharedSink> {
        self.shared.control().sink.clone()
    }

    pub fn has_sink(&self) -> bool {
        self.shared.control().sink.is_some()
    }

    /// Start ticking with the sink staged by [`FramePump::swap_sink`], if any
    pub async fn start(&self) -> Result<(), PumpError> {
        let _transition = self.shared.transition.lock().await;
        let sink = self.shared.control().sink.clone();
        self.shared.start_locked(sink)
    }

    /// Start ticking into `sink`. Fails without touching the staged sink
    /// when the pump already runs.
    pub async fn start_with(&self, sink: SharedSink) -> Result<(), PumpError> {
        let _transition = self.shared.transition.lock().await;
        self.shared.start_locked(Some(sink))
    }

    /// Stop ticking and release the sink.
    ///
    /// When this returns no tick of the stopped run executes anymore, unless
    /// it was called from inside that run's own tick. Cancel safe: the pump
    /// is stopped from the first poll on, a dropped future only skips the
    /// wait and aborts the old run instead.
    pub async fn stop(&self) {
        let _transition = self.shared.transition.lock().await;
        self.shared.stop_locked().await;
    }

    /// Replace the sink. A running pump is restarted on the new sink with its
    /// cadence; the old sink sees no tick once the swap has begun.
    ///
    /// Cancel safe the same way as [`FramePump::stop`]: the new run is in
    /// place from the first poll on and starts once the old one is gone.
    pub async fn swap_sink(&self, sink: Option<SharedSink>) -> Result<(), PumpError> {
        let _transition = self.shared.transition.lock().await;
        self.shared.swap_locked(sink).await
    }

    #[cfg(test)]
    fn has_ticker(&self) -> bool {
        self.shared.control().ticker.is_some()
    }
}

impl PumpShared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cadence_of(&self, sink: Option<&SharedSink>) -> Result<Duration, PumpError> {
        match sink {
            Some(sink) => cadence_for(sink.format().fps),
            None => Ok(self.idle_cadence),
        }
    }

    fn runtime(&self) -> Result<Handle, PumpError> {
        Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or(PumpError::NoRuntime)
    }

    /// Spawn a run that waits for the previous one, and record its exit
    fn spawn_run(
        &self,
        control: &mut Control,
        runtime: &Handle,
        sink: Option<&SharedSink>,
        cadence: Duration,
    ) -> Ticker {
        let run = TickerRun {
            source: Arc::clone(&self.source),
            sink: sink.map(|sink| (Arc::clone(sink), sink.format())),
            cadence,
            health: Arc::clone(&self.health),
            events: self.events.clone(),
            stats_interval: self.config.stats_interval(),
        };
        let ticker = Ticker::spawn(run, runtime, control.last_run.take());
        control.last_run = Some(ticker.done());
        ticker
    }

    fn start_locked(&self, sink: Option<SharedSink>) -> Result<(), PumpError> {
        let cadence = self.cadence_of(sink.as_ref())?;
        let running = PumpState::Running {
            started_at: Instant::now(),
            cadence,
        };

        let mut control = self.control();
        if !control.state.can_transition_to(&running) {
            return Err(PumpError::AlreadyRunning);
        }

        let runtime = self.runtime()?;
        let mut ticker = self.spawn_run(&mut control, &runtime, sink.as_ref(), cadence);
        info!(
            "Frame pump [{}]: run {} started, ticking every {:?} ({})",
            self.source.name(),
            ticker.run_id(),
            cadence,
            if sink.is_some() { "sink attached" } else { "no sink" }
        );

        // observers only see the committed state, the first tick is a cadence away
        ticker.release();
        control.ticker = Some(ticker);
        control.state = running;
        control.cadence = cadence;
        let has_sink = sink.is_some();
        control.sink = sink;
        drop(control);

        self.events.publish(PumpEvent::Started { cadence, has_sink });
        Ok(())
    }

    async fn stop_locked(&self) {
        let exit = {
            let mut control = self.control();
            let Some(mut ticker) = control.ticker.take() else {
                debug!("Frame pump: stop requested while not running");
                return;
            };

            let stopped = PumpState::Stopped {
                stopped_at: Instant::now(),
            };
            debug_assert!(control.state.can_transition_to(&stopped));

            control.sink = None;
            control.cadence = self.idle_cadence;
            control.state = stopped;
            ticker.begin_shutdown()
        };

        info!("Frame pump [{}]: stopped", self.source.name());
        self.events.publish(PumpEvent::Stopped);

        if let Some(exit) = exit {
            exit.wait().await;
        }
    }

    async fn swap_locked(&self, sink: Option<SharedSink>) -> Result<(), PumpError> {
        // rejected before anything changes so a bad sink leaves the run alone
        let cadence = self.cadence_of(sink.as_ref())?;
        let has_sink = sink.is_some();

        let exit = {
            let mut control = self.control();
            if control.ticker.is_none() {
                debug!("Frame pump: sink staged for the next start");
                control.sink = sink;
                control.cadence = cadence;
                return Ok(());
            }

            let runtime = self.runtime()?;
            let exit = control.ticker.as_mut().and_then(Ticker::begin_shutdown);

            // the new run replaces the old one in a single step and only
            // ticks once the old run is gone
            let mut ticker = self.spawn_run(&mut control, &runtime, sink.as_ref(), cadence);
            info!(
                "Frame pump [{}]: sink swapped, run {} ticking every {:?}",
                self.source.name(),
                ticker.run_id(),
                cadence
            );
            ticker.release();
            control.ticker = Some(ticker);
            control.state = PumpState::Running {
                started_at: Instant::now(),
                cadence,
            };
            control.cadence = cadence;
            control.sink = sink;
            exit
        };

        self.events
            .publish(PumpEvent::SinkSwapped { cadence, has_sink });

        if let Some(exit) = exit {
            exit.wait().await;
        }
        Ok(())
    }
}

impl Drop for PumpShared {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        // aborted, not joined
        if control.ticker.take().is_some() {
            debug!("Frame pump dropped while running, run aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        Frame, FrameSink, FrameSource, PixelFormat, SendError, Timestamp, VideoFormat,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::pin::pin;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::task::{Context, Poll, Waker};

    const PAYLOAD: &[u8; 10] = b"0123456789";

    struct ConstSource {
        ready: AtomicBool,
        pulls: AtomicU64,
    }

    impl ConstSource {
        fn new(ready: bool) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                pulls: AtomicU64::new(0),
            })
        }
    }

    impl FrameSource for ConstSource {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn next_frame(&self, format: &VideoFormat) -> Frame {
            let sequence = self.pulls.fetch_add(1, Ordering::SeqCst);
            Frame::new(
                Bytes::from_static(PAYLOAD),
                *format,
                Timestamp::default(),
                sequence,
            )
        }
    }

    enum OnSend {
        Stop(FramePump),
        Swap(FramePump, SharedSink),
    }

    struct RecordingSink {
        format: VideoFormat,
        fail: bool,
        frames: Mutex<Vec<(tokio::time::Instant, Frame)>>,
        // control call made from inside every send
        on_send: OnceLock<OnSend>,
    }

    impl RecordingSink {
        fn new(fps: u32) -> Arc<Self> {
            Self::build(fps, false)
        }

        fn failing(fps: u32) -> Arc<Self> {
            Self::build(fps, true)
        }

        fn build(fps: u32, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                format: VideoFormat::new(4, 2, fps, PixelFormat::Nv12),
                fail,
                frames: Mutex::new(Vec::new()),
                on_send: OnceLock::new(),
            })
        }

        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }

        fn times(&self) -> Vec<tokio::time::Instant> {
            self.frames.lock().unwrap().iter().map(|(at, _)| *at).collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        fn format(&self) -> VideoFormat {
            self.format
        }

        async fn send(&self, frame: Frame) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Rejected("test sink".into()));
            }
            self.frames
                .lock()
                .unwrap()
                .push((tokio::time::Instant::now(), frame));
            match self.on_send.get() {
                Some(OnSend::Stop(pump)) => pump.stop().await,
                Some(OnSend::Swap(pump, next)) => {
                    pump.swap_sink(Some(next.clone())).await.unwrap();
                }
                None => {}
            }
            Ok(())
        }
    }

    fn pump_with(source: Arc<ConstSource>) -> FramePump {
        FramePump::new(source, PumpConfig::default())
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_cadence_for_15_fps() {
        let cadence = cadence_for(15).unwrap();
        assert!(cadence >= Duration::from_millis(66));
        assert!(cadence <= Duration::from_millis(67));
        assert_eq!(cadence_for(10).unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_cadence_rejects_invalid_rates() {
        assert_eq!(cadence_for(0), Err(PumpError::InvalidFrameRate { fps: 0 }));
        assert!(cadence_for(MAX_FRAME_RATE + 1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_constant_frames_then_stops() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        wait(500).await;

        let delivered = sink.count();
        assert!((4..=6).contains(&delivered), "delivered {}", delivered);
        for (_, frame) in sink.frames.lock().unwrap().iter() {
            assert_eq!(frame.data.as_ref(), PAYLOAD);
        }

        pump.stop().await;
        assert!(!pump.is_running());
        assert!(!pump.has_sink());

        wait(500).await;
        assert_eq!(sink.count(), delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_source_never_sends() {
        let source = ConstSource::new(false);
        let pump = pump_with(source.clone());
        let sink = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        wait(1_000).await;

        assert_eq!(sink.count(), 0);
        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
        assert!(pump.health().not_ready_skips() >= 9);

        // becoming ready resumes delivery without a restart
        source.ready.store(true, Ordering::SeqCst);
        wait(300).await;
        assert!(sink.count() >= 2);

        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_sink_skips_ticks() {
        let source = ConstSource::new(true);
        let pump = pump_with(source.clone());

        pump.start().await.unwrap();
        assert_eq!(pump.cadence(), cadence_for(15).unwrap());
        wait(500).await;

        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
        assert!(pump.health().no_sink_skips() >= 7);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_rejected() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);
        let other = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        assert_eq!(
            pump.start_with(other.clone()).await,
            Err(PumpError::AlreadyRunning)
        );
        assert_eq!(pump.start().await, Err(PumpError::AlreadyRunning));

        wait(1_000).await;
        // a single timer at 10 fps
        assert!(sink.count() <= 11, "delivered {}", sink.count());
        assert_eq!(other.count(), 0);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_noop() {
        let pump = pump_with(ConstSource::new(true));

        pump.stop().await;
        assert_eq!(pump.state(), PumpState::Idle);
        assert!(!pump.has_ticker());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_iff_ticker() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(30);

        for _ in 0..3 {
            assert_eq!(pump.is_running(), pump.has_ticker());
            pump.start_with(sink.clone()).await.unwrap();
            assert!(pump.is_running() && pump.has_ticker());
            let _ = pump.start().await;
            assert!(pump.is_running() && pump.has_ticker());
            wait(50).await;
            pump.stop().await;
            assert!(!pump.is_running() && !pump.has_ticker());
            pump.stop().await;
            assert!(!pump.is_running() && !pump.has_ticker());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_sink_while_running() {
        let pump = pump_with(ConstSource::new(true));
        let old = RecordingSink::new(10);
        let new = RecordingSink::new(20);

        pump.start_with(old.clone()).await.unwrap();
        wait(300).await;

        pump.swap_sink(Some(new.clone())).await.unwrap();
        let swapped_at = tokio::time::Instant::now();
        let old_count = old.count();
        assert!(pump.is_running());
        assert_eq!(pump.cadence(), Duration::from_millis(50));

        wait(300).await;
        assert_eq!(old.count(), old_count);
        assert!(new.count() >= 5);
        assert!(new.times().iter().all(|at| *at >= swapped_at));
        assert!(old.times().iter().all(|at| *at <= swapped_at));

        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_sink_when_idle_stages_it() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(20);

        pump.swap_sink(Some(sink.clone())).await.unwrap();
        assert!(!pump.is_running());
        assert!(pump.has_sink());
        assert_eq!(pump.cadence(), Duration::from_millis(50));

        wait(200).await;
        assert_eq!(sink.count(), 0);

        pump.start().await.unwrap();
        wait(200).await;
        assert!(sink.count() >= 3);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_to_no_sink_keeps_running() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        wait(150).await;
        pump.swap_sink(None).await.unwrap();
        let count = sink.count();

        wait(500).await;
        assert!(pump.is_running());
        assert_eq!(sink.count(), count);
        assert!(pump.health().no_sink_skips() > 0);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_swap_leaves_run_untouched() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        assert_eq!(
            pump.swap_sink(Some(RecordingSink::new(0))).await,
            Err(PumpError::InvalidFrameRate { fps: 0 })
        );

        wait(350).await;
        assert!(pump.is_running());
        assert!(sink.count() >= 3);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_reported_and_not_fatal() {
        let (tx, mut rx) = mpsc::channel(16);
        let pump = FramePump::with_events(ConstSource::new(true), PumpConfig::default(), tx);

        pump.start_with(RecordingSink::failing(10)).await.unwrap();
        wait(250).await;

        assert!(pump.is_running());
        assert!(pump.health().send_failures() >= 2);
        assert_eq!(pump.health().frames_delivered(), 0);

        assert!(matches!(rx.recv().await, Some(PumpEvent::Started { .. })));
        match rx.recv().await {
            Some(PumpEvent::SendFailed { sequence, error }) => {
                assert_eq!(sequence, 0);
                assert_eq!(error, SendError::Rejected("test sink".into()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_sequence() {
        let (tx, mut rx) = mpsc::channel(16);
        let pump = FramePump::with_events(ConstSource::new(false), PumpConfig::default(), tx);

        pump.start_with(RecordingSink::new(10)).await.unwrap();
        pump.swap_sink(Some(RecordingSink::new(20))).await.unwrap();
        pump.stop().await;

        assert_eq!(
            rx.recv().await,
            Some(PumpEvent::Started {
                cadence: Duration::from_millis(100),
                has_sink: true
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(PumpEvent::SinkSwapped {
                cadence: Duration::from_millis(50),
                has_sink: true
            })
        );
        assert_eq!(rx.recv().await, Some(PumpEvent::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_inside_send() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);
        assert!(sink.on_send.set(OnSend::Stop(pump.clone())).is_ok());

        pump.start_with(sink.clone()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), wait(500))
            .await
            .unwrap();

        assert_eq!(sink.count(), 1);
        assert!(!pump.is_running());
        assert!(!pump.has_ticker());

        // the pump can run again after a self-stop
        pump.start_with(RecordingSink::new(10)).await.unwrap();
        assert!(pump.is_running());
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_run() {
        let source = ConstSource::new(true);
        let sink = RecordingSink::new(10);
        {
            let pump = pump_with(source.clone());
            pump.start_with(sink.clone()).await.unwrap();
            wait(250).await;
        }
        let count = sink.count();
        assert!(count >= 2);

        wait(500).await;
        assert_eq!(sink.count(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overruns_are_counted() {
        struct SlowSink(Arc<RecordingSink>);

        #[async_trait]
        impl FrameSink for SlowSink {
            fn format(&self) -> VideoFormat {
                self.0.format
            }

            async fn send(&self, frame: Frame) -> Result<(), SendError> {
                tokio::time::sleep(Duration::from_millis(250)).await;
                self.0.send(frame).await
            }
        }

        let pump = pump_with(ConstSource::new(true));
        let sink = Arc::new(SlowSink(RecordingSink::new(10)));

        pump.start_with(sink.clone()).await.unwrap();
        wait(1_000).await;
        pump.stop().await;

        // sends never overlap, so at most one delivery per 250ms
        assert!(sink.0.count() <= 4, "delivered {}", sink.0.count());
        assert!(pump.health().overruns() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_sink_from_inside_send() {
        let pump = pump_with(ConstSource::new(true));
        let old = RecordingSink::new(10);
        let new = RecordingSink::new(20);
        assert!(
            old.on_send
                .set(OnSend::Swap(pump.clone(), new.clone()))
                .is_ok()
        );

        pump.start_with(old.clone()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), wait(400))
            .await
            .unwrap();

        // the old run leaves right after the send that swapped it out
        assert_eq!(old.count(), 1);
        assert!(new.count() >= 5, "delivered {}", new.count());
        let swapped_at = old.times()[0];
        assert!(new.times().iter().all(|at| *at > swapped_at));

        assert!(pump.is_running() && pump.has_ticker());
        let current = pump.sink().unwrap();
        assert_eq!(current.format(), new.format);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_stop_leaves_pump_stopped() {
        let pump = pump_with(ConstSource::new(true));
        let sink = RecordingSink::new(10);

        pump.start_with(sink.clone()).await.unwrap();
        wait(150).await;
        let _ = tokio::time::timeout(Duration::ZERO, pump.stop()).await;

        assert!(!pump.is_running());
        assert!(!pump.has_ticker());
        let count = sink.count();
        wait(500).await;
        assert_eq!(sink.count(), count);

        pump.start_with(sink.clone()).await.unwrap();
        wait(350).await;
        assert!(sink.count() >= count + 3);
        pump.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_swap_runs_new_sink() {
        let pump = pump_with(ConstSource::new(true));
        let old = RecordingSink::new(10);
        let new = RecordingSink::new(20);

        pump.start_with(old.clone()).await.unwrap();
        wait(150).await;
        let _ = tokio::time::timeout(Duration::ZERO, pump.swap_sink(Some(new.clone()))).await;

        assert!(pump.is_running() && pump.has_ticker());
        assert_eq!(pump.cadence(), Duration::from_millis(50));
        let old_count = old.count();

        wait(300).await;
        assert_eq!(old.count(), old_count);
        assert!(new.count() >= 5, "delivered {}", new.count());
        pump.stop().await;
    }

    struct ArmedSink {
        format: VideoFormat,
        // set by the test once the control call returned
        armed: AtomicBool,
        early: Arc<AtomicU64>,
        delivered: AtomicU64,
    }

    impl ArmedSink {
        fn new(fps: u32, early: &Arc<AtomicU64>) -> Arc<Self> {
            Arc::new(Self {
                format: VideoFormat::new(4, 2, fps, PixelFormat::Nv12),
                armed: AtomicBool::new(false),
                early: Arc::clone(early),
                delivered: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl FrameSink for ArmedSink {
        fn format(&self) -> VideoFormat {
            self.format
        }

        async fn send(&self, _frame: Frame) -> Result<(), SendError> {
            if !self.armed.load(Ordering::SeqCst) {
                self.early.fetch_add(1, Ordering::SeqCst);
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_delivery_before_control_call_returns() {
        let pump = pump_with(ConstSource::new(true));
        let early = Arc::new(AtomicU64::new(0));

        let first = ArmedSink::new(50, &early);
        pump.start_with(first.clone()).await.unwrap();
        first.armed.store(true, Ordering::SeqCst);

        let mut last = first;
        for _ in 0..300 {
            let sink = ArmedSink::new(50, &early);
            pump.swap_sink(Some(sink.clone())).await.unwrap();
            sink.armed.store(true, Ordering::SeqCst);
            last = sink;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        pump.stop().await;

        assert_eq!(early.load(Ordering::SeqCst), 0);
        assert!(last.delivered.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_start_polled_outside_runtime_uses_creating_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let pump = {
            let _guard = runtime.enter();
            pump_with(ConstSource::new(true))
        };
        let sink = RecordingSink::new(100);

        let mut cx = Context::from_waker(Waker::noop());
        let mut start = pin!(pump.start_with(sink.clone()));
        assert_eq!(start.as_mut().poll(&mut cx), Poll::Ready(Ok(())));
        assert!(pump.is_running());

        runtime.block_on(async {
            wait(100).await;
            pump.stop().await;
        });
        assert!(sink.count() >= 2, "delivered {}", sink.count());
    }

    #[test]
    fn test_start_without_any_runtime_fails() {
        let pump = pump_with(ConstSource::new(true));

        let mut cx = Context::from_waker(Waker::noop());
        let mut start = pin!(pump.start_with(RecordingSink::new(10)));
        assert_eq!(
            start.as_mut().poll(&mut cx),
            Poll::Ready(Err(PumpError::NoRuntime))
        );
        assert!(!pump.is_running());
        assert!(!pump.has_ticker());
    }
}
