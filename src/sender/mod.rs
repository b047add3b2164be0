//! Raw outgoing video sender
//!
//! Glues a [`FramePump`] to an [`OutgoingVideoStream`]: the host starts and
//! stops sending, and reports stream events (state changes, a new frame
//! sender) that are turned into pump sink swaps.

mod stream;

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PumpConfig;
use crate::pipeline::{Frame, PumpError, PumpEvent, SendError, SharedSource};
use crate::pump::FramePump;

pub use stream::{OutgoingVideoStream, StreamEvent, StreamFrameSender, StreamKind, StreamState};

/// Sends frames of a source into an outgoing stream of a given kind
pub struct RawVideoSender {
    pump: FramePump,
    stream: Arc<OutgoingVideoStream>,
}

impl RawVideoSender {
    /// Create a sender and the receiving end of its stream's frame queue.
    ///
    /// The stream advertises the source's formats. No frame sender is
    /// attached until the host reports one with
    /// [`StreamEvent::SenderChanged`].
    pub fn new(
        source: SharedSource,
        kind: StreamKind,
        config: PumpConfig,
    ) -> (Self, mpsc::Receiver<Frame>) {
        Self::build(source, kind, config, None)
    }

    pub fn with_events(
        source: SharedSource,
        kind: StreamKind,
        config: PumpConfig,
        events: mpsc::Sender<PumpEvent>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        Self::build(source, kind, config, Some(events))
    }

    fn build(
        source: SharedSource,
        kind: StreamKind,
        config: PumpConfig,
        events: Option<mpsc::Sender<PumpEvent>>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (stream, frames) =
            OutgoingVideoStream::new(kind, source.video_formats(), config.stream_capacity);
        let pump = match events {
            Some(events) => FramePump::with_events(source, config, events),
            None => FramePump::new(source, config),
        };
        (Self { pump, stream }, frames)
    }

    pub fn pump(&self) -> &FramePump {
        &self.pump
    }

    pub fn stream(&self) -> &Arc<OutgoingVideoStream> {
        &self.stream
    }

    pub fn is_sending(&self) -> bool {
        self.pump.is_running()
    }

    /// Mark the stream started and start pumping into the current sender
    pub async fn start_sending(&self) -> Result<(), PumpError> {
        self.stream.set_state(StreamState::Started);
        self.pump.start().await?;
        info!("Raw {} sender: sending", self.stream.kind());
        Ok(())
    }

    /// Stop pumping and mark the stream stopped
    pub async fn stop_sending(&self) {
        self.pump.stop().await;
        self.stream.set_state(StreamState::Stopped);
        info!("Raw {} sender: stopped", self.stream.kind());
    }

    /// Push a single frame outside the pump's cadence
    pub fn send_video_frame(&self, frame: Frame) -> Result<(), SendError> {
        self.stream.send(frame)
    }

    pub async fn handle_event(&self, event: StreamEvent) -> Result<(), PumpError> {
        match event {
            StreamEvent::StateChanged(state) => {
                info!("Raw {} sender: stream state {}", self.stream.kind(), state);
                self.stream.set_state(state);
                Ok(())
            }
            StreamEvent::SenderChanged(sink) => {
                info!(
                    "Raw {} sender: frame sender changed ({})",
                    self.stream.kind(),
                    match &sink {
                        Some(sink) => sink.format().to_string(),
                        None => "none".to_string(),
                    }
                );
                self.pump.swap_sink(sink).await
            }
        }
    }

    /// Feed host events into [`RawVideoSender::handle_event`] until `cancel`
    /// fires or the event channel closes
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if let Err(e) = sender.handle_event(event).await {
                    warn!("Raw {} sender: event not applied: {}", sender.stream.kind(), e);
                }
            }
        })
    }
}
