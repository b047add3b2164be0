//! Outgoing raw video stream and the frame sender bound to it

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::pipeline::{Frame, FrameSink, SendError, SharedSink, VideoFormat};

/// What an outgoing raw stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    ScreenShare,
    VirtualVideo,
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "screen" | "screenshare" | "screen-share" => Ok(StreamKind::ScreenShare),
            "virtual" | "virtualvideo" | "virtual-video" => Ok(StreamKind::VirtualVideo),
            other => Err(format!("unknown stream kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::ScreenShare => write!(f, "screen share"),
            StreamKind::VirtualVideo => write!(f, "virtual video"),
        }
    }
}

/// Lifecycle of an outgoing stream as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Available,
    Started,
    Stopped,
    Failed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Available => "available",
            StreamState::Started => "started",
            StreamState::Stopped => "stopped",
            StreamState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Notifications a host delivers about an outgoing stream
#[derive(Clone)]
pub enum StreamEvent {
    StateChanged(StreamState),
    /// The host assigned another frame sender, or withdrew it
    SenderChanged(Option<SharedSink>),
}

impl std::fmt::Debug for StreamEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            StreamEvent::SenderChanged(sink) => f
                .debug_tuple("SenderChanged")
                .field(&sink.as_ref().map(|sink| sink.format()))
                .finish(),
        }
    }
}

/// Outgoing raw video stream.
///
/// Frames are only accepted while the stream is `Started`; accepted frames
/// are queued on a bounded channel that the transport drains.
pub struct OutgoingVideoStream {
    kind: StreamKind,
    formats: Vec<VideoFormat>,
    state: watch::Sender<StreamState>,
    output: mpsc::Sender<Frame>,
}

impl OutgoingVideoStream {
    /// Create a stream and the receiving end of its frame queue
    pub fn new(
        kind: StreamKind,
        formats: Vec<VideoFormat>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (output, frames) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(StreamState::Available);
        let stream = Arc::new(Self {
            kind,
            formats,
            state,
            output,
        });
        (stream, frames)
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn formats(&self) -> &[VideoFormat] {
        &self.formats
    }

    /// First advertised format, the one a host picks by default
    pub fn preferred_format(&self) -> Option<VideoFormat> {
        self.formats.first().copied()
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.state() == StreamState::Started
    }

    pub fn set_state(&self, state: StreamState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Outgoing {} stream: {} -> {}", self.kind, previous, state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Queue a frame for transmission
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        if !self.is_started() {
            return Err(SendError::NotStarted);
        }
        if frame.size() < frame.format.frame_size() {
            return Err(SendError::Rejected(format!(
                "{} bytes is short of a {} frame",
                frame.size(),
                frame.format
            )));
        }

        self.output.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Congested,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Frame sender producing into this stream at `format`
    pub fn frame_sender(self: &Arc<Self>, format: VideoFormat) -> Arc<StreamFrameSender> {
        Arc::new(StreamFrameSender {
            stream: Arc::clone(self),
            format,
        })
    }
}

/// [`FrameSink`] bound to one stream and one declared format
pub struct StreamFrameSender {
    stream: Arc<OutgoingVideoStream>,
    format: VideoFormat,
}

impl StreamFrameSender {
    pub fn stream(&self) -> &Arc<OutgoingVideoStream> {
        &self.stream
    }
}

#[async_trait]
impl FrameSink for StreamFrameSender {
    fn format(&self) -> VideoFormat {
        self.format
    }

    async fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.stream.send(frame)
    }
}
