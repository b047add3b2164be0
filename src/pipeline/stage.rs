//! Producer and consumer interfaces the pump connects
//!
//! Neither side is implemented by the pump itself: sources wrap whatever
//! captures or renders frames, sinks wrap whatever transmits them.

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::SendError;
use super::types::{Frame, VideoFormat};

/// Producer of raw frames, polled once per tick
pub trait FrameSource: Send + Sync {
    /// Whether a frame can be produced right now. A `false` answer makes the
    /// pump skip the tick silently.
    fn is_ready(&self) -> bool;

    /// Produce one frame sized and laid out for `format`.
    ///
    /// Called from the pump's tick task, must not block indefinitely.
    fn next_frame(&self, format: &VideoFormat) -> Frame;

    /// Formats this source can produce, advertised to outgoing streams
    fn video_formats(&self) -> Vec<VideoFormat> {
        Vec::new()
    }

    /// Get the name of this source for logging
    fn name(&self) -> &'static str {
        "FrameSource"
    }
}

/// Consumer of frames, swappable while the pump runs
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Format the sink expects. Its frame rate sets the pump cadence.
    fn format(&self) -> VideoFormat;

    /// Take ownership of a frame for transmission
    async fn send(&self, frame: Frame) -> Result<(), SendError>;
}

pub type SharedSource = Arc<dyn FrameSource>;
pub type SharedSink = Arc<dyn FrameSink>;
