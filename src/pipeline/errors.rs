use thiserror::Error;

/// Misuse of the pump's control surface, reported synchronously
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
    #[error("frame pump is already running")]
    AlreadyRunning,
    #[error("frame pump is not running")]
    NotRunning,
    #[error("sink declares an invalid frame rate of {fps} fps")]
    InvalidFrameRate { fps: u32 },
    #[error("no tokio runtime to run the frame pump on")]
    NoRuntime,
}

/// Why a sink refused a frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("outgoing stream is not started")]
    NotStarted,
    #[error("outgoing stream is congested, frame dropped")]
    Congested,
    #[error("outgoing stream is closed")]
    Closed,
    #[error("frame rejected: {0}")]
    Rejected(String),
}
