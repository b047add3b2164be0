//! Pipeline building blocks shared by the pump and the outgoing sender
//!
//! This module holds the pieces every other module talks in terms of:
//! - Frame and format types handed from producers to consumers
//! - The `FrameSource` / `FrameSink` interfaces the pump connects
//! - Pump state, errors, events and health counters
//! - MediaClock for stamping produced frames

pub mod clock;
pub mod errors;
pub mod events;
pub mod health;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::MediaClock;
pub use errors::{PumpError, SendError};
pub use events::PumpEvent;
pub use health::{HealthSummary, PumpHealth};
pub use stage::{FrameSink, FrameSource, SharedSink, SharedSource};
pub use state::PumpState;
pub use types::{Frame, PixelFormat, Timestamp, VideoFormat};
