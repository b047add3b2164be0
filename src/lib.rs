//! Periodic video frame pump.
//!
//! A [`FramePump`] pulls frames from a [`pipeline::FrameSource`] at the
//! cadence declared by the current [`pipeline::FrameSink`], and keeps
//! doing so across sink swaps, stops and restarts. [`sender`] wires a pump
//! to an outgoing raw video stream driven by host events.

pub mod assets;
pub mod capture;
pub mod config;
pub mod pipeline;
pub mod pump;
pub mod sender;

pub use config::PumpConfig;
pub use pump::{FramePump, cadence_for};
pub use sender::RawVideoSender;
