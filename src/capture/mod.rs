//! Frame producers
//!
//! Real capture backends live outside this crate and plug in through
//! [`crate::pipeline::FrameSource`]; this module only ships a synthetic
//! pattern generator for demos and tests.

mod pattern;

pub use pattern::{Pattern, PatternSource};
