/// Frame rate used while no sink is assigned
pub const DEFAULT_FRAME_RATE: u32 = 15;
/// Highest frame rate a sink may declare
pub const MAX_FRAME_RATE: u32 = 1000;
pub const FRAME_WIDTH: u32 = 1280;
pub const FRAME_HEIGHT: u32 = 720;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Seconds between two health summaries in the log
pub const STATS_INTERVAL_SECS: u64 = 10;
