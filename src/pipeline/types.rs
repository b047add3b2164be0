//! Core types for the frame pump

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Timestamp representation for video frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Microseconds since the clock base
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }
}

/// Pixel layout of a raw frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGBA
    Rgba,
    /// Packed 8-bit BGR with an unused fourth byte
    Bgrx,
    /// Full luma plane followed by an interleaved half-size UV plane
    Nv12,
    /// Full luma plane followed by separate U and V quarter planes
    I420,
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgba" => Ok(PixelFormat::Rgba),
            "bgrx" => Ok(PixelFormat::Bgrx),
            "nv12" => Ok(PixelFormat::Nv12),
            "i420" => Ok(PixelFormat::I420),
            other => Err(format!("unknown pixel format '{}'", other)),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Rgba => write!(f, "RGBA"),
            PixelFormat::Bgrx => write!(f, "BGRX"),
            PixelFormat::Nv12 => write!(f, "NV12"),
            PixelFormat::I420 => write!(f, "I420"),
        }
    }
}

/// Format a sink declares for the frames it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, fps: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            pixel_format,
        }
    }

    /// Same geometry and layout at a different frame rate
    pub fn with_fps(self, fps: u32) -> Self {
        Self { fps, ..self }
    }

    /// Row stride in bytes of the first plane
    pub fn stride(&self) -> usize {
        match self.pixel_format {
            PixelFormat::Rgba | PixelFormat::Bgrx => self.width as usize * 4,
            PixelFormat::Nv12 | PixelFormat::I420 => self.width as usize,
        }
    }

    /// Size in bytes of the luma (or only) plane
    pub fn luma_size(&self) -> usize {
        self.stride() * self.height as usize
    }

    /// Total buffer size in bytes of one frame in this format.
    ///
    /// Planar layouts round odd dimensions up for the chroma planes.
    pub fn frame_size(&self) -> usize {
        match self.pixel_format {
            PixelFormat::Rgba | PixelFormat::Bgrx => self.luma_size(),
            PixelFormat::Nv12 | PixelFormat::I420 => {
                let cw = (self.width as usize).div_ceil(2);
                let ch = (self.height as usize).div_ceil(2);
                self.luma_size() + cw * ch * 2
            }
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{}fps {}",
            self.width, self.height, self.fps, self.pixel_format
        )
    }
}

/// Raw video frame handed from a source to a sink.
///
/// Frames move by value: once passed to a sink the pump keeps nothing.
#[derive(Clone)]
pub struct Frame {
    /// Raw pixel data laid out as described by `format`
    pub data: Bytes,

    /// Layout and geometry of `data`
    pub format: VideoFormat,

    /// Capture timestamp
    pub timestamp: Timestamp,

    /// Producer-assigned sequence number
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Bytes, format: VideoFormat, timestamp: Timestamp, sequence: u64) -> Self {
        Self {
            data,
            format,
            timestamp,
            sequence,
        }
    }

    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .field("size", &self.size())
            .finish()
    }
}
