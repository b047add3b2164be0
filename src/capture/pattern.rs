use bytes::{Bytes, BytesMut};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::pipeline::{Frame, FrameSource, MediaClock, PixelFormat, VideoFormat};

/// What a [`PatternSource`] draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Solid black, rendered once per format and reused
    Black,
    /// White vertical bar sweeping left to right, one step per frame
    MovingBar,
}

/// Synthetic frame producer.
///
/// Renders frames in whatever format the sink asks for, so it works with
/// any sink without configuration. Readiness can be toggled to simulate a
/// producer that is not warmed up yet.
pub struct PatternSource {
    pattern: Pattern,
    formats: Vec<VideoFormat>,
    ready: AtomicBool,
    clock: MediaClock,
    // last black frame rendered, keyed by its format
    cached: Mutex<Option<(VideoFormat, Bytes)>>,
}

impl PatternSource {
    pub fn new(pattern: Pattern, formats: Vec<VideoFormat>) -> Self {
        Self {
            pattern,
            formats,
            ready: AtomicBool::new(true),
            clock: MediaClock::new(),
            cached: Mutex::new(None),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    fn black(&self, format: &VideoFormat) -> Bytes {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((cached_format, data)) = cached.as_ref() {
            if cached_format == format {
                return data.clone();
            }
        }

        let data = render(format, None);
        *cached = Some((*format, data.clone()));
        data
    }
}

/// Render one frame, with a white bar at column `bar` if given
fn render(format: &VideoFormat, bar: Option<usize>) -> Bytes {
    let width = format.width as usize;
    let height = format.height as usize;
    let mut buf = BytesMut::zeroed(format.frame_size());

    match format.pixel_format {
        PixelFormat::Rgba | PixelFormat::Bgrx => {
            // opaque black, the fourth byte is alpha for RGBA and ignored for BGRX
            for px in buf.chunks_exact_mut(4) {
                px[3] = 255;
            }
            if let Some(x) = bar {
                let stride = format.stride();
                for row in 0..height {
                    let offset = row * stride + x * 4;
                    buf[offset..offset + 3].fill(255);
                }
            }
        }
        PixelFormat::Nv12 | PixelFormat::I420 => {
            // neutral chroma, luma carries the picture
            let luma = format.luma_size();
            buf[luma..].fill(128);
            if let Some(x) = bar {
                for row in 0..height {
                    buf[row * width + x] = 235;
                }
            }
        }
    }

    buf.freeze()
}

impl FrameSource for PatternSource {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn next_frame(&self, format: &VideoFormat) -> Frame {
        let sequence = self.clock.next_sequence();
        let data = match self.pattern {
            Pattern::Black => self.black(format),
            Pattern::MovingBar if format.width > 0 => {
                render(format, Some(sequence as usize % format.width as usize))
            }
            Pattern::MovingBar => render(format, None),
        };
        Frame::new(data, *format, self.clock.now(), sequence)
    }

    fn video_formats(&self) -> Vec<VideoFormat> {
        self.formats.clone()
    }

    fn name(&self) -> &'static str {
        "PatternSource"
    }
}
