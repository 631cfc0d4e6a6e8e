use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("frame buffer is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray,
    #[default]
    Bgr24,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Bgr24 => 3,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Gray => "gray",
            PixelFormat::Bgr24 => "bgr24",
        }
    }

    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.channels()
    }
}

/// One decoded raster image, tagged with its position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    index: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(
        index: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }

        let expected = format.frame_size(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            index,
            width,
            height,
            format,
            data,
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Single-channel intensity view of the frame.
    ///
    /// BGR input uses the BT.601 fixed-point weights (14-bit, rounded), which
    /// gives the same 8-bit values as OpenCV's `BGR2GRAY`.
    pub fn luma(&self) -> Cow<'_, [u8]> {
        match self.format {
            PixelFormat::Gray => Cow::Borrowed(&self.data),
            PixelFormat::Bgr24 => Cow::Owned(
                self.data
                    .chunks_exact(3)
                    .map(|px| {
                        let b = px[0] as u32;
                        let g = px[1] as u32;
                        let r = px[2] as u32;
                        ((r * 4899 + g * 9617 + b * 1868 + (1 << 13)) >> 14) as u8
                    })
                    .collect(),
            ),
        }
    }
}
