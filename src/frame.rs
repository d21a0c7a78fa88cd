//! Video frame and queue record types.
//!
//! Responsibilities:
//! - Owned pixel buffers with explicit geometry and format
//! - Byte-length accounting so malformed buffers are caught at the edge
//! - The `FrameRecord` unit that flows through the synchronizer queues

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::prediction::Prediction;

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 3 bytes per pixel, red first.
    Rgb,
    /// 3 bytes per pixel, blue first.
    Bgr,
    /// 1 byte per pixel.
    Gray,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Gray => 1,
        }
    }
}

/// A frame size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An owned, tightly packed video frame.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoFrame {
    /// Build a frame, rejecting buffers whose length does not match the
    /// stated geometry.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                pixels.len(),
                expected,
                width,
                height,
                format
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
        })
    }

    /// An all-zero frame of the given geometry.
    pub fn blank(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            pixels: vec![0; len],
            width,
            height,
            format,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// One queued unit of work: a frame plus the prediction tree attached to it
/// so far, if any.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub frame: VideoFrame,
    pub tree: Option<Prediction>,
}

impl FrameRecord {
    pub fn new(frame: VideoFrame) -> Self {
        Self { frame, tree: None }
    }

    pub fn with_tree(frame: VideoFrame, tree: Prediction) -> Self {
        Self {
            frame,
            tree: Some(tree),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.frame.resolution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        let err = VideoFrame::new(vec![0; 10], 4, 4, PixelFormat::Rgb);

        assert!(err.is_err());
    }

    #[test]
    fn frame_accepts_matching_buffer_length() {
        let frame = VideoFrame::new(vec![0; 48], 4, 4, PixelFormat::Rgb).unwrap();

        assert_eq!(frame.resolution(), Resolution::new(4, 4));
    }

    #[test]
    fn gray_frames_are_one_byte_per_pixel() {
        let frame = VideoFrame::new(vec![0; 16], 4, 4, PixelFormat::Gray).unwrap();

        assert_eq!(frame.pixels.len(), 16);
    }

    #[test]
    fn blank_frame_matches_geometry() {
        let frame = VideoFrame::blank(8, 2, PixelFormat::Bgr);

        assert_eq!(frame.pixels.len(), 48);
        assert!(frame.pixels.iter().all(|&b| b == 0));
    }

    #[test]
    fn resolution_displays_as_dimensions() {
        assert_eq!(Resolution::new(640, 480).to_string(), "640x480");
    }
}
