//! Video frame types

use std::sync::Arc;

use crate::CameraError;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 32-bit BGRA, the usual capture output format
    #[default]
    Bgra32,
    Rgb24,
    Gray8,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Opaque image buffer handed from the camera to the detector.
///
/// Pixel data sits behind an `Arc`, so cloning a frame or moving it onto a
/// worker thread never copies the buffer.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Arc<[u8]>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Wrap raw pixel data, checking it matches the declared geometry
    pub fn new(
        data: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp_ns: u64,
        sequence: u64,
    ) -> Result<Self, CameraError> {
        let data = data.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(CameraError::Format(format!(
                "{}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp_ns,
            sequence,
        })
    }

    /// Zero-filled frame of the given geometry
    pub fn blank(width: u32, height: u32, format: PixelFormat, timestamp_ns: u64, sequence: u64) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            data: vec![0u8; len].into(),
            width,
            height,
            format,
            timestamp_ns,
            sequence,
        }
    }

    /// Raw pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}
