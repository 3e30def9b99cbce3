//! Media buffers delivered by the capture device.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use framecap_common::clock::MediaTime;
use framecap_common::error::{FramecapError, FramecapResult};

/// Pixel layout of a video buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra | Self::Rgba => 4,
            Self::Gray8 => 1,
        }
    }

    /// GStreamer raw video format name.
    pub fn gst_name(self) -> &'static str {
        match self {
            Self::Bgra => "BGRA",
            Self::Rgba => "RGBA",
            Self::Gray8 => "GRAY8",
        }
    }
}

impl FromStr for PixelFormat {
    type Err = FramecapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BGRA" => Ok(Self::Bgra),
            "RGBA" => Ok(Self::Rgba),
            "GRAY8" => Ok(Self::Gray8),
            other => Err(FramecapError::config(format!("Unknown pixel format: {other}"))),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.gst_name())
    }
}

/// Width and height of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

/// One captured (or filtered) video frame.
///
/// Immutable once built: filters produce a new frame, and recording
/// renders a copy into a pool buffer.
#[derive(Clone)]
pub struct VideoFrame {
    data: Bytes,
    pts: MediaTime,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
}

impl VideoFrame {
    /// Build a tightly packed frame.
    pub fn new(
        data: impl Into<Bytes>,
        pts: MediaTime,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> FramecapResult<Self> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::with_stride(data, pts, width, height, format, stride)
    }

    /// Build a frame whose rows are `stride` bytes apart.
    pub fn with_stride(
        data: impl Into<Bytes>,
        pts: MediaTime,
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
    ) -> FramecapResult<Self> {
        let data = data.into();
        let row_bytes = width as usize * format.bytes_per_pixel();
        if width == 0 || height == 0 {
            return Err(FramecapError::capture(format!(
                "Invalid frame dimensions {width}x{height}"
            )));
        }
        if stride < row_bytes {
            return Err(FramecapError::capture(format!(
                "Stride {stride} is shorter than a {width}px {format} row"
            )));
        }
        let needed = stride * (height as usize - 1) + row_bytes;
        if data.len() < needed {
            return Err(FramecapError::capture(format!(
                "Frame buffer holds {} bytes, {width}x{height} {format} needs {needed}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            pts,
            width,
            height,
            format,
            stride,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pts(&self) -> MediaTime {
        self.pts
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> VideoDimensions {
        VideoDimensions {
            width: self.width,
            height: self.height,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes of one row, without stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

/// Speaker arrangement of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Discrete(u32),
}

impl ChannelLayout {
    pub fn for_channels(channels: u32) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            n => Self::Discrete(n),
        }
    }
}

/// Sample encoding of interleaved PCM audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    S16Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::F32Le => 4,
        }
    }

    pub fn gst_name(self) -> &'static str {
        match self {
            Self::S16Le => "S16LE",
            Self::F32Le => "F32LE",
        }
    }
}

/// Format description carried by audio buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(channels: u32, sample_rate: u32, sample_format: SampleFormat) -> Self {
        Self {
            channels,
            sample_rate,
            layout: ChannelLayout::for_channels(channels),
            sample_format,
        }
    }

    /// Bytes of one interleaved frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }
}

/// One captured chunk of interleaved PCM audio.
#[derive(Clone)]
pub struct AudioFrame {
    data: Bytes,
    pts: MediaTime,
    format: Option<AudioFormat>,
}

impl AudioFrame {
    /// `format` is `None` when the device delivered a buffer without a
    /// format description; such buffers are never recorded.
    pub fn new(data: impl Into<Bytes>, pts: MediaTime, format: Option<AudioFormat>) -> Self {
        Self {
            data: data.into(),
            pts,
            format,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pts(&self) -> MediaTime {
        self.pts
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Playback duration derived from the byte count and format.
    pub fn duration(&self) -> Option<MediaTime> {
        let format = self.format?;
        let frame_bytes = format.bytes_per_frame();
        if frame_bytes == 0 || format.sample_rate == 0 {
            return None;
        }
        let samples = (self.data.len() / frame_bytes) as i64;
        Some(MediaTime::from_nanos(
            samples * 1_000_000_000 / format.sample_rate as i64,
        ))
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame")
            .field("pts", &self.pts)
            .field("bytes", &self.data.len())
            .field("format", &self.format)
            .finish()
    }
}

/// Which stream a device buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Video,
    Audio,
}

/// A buffer as delivered by the capture device callback.
#[derive(Debug, Clone)]
pub enum CapturedSample {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl CapturedSample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Video(_) => SampleKind::Video,
            Self::Audio(_) => SampleKind::Audio,
        }
    }

    pub fn pts(&self) -> MediaTime {
        match self {
            Self::Video(frame) => frame.pts(),
            Self::Audio(frame) => frame.pts(),
        }
    }
}
