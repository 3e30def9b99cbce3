//! Composition jobs and the compositor seam.
//!
//! A [`CompositionJob`] names the finished recording, the destination,
//! and an optional separate audio source. A [`Compositor`] turns a job
//! into a playable file, or fails without producing output.

use std::path::PathBuf;

use async_trait::async_trait;
use framecap_common::config::CompositionDefaults;
use framecap_common::error::{FramecapError, FramecapResult};
use serde::{Deserialize, Serialize};

/// A post-processing request for one finished recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionJob {
    /// The finalized recording.
    pub source: PathBuf,

    /// Where the composed file is written.
    pub destination: PathBuf,

    /// Audio to merge in place of the recording's own audio.
    pub audio: Option<PathBuf>,
}

impl CompositionJob {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: impl Into<PathBuf>) -> Self {
        self.audio = Some(audio.into());
        self
    }
}

/// Clockwise rotation applied to the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> FramecapResult<Self> {
        match degrees % 360 {
            0 => Ok(Self::None),
            90 => Ok(Self::Cw90),
            180 => Ok(Self::Cw180),
            270 => Ok(Self::Cw270),
            other => Err(FramecapError::config(format!(
                "Unsupported rotation {other}°; expected a multiple of 90"
            ))),
        }
    }

    /// Whether the rotated frame swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Self::Cw90 | Self::Cw270)
    }
}

/// Geometry applied to every frame of the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeometryTransform {
    pub rotation: Rotation,

    /// Mirror horizontally, applied after rotation.
    pub mirror: bool,
}

impl GeometryTransform {
    pub const IDENTITY: GeometryTransform = GeometryTransform {
        rotation: Rotation::None,
        mirror: false,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Render size of a `width`x`height` source after the transform.
    pub fn render_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.rotation.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// ffmpeg filters implementing the transform, in application order.
    pub fn filters(&self) -> Vec<&'static str> {
        let mut filters = match self.rotation {
            Rotation::None => Vec::new(),
            Rotation::Cw90 => vec!["transpose=clock"],
            Rotation::Cw180 => vec!["hflip", "vflip"],
            Rotation::Cw270 => vec!["transpose=cclock"],
        };
        if self.mirror {
            filters.push("hflip");
        }
        filters
    }
}

/// Fixed encode parameters shared by every composition job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionSettings {
    pub transform: GeometryTransform,
    pub frame_rate: u32,
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate_kbps: u32,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            transform: GeometryTransform::IDENTITY,
            frame_rate: 30,
            preset: "medium".to_string(),
            crf: 23,
            audio_bitrate_kbps: 64,
        }
    }
}

impl CompositionSettings {
    pub fn from_defaults(defaults: &CompositionDefaults) -> FramecapResult<Self> {
        Ok(Self {
            transform: GeometryTransform {
                rotation: Rotation::from_degrees(defaults.rotation_degrees)?,
                mirror: defaults.mirror,
            },
            frame_rate: defaults.frame_rate.max(1),
            preset: defaults.preset.clone(),
            crf: defaults.crf,
            audio_bitrate_kbps: defaults.audio_bitrate_kbps.max(8),
        })
    }
}

/// Duration the composed file spans when merging a separate audio source.
///
/// The longer stream wins: a video longer than its audio keeps its full
/// length with the audio padded by silence, and an audio source longer
/// than the video extends the output with the video's last frame held.
pub fn reference_duration(video_secs: f64, audio_secs: Option<f64>) -> f64 {
    match audio_secs {
        Some(audio) => video_secs.max(audio),
        None => video_secs,
    }
}

/// Post-processes finished recordings.
///
/// Implementations run entirely off the capture pipeline; `compose`
/// resolves to the destination path only when a complete file exists
/// there.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn compose(&self, job: CompositionJob) -> FramecapResult<PathBuf>;

    /// Backend name.
    fn name(&self) -> &str;
}
