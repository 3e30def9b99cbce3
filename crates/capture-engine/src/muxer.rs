//! Muxer seam: container writers with independent per-track inputs.
//!
//! All [`Muxer`] methods run on the recorder's control task. Track writers
//! are shared with the capture threads and append under their own locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use framecap_common::clock::MediaTime;
use framecap_common::error::{FramecapResult, RecorderError};

use crate::frame::{AudioFormat, ChannelLayout, PixelFormat, SampleFormat, SampleKind};
use crate::pool::PooledBuffer;

/// Parameters of the video track, taken from the last observed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrackSettings {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub codec: String,
}

/// Parameters of the audio track, taken from the last observed format
/// description and a constant encoder bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrackSettings {
    pub channels: u32,
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub sample_format: SampleFormat,
    pub bitrate: u32,
}

impl AudioTrackSettings {
    pub fn from_format(format: &AudioFormat, bitrate: u32) -> Result<Self, RecorderError> {
        if format.channels == 0 || format.sample_rate == 0 {
            return Err(RecorderError::CouldNotGetAudioFormatDescription);
        }
        Ok(Self {
            channels: format.channels,
            sample_rate: format.sample_rate,
            layout: format.layout,
            sample_format: format.sample_format,
            bitrate,
        })
    }
}

/// A buffer handed to a track writer, timestamped relative to session-zero.
#[derive(Debug, Clone)]
pub enum TrackSample {
    Video {
        buffer: PooledBuffer,
        pts: MediaTime,
    },
    Audio {
        data: Bytes,
        pts: MediaTime,
        duration: Option<MediaTime>,
    },
}

impl TrackSample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Video { .. } => SampleKind::Video,
            Self::Audio { .. } => SampleKind::Audio,
        }
    }

    pub fn pts(&self) -> MediaTime {
        match self {
            Self::Video { pts, .. } | Self::Audio { pts, .. } => *pts,
        }
    }
}

/// What a track writer did with an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Queued for the container.
    Written,
    /// Discarded without error, e.g. timestamped past the session end.
    Dropped,
}

/// Input of one media track.
///
/// `append` requires `is_ready()`; callers check readiness first and skip
/// the sample otherwise. Appending to a writer that is not ready, or whose
/// muxer has failed, returns an error.
pub trait TrackWriter: Send + Sync {
    fn kind(&self) -> SampleKind;

    /// Whether the bounded input queue can take another sample.
    fn is_ready(&self) -> bool;

    fn append(&self, sample: TrackSample) -> FramecapResult<AppendOutcome>;
}

/// One container file being written.
///
/// Lifecycle: tracks are added, then `start_writing`, then exactly one
/// `start_session`/`end_session` pair, then `finish` or `cancel`.
/// `cancel` may be called at any point and deletes partial output.
pub trait Muxer: Send {
    fn output_path(&self) -> &Path;

    fn add_video_track(
        &mut self,
        settings: &VideoTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>>;

    /// Whether `add_audio_track` would accept these settings.
    fn can_apply_audio_settings(&self, settings: &AudioTrackSettings) -> bool;

    fn add_audio_track(
        &mut self,
        settings: &AudioTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>>;

    /// Prepare the container for appends.
    fn start_writing(&mut self) -> FramecapResult<()>;

    /// Open the write session at session-zero (`at` is the first video
    /// frame's source timestamp).
    fn start_session(&mut self, at: MediaTime) -> FramecapResult<()>;

    /// Close the write session at the last video timestamp, relative to
    /// session-zero.
    fn end_session(&mut self, at: MediaTime);

    /// Flush every track and complete the container. Blocks until done.
    fn finish(self: Box<Self>) -> FramecapResult<PathBuf>;

    /// Drop buffered data and delete the partial output. Blocks until done.
    fn cancel(self: Box<Self>);
}

/// Opens muxers for the recorder, one per recording attempt.
pub trait MuxerFactory: Send + Sync {
    fn open(&self, path: &Path) -> FramecapResult<Box<dyn Muxer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_settings_need_channels_and_rate() {
        let mut format = AudioFormat::new(2, 44_100, SampleFormat::S16Le);
        let settings = AudioTrackSettings::from_format(&format, 64_000).unwrap();
        assert_eq!(settings.layout, ChannelLayout::Stereo);
        assert_eq!(settings.bitrate, 64_000);

        format.sample_rate = 0;
        assert_eq!(
            AudioTrackSettings::from_format(&format, 64_000),
            Err(RecorderError::CouldNotGetAudioFormatDescription)
        );
    }
}
