//! Error types shared across FrameCap crates.

use std::path::PathBuf;

/// Top-level error type for FrameCap operations.
#[derive(Debug, thiserror::Error)]
pub enum FramecapError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FramecapError.
pub type FramecapResult<T> = Result<T, FramecapError>;

impl FramecapError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

/// Failure kinds reported to the recorder listener.
///
/// Every failure of the recording pipeline surfaces as exactly one of
/// these through `on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("Could not create the media writer: {reason}")]
    CouldNotCreateWriter { reason: String },

    #[error("Could not add the video track to the writer")]
    CouldNotAddVideoTrack,

    #[error("Could not add the audio track to the writer")]
    CouldNotAddAudioTrack,

    #[error("The writer rejected the audio output settings")]
    CouldNotApplyAudioSettings,

    #[error("Could not write video data")]
    CouldNotWriteVideoData,

    #[error("Could not write audio data")]
    CouldNotWriteAudioData,

    #[error("Could not read the audio format description")]
    CouldNotGetAudioFormatDescription,

    #[error("Could not finish writing the video")]
    CouldNotCompleteWritingVideo,

    #[error("Composition of the finished recording failed")]
    CompositionFailed,
}

impl RecorderError {
    /// Whether this failure ends the active recording session.
    ///
    /// Dropped video frames are tolerated; a gap in the audio track is not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CouldNotWriteAudioData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_audio_write_failure_is_fatal() {
        assert!(RecorderError::CouldNotWriteAudioData.is_fatal());
        assert!(!RecorderError::CouldNotWriteVideoData.is_fatal());
        assert!(!RecorderError::CouldNotCompleteWritingVideo.is_fatal());
        assert!(!RecorderError::CompositionFailed.is_fatal());
    }

    #[test]
    fn writer_creation_failure_carries_reason() {
        let err = RecorderError::CouldNotCreateWriter {
            reason: "read-only directory".to_string(),
        };
        assert!(err.to_string().contains("read-only directory"));
    }
}
