//! Pluggable per-frame video transform.

use crate::frame::VideoFrame;

/// Transform applied to every video frame before preview and recording.
///
/// Runs on the video capture thread, so implementations must not block.
pub trait FrameFilter: Send + Sync {
    fn apply(&self, frame: VideoFrame) -> VideoFrame;
}

/// Passes frames through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFilter;

impl FrameFilter for IdentityFilter {
    fn apply(&self, frame: VideoFrame) -> VideoFrame {
        frame
    }
}

impl<F> FrameFilter for F
where
    F: Fn(VideoFrame) -> VideoFrame + Send + Sync,
{
    fn apply(&self, frame: VideoFrame) -> VideoFrame {
        self(frame)
    }
}
