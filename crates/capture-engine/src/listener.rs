//! Observer interface for recorder events.
//!
//! The recorder holds its listener through a [`Weak`](std::sync::Weak)
//! reference and never extends its lifetime. Events for a dropped listener
//! are discarded.

use std::path::PathBuf;
use std::sync::Weak;

use framecap_common::clock::MediaTime;
use framecap_common::error::RecorderError;

use crate::pool::PooledBuffer;

/// A filtered frame rendered into a pool buffer for display.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub buffer: PooledBuffer,
    pub pts: MediaTime,
}

/// Receives preview frames and recording lifecycle events.
///
/// Preview frames arrive on the video capture thread; lifecycle events on
/// the recorder's control task. Implementations hop to their own context
/// when they need one. Every method defaults to doing nothing.
pub trait RecorderListener: Send + Sync {
    fn on_preview_frame(&self, _frame: &PreviewFrame) {}

    fn on_failure(&self, _error: RecorderError) {}

    fn on_recording_started(&self) {}

    fn on_recording_aborted(&self) {}

    /// The container has been finalized, successfully or not.
    fn on_recording_finished(&self) {}

    /// Recording stopped; the container is about to be finalized.
    fn on_will_finalize(&self) {}

    /// The composed recording is available at `path`.
    fn on_finalized(&self, _path: PathBuf) {}
}

/// Non-owning handle to the listener.
#[derive(Clone)]
pub(crate) struct ListenerHandle {
    inner: Weak<dyn RecorderListener>,
}

impl ListenerHandle {
    pub(crate) fn new(inner: Weak<dyn RecorderListener>) -> Self {
        Self { inner }
    }

    pub(crate) fn with(&self, f: impl FnOnce(&dyn RecorderListener)) {
        if let Some(listener) = self.inner.upgrade() {
            f(listener.as_ref());
        }
    }

    pub(crate) fn failure(&self, error: RecorderError) {
        tracing::warn!(%error, "Recorder failure");
        self.with(|l| l.on_failure(error));
    }
}
