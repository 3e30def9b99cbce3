//! Device-facing entry point of the pipeline.
//!
//! The router is called from the video and audio capture threads, possibly
//! at the same time. It never blocks on the control task: it reads the
//! active session under a read lock, appends, and reports anything that
//! needs a state transition through the control channel.
//!
//! ```text
//!  video ─► filter ─► pool.acquire ─► render ─┬─► preview
//!                                             └─► video writer (if recording)
//!  audio ─► format? ─► rebase on session-zero ─► audio writer (if recording)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framecap_common::clock::MediaTime;
use framecap_common::error::RecorderError;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::filter::{FrameFilter, IdentityFilter};
use crate::frame::{AudioFormat, AudioFrame, CapturedSample, PixelFormat, VideoDimensions, VideoFrame};
use crate::listener::{ListenerHandle, PreviewFrame};
use crate::muxer::{AppendOutcome, TrackSample};
use crate::pool::{render_into, FrameBufferPool, PoolStats};
use crate::recorder::ControlEvent;
use crate::session::RecordingSession;

/// Formats last delivered by the device.
#[derive(Debug, Default, Clone, Copy)]
struct DeviceFormats {
    video: Option<(VideoDimensions, PixelFormat)>,
    audio: Option<AudioFormat>,
}

/// Frame counters since the router was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Video frames delivered by the device.
    pub video_frames: u64,
    /// Audio buffers delivered by the device.
    pub audio_frames: u64,
    /// Rendered frames handed to the preview sink.
    pub previews: u64,
    /// Video frames skipped because the pool had no free buffer.
    pub pool_skips: u64,
    /// Samples skipped because their writer was not ready.
    pub not_ready_skips: u64,
    /// Video frames whose size or format differs from the video track.
    pub mismatched_frames: u64,
    /// Samples a writer accepted but discarded.
    pub writer_drops: u64,
    /// Video frames written to the active session.
    pub video_appended: u64,
    /// Audio buffers written to the active session.
    pub audio_appended: u64,
}

#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    previews: AtomicU64,
    pool_skips: AtomicU64,
    not_ready_skips: AtomicU64,
    mismatched_frames: AtomicU64,
    writer_drops: AtomicU64,
    video_appended: AtomicU64,
    audio_appended: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct SampleRouter {
    pool: FrameBufferPool,
    filter: RwLock<Arc<dyn FrameFilter>>,
    formats: Mutex<DeviceFormats>,
    active: RwLock<Option<Arc<RecordingSession>>>,
    listener: ListenerHandle,
    control: mpsc::UnboundedSender<ControlEvent>,
    counters: Counters,
}

impl SampleRouter {
    pub(crate) fn new(
        pool: FrameBufferPool,
        listener: ListenerHandle,
        control: mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        Self {
            pool,
            filter: RwLock::new(Arc::new(IdentityFilter)),
            formats: Mutex::new(DeviceFormats::default()),
            active: RwLock::new(None),
            listener,
            control,
            counters: Counters::default(),
        }
    }

    /// Device callback. Never blocks on recorder state transitions.
    pub fn on_frame(&self, sample: CapturedSample) {
        match sample {
            CapturedSample::Video(frame) => self.on_video(frame),
            CapturedSample::Audio(frame) => self.on_audio(frame),
        }
    }

    /// Replace the per-frame filter. Takes effect from the next frame.
    pub fn set_filter(&self, filter: Arc<dyn FrameFilter>) {
        *self.filter.write() = filter;
    }

    /// Dimensions and pixel format of the last filtered video frame.
    pub fn observed_video(&self) -> Option<(VideoDimensions, PixelFormat)> {
        self.formats.lock().video
    }

    /// Format description of the last audio buffer that carried one.
    pub fn observed_audio_format(&self) -> Option<AudioFormat> {
        self.formats.lock().audio
    }

    pub fn is_recording(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn pool(&self) -> &FrameBufferPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            video_frames: c.video_frames.load(Ordering::Relaxed),
            audio_frames: c.audio_frames.load(Ordering::Relaxed),
            previews: c.previews.load(Ordering::Relaxed),
            pool_skips: c.pool_skips.load(Ordering::Relaxed),
            not_ready_skips: c.not_ready_skips.load(Ordering::Relaxed),
            mismatched_frames: c.mismatched_frames.load(Ordering::Relaxed),
            writer_drops: c.writer_drops.load(Ordering::Relaxed),
            video_appended: c.video_appended.load(Ordering::Relaxed),
            audio_appended: c.audio_appended.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn install(&self, session: Arc<RecordingSession>) {
        *self.active.write() = Some(session);
    }

    /// Detach the active session.
    ///
    /// Waits for in-flight appends; once this returns no further sample
    /// reaches the detached session's writers.
    pub(crate) fn take_session(&self) -> Option<Arc<RecordingSession>> {
        self.active.write().take()
    }

    fn on_video(&self, frame: VideoFrame) {
        bump(&self.counters.video_frames);

        let filter = Arc::clone(&*self.filter.read());
        let frame = filter.apply(frame);
        let pts = frame.pts();
        self.formats.lock().video = Some((frame.dimensions(), frame.format()));

        let Some(mut target) = self.pool.acquire(frame.width(), frame.height(), frame.format())
        else {
            bump(&self.counters.pool_skips);
            tracing::debug!(%pts, "Frame pool exhausted; frame skipped");
            return;
        };
        if let Err(e) = render_into(&frame, &mut target) {
            tracing::debug!(%pts, error = %e, "Frame render failed; frame skipped");
            return;
        }
        let rendered = target.freeze();

        bump(&self.counters.previews);
        self.listener.with(|l| {
            l.on_preview_frame(&PreviewFrame {
                buffer: rendered.clone(),
                pts,
            })
        });

        let active = self.active.read();
        let Some(session) = active.as_ref() else {
            return;
        };
        if session.is_failed() {
            return;
        }
        if !session.fits_video_track(&frame) {
            bump(&self.counters.mismatched_frames);
            tracing::debug!(
                %pts,
                width = frame.width(),
                height = frame.height(),
                format = %frame.format(),
                "Frame does not match the video track; skipped"
            );
            if session.note_mismatch() {
                let session = Arc::clone(session);
                drop(active);
                tracing::warn!(
                    session = %session.id(),
                    track = ?session.video_settings(),
                    "Capture geometry changed mid-recording"
                );
                self.listener.failure(RecorderError::CouldNotWriteVideoData);
            }
            return;
        }

        let (zero, first) = session.start_at(pts);
        if first {
            tracing::info!(session = %session.id(), session_zero = %pts, "Recording session started");
            self.send(ControlEvent::SessionStarted {
                id: session.id(),
                at: pts,
            });
        }
        let Some(rel) = pts.since(zero) else {
            tracing::debug!(%pts, "Video frame precedes session-zero; dropped");
            return;
        };

        let writer = session.video();
        if !writer.is_ready() {
            bump(&self.counters.not_ready_skips);
            tracing::debug!(%pts, "Video writer not ready; frame dropped");
            return;
        }
        match writer.append(TrackSample::Video {
            buffer: rendered,
            pts: rel,
        }) {
            Ok(AppendOutcome::Written) => {
                session.note_video(rel);
                bump(&self.counters.video_appended);
            }
            Ok(AppendOutcome::Dropped) => bump(&self.counters.writer_drops),
            Err(e) => {
                tracing::warn!(%pts, error = %e, "Video append failed");
                let session = Arc::clone(session);
                drop(active);
                self.append_failed(&session, RecorderError::CouldNotWriteVideoData);
            }
        }
    }

    fn on_audio(&self, frame: AudioFrame) {
        bump(&self.counters.audio_frames);

        let Some(format) = frame.format() else {
            tracing::trace!(pts = %frame.pts(), "Audio buffer without format description dropped");
            return;
        };
        self.formats.lock().audio = Some(format);

        let active = self.active.read();
        let Some(session) = active.as_ref() else {
            return;
        };
        let Some(writer) = session.audio() else {
            return;
        };
        if session.is_failed() {
            return;
        }
        // Audio waits for the first video frame to fix session-zero.
        let Some(zero) = session.session_zero() else {
            return;
        };
        let Some(rel) = frame.pts().since(zero) else {
            tracing::trace!(pts = %frame.pts(), "Audio buffer precedes session-zero; dropped");
            return;
        };

        if !writer.is_ready() {
            bump(&self.counters.not_ready_skips);
            tracing::debug!(pts = %frame.pts(), "Audio writer not ready; buffer dropped");
            return;
        }
        let duration = frame.duration();
        match writer.append(TrackSample::Audio {
            data: frame.data().clone(),
            pts: rel,
            duration,
        }) {
            Ok(AppendOutcome::Written) => {
                session.note_audio(rel + duration.unwrap_or(MediaTime::ZERO));
                bump(&self.counters.audio_appended);
            }
            Ok(AppendOutcome::Dropped) => bump(&self.counters.writer_drops),
            Err(e) => {
                tracing::warn!(pts = %frame.pts(), error = %e, "Audio append failed");
                let session = Arc::clone(session);
                drop(active);
                self.append_failed(&session, RecorderError::CouldNotWriteAudioData);
            }
        }
    }

    /// Report a failed append. Fatal kinds also end the session.
    ///
    /// Called without router locks held: the listener may call back into
    /// the recorder.
    fn append_failed(&self, session: &RecordingSession, error: RecorderError) {
        if !error.is_fatal() {
            self.listener.failure(error);
            return;
        }
        if !session.mark_failed() {
            return;
        }
        let id = session.id();
        tracing::error!(session = %id, %error, "Fatal append failure; aborting");
        self.listener.failure(error);
        self.send(ControlEvent::Abort { id: Some(id) });
    }

    fn send(&self, event: ControlEvent) {
        if self.control.send(event).is_err() {
            tracing::warn!("Recorder control task has stopped; event dropped");
        }
    }
}

impl std::fmt::Debug for SampleRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRouter")
            .field("recording", &self.is_recording())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
