//! State of one recording attempt, shared by the router and the control task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use framecap_common::clock::{DriftMeasurement, MediaTime};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::frame::VideoFrame;
use crate::muxer::{TrackWriter, VideoTrackSettings};

/// Writers and timing of the recording in progress.
///
/// Session-zero is fixed by the first video frame accepted after the
/// session was installed; every appended timestamp is relative to it.
pub struct RecordingSession {
    id: Uuid,
    video_settings: VideoTrackSettings,
    video: Arc<dyn TrackWriter>,
    audio: Option<Arc<dyn TrackWriter>>,
    session_zero: OnceLock<MediaTime>,
    failed: AtomicBool,
    mismatch_reported: AtomicBool,
    last_video_pts: Mutex<Option<MediaTime>>,
    last_audio_end: Mutex<Option<MediaTime>>,
    video_appended: AtomicU64,
    audio_appended: AtomicU64,
}

impl RecordingSession {
    pub fn new(
        video_settings: VideoTrackSettings,
        video: Arc<dyn TrackWriter>,
        audio: Option<Arc<dyn TrackWriter>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_settings,
            video,
            audio,
            session_zero: OnceLock::new(),
            failed: AtomicBool::new(false),
            mismatch_reported: AtomicBool::new(false),
            last_video_pts: Mutex::new(None),
            last_audio_end: Mutex::new(None),
            video_appended: AtomicU64::new(0),
            audio_appended: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Geometry the video track was created with.
    pub fn video_settings(&self) -> &VideoTrackSettings {
        &self.video_settings
    }

    /// Whether `frame` has the size and pixel format of the video track.
    pub fn fits_video_track(&self, frame: &VideoFrame) -> bool {
        let track = &self.video_settings;
        frame.width() == track.width
            && frame.height() == track.height
            && frame.format() == track.pixel_format
    }

    pub fn video(&self) -> &Arc<dyn TrackWriter> {
        &self.video
    }

    pub fn audio(&self) -> Option<&Arc<dyn TrackWriter>> {
        self.audio.as_ref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Whether the first video frame has been accepted.
    pub fn is_started(&self) -> bool {
        self.session_zero.get().is_some()
    }

    pub fn session_zero(&self) -> Option<MediaTime> {
        self.session_zero.get().copied()
    }

    /// Fix session-zero at `pts` unless already set.
    ///
    /// Returns the origin and whether this call set it.
    pub(crate) fn start_at(&self, pts: MediaTime) -> (MediaTime, bool) {
        let mut first = false;
        let zero = *self.session_zero.get_or_init(|| {
            first = true;
            pts
        });
        (zero, first)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Mark the session failed. Returns true for the first caller only.
    pub(crate) fn mark_failed(&self) -> bool {
        !self.failed.swap(true, Ordering::SeqCst)
    }

    /// Returns true the first time a mismatched frame is noted.
    pub(crate) fn note_mismatch(&self) -> bool {
        !self.mismatch_reported.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn note_video(&self, pts: MediaTime) {
        *self.last_video_pts.lock() = Some(pts);
        self.video_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_audio(&self, end: MediaTime) {
        *self.last_audio_end.lock() = Some(end);
        self.audio_appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Last appended video timestamp, relative to session-zero.
    pub fn last_video_pts(&self) -> Option<MediaTime> {
        *self.last_video_pts.lock()
    }

    /// End of the last appended audio buffer, relative to session-zero.
    pub fn last_audio_end(&self) -> Option<MediaTime> {
        *self.last_audio_end.lock()
    }

    pub fn video_appended(&self) -> u64 {
        self.video_appended.load(Ordering::Relaxed)
    }

    pub fn audio_appended(&self) -> u64 {
        self.audio_appended.load(Ordering::Relaxed)
    }

    /// Audio end measured against the video end.
    pub fn drift(&self) -> Option<DriftMeasurement> {
        Some(DriftMeasurement {
            reference: self.last_video_pts()?,
            measured: self.last_audio_end()?,
        })
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("id", &self.id)
            .field("has_audio", &self.has_audio())
            .field("session_zero", &self.session_zero())
            .field("failed", &self.is_failed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, SampleKind};
    use crate::muxer::{AppendOutcome, TrackSample};
    use framecap_common::error::FramecapResult;

    struct NullWriter;

    impl TrackWriter for NullWriter {
        fn kind(&self) -> SampleKind {
            SampleKind::Video
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn append(&self, _sample: TrackSample) -> FramecapResult<AppendOutcome> {
            Ok(AppendOutcome::Written)
        }
    }

    fn video_only() -> RecordingSession {
        let settings = VideoTrackSettings {
            width: 4,
            height: 2,
            pixel_format: PixelFormat::Gray8,
            codec: "h264".to_string(),
        };
        RecordingSession::new(settings, Arc::new(NullWriter), None)
    }

    #[test]
    fn session_zero_is_set_once() {
        let session = video_only();
        assert!(!session.is_started());

        let (zero, first) = session.start_at(MediaTime::from_millis(500));
        assert!(first);
        assert_eq!(zero, MediaTime::from_millis(500));

        let (zero, first) = session.start_at(MediaTime::from_millis(533));
        assert!(!first);
        assert_eq!(zero, MediaTime::from_millis(500));
        assert!(session.is_started());
    }

    #[test]
    fn only_first_failure_is_reported() {
        let session = video_only();
        assert!(session.mark_failed());
        assert!(!session.mark_failed());
        assert!(session.is_failed());
    }

    #[test]
    fn drift_needs_both_tracks() {
        let session = video_only();
        session.note_video(MediaTime::from_millis(66));
        assert!(session.drift().is_none());

        session.note_audio(MediaTime::from_millis(100));
        let drift = session.drift().unwrap();
        assert_eq!(drift.drift_ms(), 34.0);
        assert!(!drift.exceeds_threshold_ms(100.0));
    }

    #[test]
    fn frames_must_match_the_video_track() {
        let session = video_only();
        let fits = VideoFrame::new(vec![0; 8], MediaTime::ZERO, 4, 2, PixelFormat::Gray8).unwrap();
        let wider = VideoFrame::new(vec![0; 16], MediaTime::ZERO, 8, 2, PixelFormat::Gray8).unwrap();
        let rgba = VideoFrame::new(vec![0; 32], MediaTime::ZERO, 4, 2, PixelFormat::Rgba).unwrap();
        assert!(session.fits_video_track(&fits));
        assert!(!session.fits_video_track(&wider));
        assert!(!session.fits_video_track(&rgba));

        assert!(session.note_mismatch());
        assert!(!session.note_mismatch());
    }
}
