#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use framecap_capture_engine::{
    AppendOutcome, AudioFormat, AudioFrame, AudioTrackSettings, CapturedSample, Muxer, MuxerFactory,
    PixelFormat, PooledBuffer, PreviewFrame, Recorder, RecorderConfig, RecorderListener,
    RecorderState, SampleFormat, SampleKind, TrackSample, TrackWriter, VideoFrame,
    VideoTrackSettings,
};
use framecap_common::clock::MediaTime;
use framecap_common::error::{FramecapError, FramecapResult, RecorderError};
use framecap_render_engine::{CompositionJob, Compositor};
use tokio::sync::mpsc;

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 4;

pub fn video_at(ms: i64) -> CapturedSample {
    video_sized(ms, WIDTH, HEIGHT)
}

pub fn video_sized(ms: i64, width: u32, height: u32) -> CapturedSample {
    let data = vec![0x80u8; (width * height * 4) as usize];
    CapturedSample::Video(
        VideoFrame::new(data, MediaTime::from_millis(ms), width, height, PixelFormat::Bgra)
            .expect("valid test frame"),
    )
}

pub fn stereo_48k() -> AudioFormat {
    AudioFormat::new(2, 48_000, SampleFormat::S16Le)
}

/// 1600 stereo S16 frames: 1/30 s at 48 kHz.
pub fn audio_at(ms: i64, format: Option<AudioFormat>) -> CapturedSample {
    CapturedSample::Audio(AudioFrame::new(
        vec![0u8; 1600 * 4],
        MediaTime::from_millis(ms),
        format,
    ))
}

/// Knobs of the fake muxer.
#[derive(Default)]
pub struct MuxBehavior {
    pub fail_open: AtomicBool,
    pub fail_video_append: AtomicBool,
    pub fail_audio_append: AtomicBool,
    pub fail_finish: AtomicBool,
    /// Only mono and stereo audio are accepted when set.
    pub stereo_only: AtomicBool,
    /// Keep appended video buffers alive, as an encoder queue would.
    pub hold_video: AtomicBool,
    /// Accept video samples but discard them.
    pub drop_video: AtomicBool,
}

/// Everything the fake muxers observed.
#[derive(Default)]
pub struct MuxLog {
    pub opened: Vec<PathBuf>,
    /// Whether a file already existed at the path when it was opened.
    pub stale_on_open: Vec<bool>,
    pub tracks: Vec<SampleKind>,
    pub audio_settings: Option<AudioTrackSettings>,
    pub session_start: Option<MediaTime>,
    pub session_end: Option<MediaTime>,
    pub video_pts: Vec<MediaTime>,
    pub audio_pts: Vec<MediaTime>,
    pub audio_end: Option<MediaTime>,
    pub held: Vec<PooledBuffer>,
    pub finished: u32,
    pub cancelled: u32,
}

#[derive(Clone, Default)]
pub struct FakeMuxerFactory {
    pub behavior: Arc<MuxBehavior>,
    pub log: Arc<Mutex<MuxLog>>,
}

impl FakeMuxerFactory {
    pub fn log(&self) -> std::sync::MutexGuard<'_, MuxLog> {
        self.log.lock().expect("mux log poisoned")
    }

    pub fn set(&self, flag: impl Fn(&MuxBehavior) -> &AtomicBool) {
        flag(&self.behavior).store(true, Ordering::SeqCst);
    }

    /// Drop held video buffers, returning them to the pool.
    pub fn release_video(&self) {
        self.log().held.clear();
    }
}

impl MuxerFactory for FakeMuxerFactory {
    fn open(&self, path: &Path) -> FramecapResult<Box<dyn Muxer>> {
        if self.behavior.fail_open.load(Ordering::SeqCst) {
            return Err(FramecapError::mux("open refused"));
        }
        {
            let mut log = self.log();
            log.opened.push(path.to_path_buf());
            log.stale_on_open.push(path.exists());
        }
        std::fs::write(path, b"partial")?;
        Ok(Box::new(FakeMuxer {
            path: path.to_path_buf(),
            behavior: Arc::clone(&self.behavior),
            log: Arc::clone(&self.log),
        }))
    }
}

struct FakeMuxer {
    path: PathBuf,
    behavior: Arc<MuxBehavior>,
    log: Arc<Mutex<MuxLog>>,
}

impl FakeMuxer {
    fn track(&self, kind: SampleKind) -> Arc<dyn TrackWriter> {
        self.log.lock().expect("mux log poisoned").tracks.push(kind);
        Arc::new(FakeTrack {
            kind,
            behavior: Arc::clone(&self.behavior),
            log: Arc::clone(&self.log),
        })
    }
}

impl Muxer for FakeMuxer {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_track(
        &mut self,
        _settings: &VideoTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>> {
        Ok(self.track(SampleKind::Video))
    }

    fn can_apply_audio_settings(&self, settings: &AudioTrackSettings) -> bool {
        !self.behavior.stereo_only.load(Ordering::SeqCst) || settings.channels <= 2
    }

    fn add_audio_track(
        &mut self,
        settings: &AudioTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>> {
        self.log.lock().expect("mux log poisoned").audio_settings = Some(*settings);
        Ok(self.track(SampleKind::Audio))
    }

    fn start_writing(&mut self) -> FramecapResult<()> {
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) -> FramecapResult<()> {
        self.log.lock().expect("mux log poisoned").session_start = Some(at);
        Ok(())
    }

    fn end_session(&mut self, at: MediaTime) {
        self.log.lock().expect("mux log poisoned").session_end = Some(at);
    }

    fn finish(self: Box<Self>) -> FramecapResult<PathBuf> {
        self.log.lock().expect("mux log poisoned").finished += 1;
        if self.behavior.fail_finish.load(Ordering::SeqCst) {
            return Err(FramecapError::mux("finish refused"));
        }
        std::fs::write(&self.path, b"complete")?;
        Ok(self.path.clone())
    }

    fn cancel(self: Box<Self>) {
        self.log.lock().expect("mux log poisoned").cancelled += 1;
        let _ = std::fs::remove_file(&self.path);
    }
}

struct FakeTrack {
    kind: SampleKind,
    behavior: Arc<MuxBehavior>,
    log: Arc<Mutex<MuxLog>>,
}

impl TrackWriter for FakeTrack {
    fn kind(&self) -> SampleKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn append(&self, sample: TrackSample) -> FramecapResult<AppendOutcome> {
        let mut log = self.log.lock().expect("mux log poisoned");
        match sample {
            TrackSample::Video { buffer, pts } => {
                if self.behavior.fail_video_append.load(Ordering::SeqCst) {
                    return Err(FramecapError::mux("video append refused"));
                }
                if self.behavior.drop_video.load(Ordering::SeqCst) {
                    return Ok(AppendOutcome::Dropped);
                }
                log.video_pts.push(pts);
                if self.behavior.hold_video.load(Ordering::SeqCst) {
                    log.held.push(buffer);
                }
            }
            TrackSample::Audio { pts, duration, .. } => {
                if self.behavior.fail_audio_append.load(Ordering::SeqCst) {
                    return Err(FramecapError::mux("audio append refused"));
                }
                log.audio_pts.push(pts);
                log.audio_end = Some(pts + duration.unwrap_or(MediaTime::ZERO));
            }
        }
        Ok(AppendOutcome::Written)
    }
}

/// Copies the source to the destination, or fails when told to.
#[derive(Default)]
pub struct CopyCompositor {
    pub fail: AtomicBool,
}

#[async_trait]
impl Compositor for CopyCompositor {
    async fn compose(&self, job: CompositionJob) -> FramecapResult<PathBuf> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FramecapError::render("export did not complete"));
        }
        tokio::fs::copy(&job.source, &job.destination).await?;
        Ok(job.destination)
    }

    fn name(&self) -> &str {
        "copy"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Aborted,
    Finished,
    WillFinalize,
    Finalized(PathBuf),
    Failure(RecorderError),
}

pub struct RecordingListener {
    events: mpsc::UnboundedSender<Event>,
    pub previews: AtomicU64,
    /// When set, every failure aborts the recording from inside the callback.
    pub abort_on_failure: OnceLock<Arc<Recorder>>,
}

impl RecorderListener for RecordingListener {
    fn on_preview_frame(&self, _frame: &PreviewFrame) {
        self.previews.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, error: RecorderError) {
        let _ = self.events.send(Event::Failure(error));
        if let Some(recorder) = self.abort_on_failure.get() {
            recorder.abort_recording();
        }
    }

    fn on_recording_started(&self) {
        let _ = self.events.send(Event::Started);
    }

    fn on_recording_aborted(&self) {
        let _ = self.events.send(Event::Aborted);
    }

    fn on_recording_finished(&self) {
        let _ = self.events.send(Event::Finished);
    }

    fn on_will_finalize(&self) {
        let _ = self.events.send(Event::WillFinalize);
    }

    fn on_finalized(&self, path: PathBuf) {
        let _ = self.events.send(Event::Finalized(path));
    }
}

/// What is left after [`Harness::shutdown`].
pub struct ShutDown {
    pub dir: tempfile::TempDir,
    pub config: RecorderConfig,
    pub muxers: FakeMuxerFactory,
    /// Events delivered before the control task exited.
    pub events: Vec<Event>,
}

/// A recorder wired to fakes inside a temporary directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: RecorderConfig,
    pub muxers: FakeMuxerFactory,
    pub compositor: Arc<CopyCompositor>,
    pub listener: Arc<RecordingListener>,
    pub recorder: Arc<Recorder>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pool(8)
    }

    pub fn with_pool(pool_capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RecorderConfig {
            temp_path: dir.path().join("recording.mov"),
            output_dir: dir.path().join("out"),
            container_extension: "mov".to_string(),
            video_codec: "h264".to_string(),
            audio_bitrate: 64_000,
            pool_capacity,
        };
        let muxers = FakeMuxerFactory::default();
        let compositor = Arc::new(CopyCompositor::default());
        let (tx, events) = mpsc::unbounded_channel();
        let listener = Arc::new(RecordingListener {
            events: tx,
            previews: AtomicU64::new(0),
            abort_on_failure: OnceLock::new(),
        });
        let weak: Arc<dyn RecorderListener> = listener.clone();
        let recorder = Arc::new(Recorder::spawn(
            config.clone(),
            Arc::new(muxers.clone()),
            compositor.clone(),
            Arc::downgrade(&weak),
        ));

        std::fs::create_dir_all(&config.output_dir).expect("output dir");
        Self {
            dir,
            config,
            muxers,
            compositor,
            listener,
            recorder,
            events,
        }
    }

    pub fn feed(&self, sample: CapturedSample) {
        self.recorder.on_frame(sample);
    }

    pub async fn wait_state(&self, state: RecorderState) {
        let mut rx = self.recorder.subscribe_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for recorder state")
            .expect("recorder state channel closed");
    }

    /// Next lifecycle event.
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for recorder event")
            .expect("event channel closed")
    }

    /// Collect events up to and including the first one matching `last`.
    pub async fn events_until(&mut self, last: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = last(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Events already delivered, without waiting.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Shut the recorder down and wait for its control task to exit.
    pub async fn shutdown(self) -> ShutDown {
        let Harness {
            dir,
            config,
            muxers,
            listener,
            recorder,
            mut events,
            ..
        } = self;
        let recorder = Arc::try_unwrap(recorder)
            .unwrap_or_else(|_| panic!("recorder handle is still shared"));
        tokio::time::timeout(Duration::from_secs(5), recorder.shutdown())
            .await
            .expect("timed out shutting down the recorder");

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        drop(listener);
        ShutDown {
            dir,
            config,
            muxers,
            events: seen,
        }
    }

    /// Feed one frame so the video track can be sized, then start.
    pub async fn start(&mut self) {
        self.feed(video_at(0));
        self.recorder.start_recording();
        self.wait_state(RecorderState::Recording).await;
        assert_eq!(self.next_event().await, Event::Started);
    }
}

pub fn is_terminal(event: &Event) -> bool {
    matches!(event, Event::Finalized(_) | Event::Failure(_))
}
