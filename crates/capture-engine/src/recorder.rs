//! Recording state machine.
//!
//! Every transition and every [`Muxer`] call runs on one control task fed
//! by typed events, so transitions never interleave. The public
//! [`Recorder`] handle only sends events, except that `stop_recording` and
//! `abort_recording` detach the active session from the router before
//! sending, which stops appends immediately.
//!
//! ```text
//!          start                stop                 finalized
//!  Idle ──────────► Recording ────────► Finishing ──────────────► Idle
//!                      │                    │
//!                      │ abort              │ abort (hard cancel)
//!                      ▼                    ▼
//!                   Aborting ─────────────────────────────────────► Idle
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use framecap_common::clock::MediaTime;
use framecap_common::config::{AppConfig, RecordingDefaults};
use framecap_common::error::{FramecapError, FramecapResult, RecorderError};
use framecap_render_engine::{CompositionJob, Compositor};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::filter::FrameFilter;
use crate::frame::{CapturedSample, PixelFormat};
use crate::listener::{ListenerHandle, RecorderListener};
use crate::muxer::{AudioTrackSettings, Muxer, MuxerFactory, VideoTrackSettings};
use crate::pool::FrameBufferPool;
use crate::router::SampleRouter;
use crate::session::RecordingSession;

const DRIFT_THRESHOLD_MS: f64 = 100.0;

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
    Finishing,
    Aborting,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Finishing => "finishing",
            Self::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// External interruptions of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionSignal {
    SessionInterrupted,
    InterruptionEnded,
    AppBackgrounded,
}

/// Recorder parameters.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Fixed temporary container, overwritten by every recording.
    pub temp_path: PathBuf,
    /// Directory receiving composed recordings.
    pub output_dir: PathBuf,
    /// Extension of composed recordings (without the dot).
    pub container_extension: String,
    /// Video codec requested from the muxer.
    pub video_codec: String,
    /// Constant audio encoder bitrate in bits per second.
    pub audio_bitrate: u32,
    /// Render buffers shared by preview and recording.
    pub pool_capacity: usize,
}

impl RecorderConfig {
    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self {
            temp_path: defaults.temp_path(),
            output_dir: defaults.output_dir.clone(),
            container_extension: defaults.container_extension.clone(),
            video_codec: defaults.video_codec.clone(),
            audio_bitrate: defaults.audio_bitrate,
            pool_capacity: defaults.pool_capacity,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::from_defaults(&config.recording)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// A fresh destination for a composed recording.
    pub fn unique_output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", Uuid::new_v4(), self.container_extension))
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from_defaults(&RecordingDefaults::default())
    }
}

/// Events handled by the control task.
pub(crate) enum ControlEvent {
    Start,
    Stop,
    /// `id` restricts the abort to one session; `None` aborts whatever is active.
    Abort { id: Option<Uuid> },
    SessionStarted { id: Uuid, at: MediaTime },
    Finalized { id: Uuid, result: FramecapResult<PathBuf> },
    Shutdown,
}

/// Handle to a running recorder.
///
/// Must be created inside a Tokio runtime. Dropping the handle stops the
/// control task and cancels any recording in progress.
pub struct Recorder {
    router: Arc<SampleRouter>,
    control: mpsc::UnboundedSender<ControlEvent>,
    state: watch::Receiver<RecorderState>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Recorder {
    pub fn spawn(
        config: RecorderConfig,
        muxers: Arc<dyn MuxerFactory>,
        compositor: Arc<dyn Compositor>,
        listener: Weak<dyn RecorderListener>,
    ) -> Self {
        let (control, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(RecorderState::Idle);
        let listener = ListenerHandle::new(listener);

        let router = Arc::new(SampleRouter::new(
            FrameBufferPool::new(config.pool_capacity),
            listener.clone(),
            control.clone(),
        ));

        let task = ControlTask {
            config,
            muxers,
            compositor,
            router: Arc::clone(&router),
            listener,
            events: control.clone(),
            state: state_tx,
            phase: Phase::Idle,
        };
        let task = tokio::spawn(task.run(events));

        Self {
            router,
            control,
            state,
            task: Some(task),
        }
    }

    /// Begin a recording. Ignored unless idle.
    pub fn start_recording(&self) {
        self.send(ControlEvent::Start);
    }

    /// Stop appending and finalize the recording in progress.
    pub fn stop_recording(&self) {
        if let Some(session) = self.router.take_session() {
            tracing::debug!(session = %session.id(), "Appends stopped");
        }
        self.send(ControlEvent::Stop);
    }

    /// Discard the recording in progress. A no-op when idle.
    pub fn abort_recording(&self) {
        if let Some(session) = self.router.take_session() {
            session.mark_failed();
        }
        self.send(ControlEvent::Abort { id: None });
    }

    pub fn handle_interruption(&self, signal: InterruptionSignal) {
        tracing::info!(?signal, "Capture interruption");
        match signal {
            InterruptionSignal::SessionInterrupted | InterruptionSignal::AppBackgrounded => {
                self.abort_recording()
            }
            InterruptionSignal::InterruptionEnded => {}
        }
    }

    /// Device callback; see [`SampleRouter::on_frame`].
    pub fn on_frame(&self, sample: CapturedSample) {
        self.router.on_frame(sample);
    }

    pub fn set_filter(&self, filter: Arc<dyn FrameFilter>) {
        self.router.set_filter(filter);
    }

    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RecorderState> {
        self.state.clone()
    }

    /// Shared handle for capture threads.
    pub fn router(&self) -> Arc<SampleRouter> {
        Arc::clone(&self.router)
    }

    /// Cancel any recording and wait for the control task to exit.
    pub async fn shutdown(mut self) {
        self.abort_recording();
        self.send(ControlEvent::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Recorder control task failed");
            }
        }
    }

    fn send(&self, event: ControlEvent) {
        if self.control.send(event).is_err() {
            tracing::warn!("Recorder control task has stopped; request ignored");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.abort_recording();
            let _ = self.control.send(ControlEvent::Shutdown);
        }
    }
}

struct ActiveRecording {
    session: Arc<RecordingSession>,
    muxer: Box<dyn Muxer>,
}

enum Phase {
    Idle,
    Recording(ActiveRecording),
    Finishing {
        session: Arc<RecordingSession>,
        cancelled: bool,
    },
}

struct ControlTask {
    config: RecorderConfig,
    muxers: Arc<dyn MuxerFactory>,
    compositor: Arc<dyn Compositor>,
    router: Arc<SampleRouter>,
    listener: ListenerHandle,
    events: mpsc::UnboundedSender<ControlEvent>,
    state: watch::Sender<RecorderState>,
    phase: Phase,
}

impl ControlTask {
    /// Handle events until shut down. A finalize in flight at shutdown is
    /// awaited so its terminal outcome is still delivered.
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
        let mut shutting_down = false;
        while let Some(event) = events.recv().await {
            match event {
                ControlEvent::Start if shutting_down => {}
                ControlEvent::Start => self.start().await,
                ControlEvent::Stop => self.stop(),
                ControlEvent::Abort { id } => self.abort(id).await,
                ControlEvent::SessionStarted { id, at } => self.session_started(id, at).await,
                ControlEvent::Finalized { id, result } => self.finalized(id, result).await,
                ControlEvent::Shutdown => shutting_down = true,
            }
            if shutting_down {
                match self.phase {
                    Phase::Recording(_) => self.abort(None).await,
                    Phase::Finishing { .. } => {
                        tracing::debug!("Shutdown waiting for finalize");
                        continue;
                    }
                    Phase::Idle => {}
                }
                break;
            }
        }
        tracing::debug!("Recorder control task exited");
    }

    fn publish(&self, state: RecorderState) {
        tracing::debug!(%state, "Recorder state");
        self.state.send_replace(state);
    }

    async fn start(&mut self) {
        if !matches!(self.phase, Phase::Idle) {
            tracing::warn!(state = %*self.state.borrow(), "Start ignored; recorder is not idle");
            return;
        }

        let temp_path = self.config.temp_path.clone();
        match tokio::fs::remove_file(&temp_path).await {
            Ok(()) => tracing::debug!(path = %temp_path.display(), "Removed stale temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove stale temp file")
            }
        }

        let mut muxer = match self.muxers.open(&temp_path) {
            Ok(muxer) => muxer,
            Err(e) => {
                self.listener.failure(RecorderError::CouldNotCreateWriter {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let built = self.build_session(muxer.as_mut());
        match built {
            Ok(session) => {
                let session = Arc::new(session);
                tracing::info!(
                    session = %session.id(),
                    audio = session.has_audio(),
                    path = %temp_path.display(),
                    "Recording started"
                );
                self.router.install(Arc::clone(&session));
                self.phase = Phase::Recording(ActiveRecording { session, muxer });
                self.publish(RecorderState::Recording);
                self.listener.with(|l| l.on_recording_started());
            }
            Err(error) => {
                cancel_muxer(muxer, temp_path).await;
                self.listener.failure(error);
            }
        }
    }

    /// Add tracks and open the container. Nothing is installed on failure.
    fn build_session(&self, muxer: &mut dyn Muxer) -> Result<RecordingSession, RecorderError> {
        let Some((dims, pixel_format)) = self.router.observed_video() else {
            tracing::warn!("No video frame observed yet; cannot size the video track");
            return Err(RecorderError::CouldNotAddVideoTrack);
        };
        let video_settings = VideoTrackSettings {
            width: dims.width,
            height: dims.height,
            pixel_format,
            codec: self.config.video_codec.clone(),
        };
        let video = muxer.add_video_track(&video_settings).map_err(|e| {
            tracing::warn!(error = %e, "Failed to add video track");
            RecorderError::CouldNotAddVideoTrack
        })?;

        let audio = match self.router.observed_audio_format() {
            None => {
                tracing::info!("No audio format observed; recording video only");
                None
            }
            Some(format) => {
                let settings = AudioTrackSettings::from_format(&format, self.config.audio_bitrate)?;
                if !muxer.can_apply_audio_settings(&settings) {
                    tracing::warn!(?settings, "Muxer rejected audio settings");
                    return Err(RecorderError::CouldNotApplyAudioSettings);
                }
                let writer = muxer.add_audio_track(&settings).map_err(|e| {
                    tracing::warn!(error = %e, "Failed to add audio track");
                    RecorderError::CouldNotAddAudioTrack
                })?;
                Some(writer)
            }
        };

        muxer.start_writing().map_err(|e| RecorderError::CouldNotCreateWriter {
            reason: e.to_string(),
        })?;
        Ok(RecordingSession::new(video_settings, video, audio))
    }

    fn stop(&mut self) {
        let active = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(active) => active,
            other => {
                self.phase = other;
                tracing::debug!("Stop ignored; not recording");
                return;
            }
        };
        self.router.take_session();

        let ActiveRecording { session, mut muxer } = active;
        let end = session.last_video_pts().unwrap_or(MediaTime::ZERO);
        tracing::info!(
            session = %session.id(),
            %end,
            video = session.video_appended(),
            audio = session.audio_appended(),
            "Recording stopped; finalizing"
        );

        self.phase = Phase::Finishing {
            session: Arc::clone(&session),
            cancelled: false,
        };
        self.publish(RecorderState::Finishing);
        self.listener.with(|l| l.on_will_finalize());

        muxer.end_session(end);
        let id = session.id();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || muxer.finish())
                .await
                .unwrap_or_else(|e| Err(FramecapError::mux(format!("Finalize task failed: {e}"))));
            let _ = events.send(ControlEvent::Finalized { id, result });
        });
    }

    async fn abort(&mut self, id: Option<Uuid>) {
        let targets = |session: &RecordingSession| id.map_or(true, |id| id == session.id());

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(active) if targets(&active.session) => {
                self.router.take_session();
                active.session.mark_failed();
                tracing::info!(session = %active.session.id(), "Aborting recording");
                self.publish(RecorderState::Aborting);

                cancel_muxer(active.muxer, self.config.temp_path.clone()).await;

                self.publish(RecorderState::Idle);
                self.listener.with(|l| l.on_recording_aborted());
            }
            Phase::Finishing { session, .. } if targets(&session) => {
                tracing::info!(session = %session.id(), "Cancelling recording while finalizing");
                self.phase = Phase::Finishing {
                    session,
                    cancelled: true,
                };
                self.publish(RecorderState::Aborting);
            }
            other => {
                self.phase = other;
                tracing::debug!("Abort ignored; no matching recording");
            }
        }
    }

    async fn session_started(&mut self, id: Uuid, at: MediaTime) {
        let Phase::Recording(active) = &mut self.phase else {
            tracing::debug!(session = %id, "Session start arrived after recording ended");
            return;
        };
        if active.session.id() != id {
            return;
        }
        if let Err(e) = active.muxer.start_session(at) {
            tracing::error!(session = %id, error = %e, "Failed to open write session");
            self.listener.failure(RecorderError::CouldNotWriteVideoData);
            self.abort(Some(id)).await;
        }
    }

    async fn finalized(&mut self, id: Uuid, result: FramecapResult<PathBuf>) {
        let (session, cancelled) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Finishing { session, cancelled } if session.id() == id => (session, cancelled),
            other => {
                self.phase = other;
                tracing::warn!(session = %id, "Unexpected finalize result ignored");
                return;
            }
        };

        if cancelled {
            remove_temp_file(self.config.temp_path.clone()).await;
            self.publish(RecorderState::Idle);
            self.listener.with(|l| l.on_recording_aborted());
            return;
        }

        match result {
            Ok(path) => {
                tracing::info!(session = %id, path = %path.display(), "Recording finalized");
                self.compose(path);
            }
            Err(e) => {
                tracing::error!(session = %id, error = %e, "Failed to finalize recording");
                self.listener
                    .failure(RecorderError::CouldNotCompleteWritingVideo);
            }
        }
        log_drift(&session);
        self.publish(RecorderState::Idle);
        self.listener.with(|l| l.on_recording_finished());
    }

    /// Run the composition off the control task.
    fn compose(&self, source: PathBuf) {
        let job = CompositionJob::new(source, self.config.unique_output_path());
        let compositor = Arc::clone(&self.compositor);
        let listener = self.listener.clone();
        tokio::spawn(async move {
            tracing::info!(
                compositor = compositor.name(),
                destination = %job.destination.display(),
                "Composition started"
            );
            match compositor.compose(job).await {
                Ok(path) => {
                    tracing::info!(path = %path.display(), "Composition finished");
                    listener.with(|l| l.on_finalized(path));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Composition failed");
                    listener.failure(RecorderError::CompositionFailed);
                }
            }
        });
    }
}

async fn cancel_muxer(muxer: Box<dyn Muxer>, temp_path: PathBuf) {
    let res = tokio::task::spawn_blocking(move || {
        muxer.cancel();
        temp_path
    })
    .await;
    match res {
        Ok(temp_path) => remove_temp_file(temp_path).await,
        Err(e) => tracing::warn!(error = %e, "Muxer cancel task failed"),
    }
}

async fn remove_temp_file(path: PathBuf) {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

fn log_drift(session: &RecordingSession) {
    let Some(measurement) = session.drift() else {
        return;
    };
    let drift_ms = measurement.drift_ms();
    if measurement.exceeds_threshold_ms(DRIFT_THRESHOLD_MS) {
        tracing::warn!(session = %session.id(), drift_ms, "A/V drift exceeds 100ms");
    } else {
        tracing::info!(session = %session.id(), drift_ms, "A/V drift within threshold");
    }
}

/// Pixel format named by the recording defaults.
pub fn configured_pixel_format(defaults: &RecordingDefaults) -> FramecapResult<PixelFormat> {
    defaults.pixel_format.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_output_paths_differ_from_temp_path() {
        let config = RecorderConfig {
            temp_path: PathBuf::from("/tmp/recording.mov"),
            output_dir: PathBuf::from("/tmp"),
            container_extension: "mov".to_string(),
            video_codec: "h264".to_string(),
            audio_bitrate: 64_000,
            pool_capacity: 4,
        };
        let a = config.unique_output_path();
        let b = config.unique_output_path();
        assert_ne!(a, b);
        assert_ne!(a, config.temp_path);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mov"));
    }

    #[test]
    fn config_follows_recording_defaults() {
        let defaults = RecordingDefaults::default();
        let config = RecorderConfig::from_defaults(&defaults);
        assert_eq!(config.temp_path, defaults.temp_path());
        assert_eq!(config.audio_bitrate, 64_000);
        assert_eq!(configured_pixel_format(&defaults).unwrap(), PixelFormat::Bgra);
    }
}
