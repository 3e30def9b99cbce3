//! GStreamer-backed muxer.
//!
//! Every track is an `appsrc`-fed encoder bin linked into one
//! `qtmux ! filesink` pipeline. Readiness is the appsrc queue staying under
//! its byte bound, so appends never block the capture threads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use framecap_common::clock::MediaTime;
use framecap_common::config::RecordingDefaults;
use framecap_common::error::{FramecapError, FramecapResult};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use crate::frame::SampleKind;
use crate::muxer::{
    AppendOutcome, AudioTrackSettings, Muxer, MuxerFactory, TrackSample, TrackWriter,
    VideoTrackSettings,
};

const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`GstMuxer`]s with a fixed per-track queue bound.
#[derive(Debug, Clone)]
pub struct GstMuxerFactory {
    queue_bytes: u64,
}

impl GstMuxerFactory {
    pub fn new(queue_bytes: u64) -> Self {
        Self {
            queue_bytes: queue_bytes.max(1),
        }
    }

    pub fn from_defaults(defaults: &RecordingDefaults) -> Self {
        Self::new(defaults.writer_queue_bytes)
    }
}

impl MuxerFactory for GstMuxerFactory {
    fn open(&self, path: &Path) -> FramecapResult<Box<dyn Muxer>> {
        Ok(Box::new(GstMuxer::open(path, self.queue_bytes)?))
    }
}

/// State shared by the muxer and its track writers.
struct PipelineShared {
    bus: Option<gst::Bus>,
    failed: AtomicBool,
    /// Session end in nanoseconds relative to session-zero.
    session_end: AtomicI64,
}

impl PipelineShared {
    /// Drain pending error messages; true once any has been seen.
    fn has_failed(&self) -> bool {
        if let Some(bus) = &self.bus {
            while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
                if let gst::MessageView::Error(e) = msg.view() {
                    tracing::error!(error = %e.error(), "Muxer pipeline error");
                }
                self.failed.store(true, Ordering::SeqCst);
            }
        }
        self.failed.load(Ordering::SeqCst)
    }
}

pub struct GstMuxer {
    path: PathBuf,
    pipeline: gst::Pipeline,
    mux: gst::Element,
    sources: Vec<gst_app::AppSrc>,
    shared: Arc<PipelineShared>,
    queue_bytes: u64,
    writing: bool,
}

impl GstMuxer {
    pub fn open(path: &Path, queue_bytes: u64) -> FramecapResult<Self> {
        init_gstreamer()?;

        let launch = format!(
            "qtmux name=mux ! filesink location=\"{}\"",
            escape_path(path)
        );
        let element = gst::parse::launch(&launch)
            .map_err(|e| FramecapError::mux(format!("Failed to build muxer pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| FramecapError::mux("Launch string did not produce a pipeline"))?;
        let mux = pipeline
            .by_name("mux")
            .ok_or_else(|| FramecapError::mux("Muxer element missing from pipeline"))?;

        tracing::debug!(path = %path.display(), "Opened muxer");

        Ok(Self {
            path: path.to_path_buf(),
            shared: Arc::new(PipelineShared {
                bus: pipeline.bus(),
                failed: AtomicBool::new(false),
                session_end: AtomicI64::new(i64::MAX),
            }),
            pipeline,
            mux,
            sources: Vec::new(),
            queue_bytes,
            writing: false,
        })
    }

    fn add_track(
        &mut self,
        kind: SampleKind,
        description: &str,
        caps: gst::Caps,
    ) -> FramecapResult<Arc<dyn TrackWriter>> {
        if self.writing {
            return Err(FramecapError::mux("Tracks must be added before writing starts"));
        }

        let bin = gst::parse::bin_from_description(description, true)
            .map_err(|e| FramecapError::mux(format!("Failed to build {kind:?} track: {e}")))?;
        let appsrc = bin
            .by_name(track_source_name(kind))
            .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            .ok_or_else(|| FramecapError::mux(format!("{kind:?} track has no appsrc")))?;

        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);
        appsrc.set_block(false);
        appsrc.set_max_bytes(self.queue_bytes);

        self.pipeline
            .add(&bin)
            .map_err(|e| FramecapError::mux(format!("Failed to add {kind:?} track: {e}")))?;
        bin.link(&self.mux)
            .map_err(|e| FramecapError::mux(format!("Failed to link {kind:?} track: {e}")))?;

        self.sources.push(appsrc.clone());
        Ok(Arc::new(GstTrackWriter {
            kind,
            appsrc,
            max_bytes: self.queue_bytes,
            shared: Arc::clone(&self.shared),
        }))
    }

    /// Wait for EOS or an error on the bus, bounded by `deadline`.
    fn drain(&self, deadline: Duration) -> FramecapResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        let start = std::time::Instant::now();
        loop {
            let timeout = {
                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    return Err(FramecapError::mux("Muxer did not drain within 10s"));
                }
                let remaining = deadline - elapsed;
                gst::ClockTime::from_nseconds(remaining.as_nanos() as u64)
            };
            match bus.timed_pop(timeout) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!(path = %self.path.display(), "EOS received; muxer drained");
                        return Ok(());
                    }
                    gst::MessageView::Error(e) => {
                        return Err(FramecapError::mux(format!(
                            "Muxer error during drain: {}",
                            e.error()
                        )));
                    }
                    _ => {}
                },
                None => return Err(FramecapError::mux("Muxer did not drain within 10s")),
            }
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(path = %self.path.display(), error = ?e, "Failed to stop muxer pipeline");
        }
    }
}

impl Muxer for GstMuxer {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn add_video_track(
        &mut self,
        settings: &VideoTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>> {
        if settings.codec != "h264" {
            return Err(FramecapError::unsupported(format!(
                "Video codec {} is not supported",
                settings.codec
            )));
        }
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", settings.pixel_format.gst_name())
            .field("width", settings.width as i32)
            .field("height", settings.height as i32)
            .field("framerate", gst::Fraction::new(0, 1))
            .build();
        self.add_track(SampleKind::Video, &video_bin_description(), caps)
    }

    fn can_apply_audio_settings(&self, settings: &AudioTrackSettings) -> bool {
        aac_accepts(settings)
    }

    fn add_audio_track(
        &mut self,
        settings: &AudioTrackSettings,
    ) -> FramecapResult<Arc<dyn TrackWriter>> {
        if !aac_accepts(settings) {
            return Err(FramecapError::unsupported(format!(
                "AAC cannot encode {} channels at {} Hz",
                settings.channels, settings.sample_rate
            )));
        }
        let caps = gst::Caps::builder("audio/x-raw")
            .field("format", settings.sample_format.gst_name())
            .field("layout", "interleaved")
            .field("rate", settings.sample_rate as i32)
            .field("channels", settings.channels as i32)
            .build();
        self.add_track(SampleKind::Audio, &audio_bin_description(settings.bitrate), caps)
    }

    fn start_writing(&mut self) -> FramecapResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            FramecapError::mux(format!("Failed to start muxer pipeline: {e:?}"))
        })?;
        self.writing = true;
        tracing::debug!(path = %self.path.display(), tracks = self.sources.len(), "Muxer writing");
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) -> FramecapResult<()> {
        if !self.writing {
            return Err(FramecapError::mux("Session started before writing"));
        }
        if self.shared.has_failed() {
            return Err(FramecapError::mux("Muxer pipeline failed before the session started"));
        }
        tracing::debug!(session_zero = %at, "Muxer session opened");
        Ok(())
    }

    fn end_session(&mut self, at: MediaTime) {
        self.shared.session_end.store(at.as_nanos(), Ordering::SeqCst);
        tracing::debug!(end = %at, "Muxer session closed");
    }

    fn finish(self: Box<Self>) -> FramecapResult<PathBuf> {
        if !self.writing {
            self.shutdown();
            return Err(FramecapError::mux("Muxer finished before writing started"));
        }

        for src in &self.sources {
            if let Err(e) = src.end_of_stream() {
                tracing::warn!(error = ?e, "Failed to send EOS; output may be truncated");
            }
        }
        let drained = self.drain(FINISH_TIMEOUT);
        self.shutdown();
        drained?;

        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(FramecapError::mux("Muxer pipeline reported an error"));
        }
        if !self.path.exists() {
            return Err(FramecapError::FileNotFound { path: self.path.clone() });
        }
        Ok(self.path.clone())
    }

    fn cancel(self: Box<Self>) {
        self.shutdown();
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial output")
            }
        }
    }
}

struct GstTrackWriter {
    kind: SampleKind,
    appsrc: gst_app::AppSrc,
    max_bytes: u64,
    shared: Arc<PipelineShared>,
}

impl TrackWriter for GstTrackWriter {
    fn kind(&self) -> SampleKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        !self.shared.has_failed() && self.appsrc.current_level_bytes() < self.max_bytes
    }

    fn append(&self, sample: TrackSample) -> FramecapResult<AppendOutcome> {
        if sample.kind() != self.kind {
            return Err(FramecapError::mux(format!(
                "{:?} sample appended to {:?} track",
                sample.kind(),
                self.kind
            )));
        }
        if !self.is_ready() {
            return Err(FramecapError::mux(format!("{:?} track is not ready", self.kind)));
        }
        if sample.pts().as_nanos() > self.shared.session_end.load(Ordering::SeqCst) {
            tracing::trace!(pts = %sample.pts(), "Dropping sample past session end");
            return Ok(AppendOutcome::Dropped);
        }

        let pts = gst::ClockTime::from_nseconds(sample.pts().to_unsigned_nanos());
        let mut buffer = match sample {
            TrackSample::Video { buffer, .. } => gst::Buffer::from_slice(buffer),
            TrackSample::Audio { data, duration, .. } => {
                let mut buffer = gst::Buffer::from_slice(data);
                if let Some(duration) = duration {
                    buffer
                        .make_mut()
                        .set_duration(gst::ClockTime::from_nseconds(duration.to_unsigned_nanos()));
                }
                buffer
            }
        };
        buffer.make_mut().set_pts(pts);

        self.appsrc.push_buffer(buffer).map_err(|e| {
            self.shared.failed.store(true, Ordering::SeqCst);
            FramecapError::mux(format!("Failed to push {:?} buffer: {e:?}", self.kind))
        })?;
        Ok(AppendOutcome::Written)
    }
}

fn track_source_name(kind: SampleKind) -> &'static str {
    match kind {
        SampleKind::Video => "video-src",
        SampleKind::Audio => "audio-src",
    }
}

fn video_bin_description() -> String {
    format!(
        "appsrc name={} ! queue ! videoconvert ! x264enc tune=zerolatency speed-preset=veryfast ! h264parse ! queue",
        track_source_name(SampleKind::Video)
    )
}

fn audio_bin_description(bitrate: u32) -> String {
    format!(
        "appsrc name={} ! audioconvert ! audioresample ! avenc_aac bitrate={bitrate} ! aacparse ! queue",
        track_source_name(SampleKind::Audio)
    )
}

/// AAC encoder limits.
fn aac_accepts(settings: &AudioTrackSettings) -> bool {
    (1..=8).contains(&settings.channels) && (8_000..=96_000).contains(&settings.sample_rate)
}

pub(crate) fn init_gstreamer() -> FramecapResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(FramecapError::mux(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Names of GStreamer elements the muxer needs that are not registered.
pub fn missing_elements() -> FramecapResult<Vec<&'static str>> {
    init_gstreamer()?;
    Ok(REQUIRED_ELEMENTS
        .iter()
        .copied()
        .filter(|name| gst::ElementFactory::find(name).is_none())
        .collect())
}

const REQUIRED_ELEMENTS: &[&str] = &[
    "appsrc",
    "videoconvert",
    "x264enc",
    "h264parse",
    "audioconvert",
    "audioresample",
    "avenc_aac",
    "aacparse",
    "qtmux",
    "filesink",
];

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}
