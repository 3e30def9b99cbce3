//! Record from the synthetic device until a duration elapses or Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use framecap_capture_engine::{
    GstMuxerFactory, InterruptionSignal, MuxerFactory, PreviewFrame, Recorder, RecorderConfig,
    RecorderListener, RecorderState,
};
use framecap_common::config::AppConfig;
use framecap_common::error::RecorderError;
use framecap_render_engine::{CompositionSettings, Compositor, FfmpegCompositor};
use tokio::sync::mpsc;

use crate::device::{invert_colors, DeviceConfig, SyntheticDevice};

/// Time the device runs before recording starts, so the recorder has
/// observed the formats it needs to size its tracks.
const WARMUP: Duration = Duration::from_millis(300);

#[derive(Debug)]
enum Outcome {
    Started,
    Failed(RecorderError),
    Aborted,
    Finished,
    Finalized(PathBuf),
}

/// Forwards recorder events to the command's async context.
struct CliListener {
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl CliListener {
    fn emit(&self, outcome: Outcome) {
        let _ = self.outcomes.send(outcome);
    }
}

impl RecorderListener for CliListener {
    fn on_preview_frame(&self, frame: &PreviewFrame) {
        tracing::trace!(pts = %frame.pts, "Preview frame");
    }

    fn on_failure(&self, error: RecorderError) {
        self.emit(Outcome::Failed(error));
    }

    fn on_recording_started(&self) {
        self.emit(Outcome::Started);
    }

    fn on_recording_aborted(&self) {
        self.emit(Outcome::Aborted);
    }

    fn on_recording_finished(&self) {
        self.emit(Outcome::Finished);
    }

    fn on_finalized(&self, path: PathBuf) {
        self.emit(Outcome::Finalized(path));
    }
}

pub async fn run(
    config: AppConfig,
    device: DeviceConfig,
    duration: Option<f64>,
    invert: bool,
) -> anyhow::Result<()> {
    let recorder_config = RecorderConfig::from_app_config(&config);
    println!("Recording from synthetic device");
    println!("  Frames: {}x{} @ {} fps", device.width, device.height, device.fps);
    println!("  Audio: {}", device.audio);
    println!("  Temp file: {}", recorder_config.temp_path().display());
    println!("  Output dir: {}", recorder_config.output_dir.display());
    println!();

    let muxers: Arc<dyn MuxerFactory> = Arc::new(GstMuxerFactory::from_defaults(&config.recording));
    let compositor: Arc<dyn Compositor> = Arc::new(FfmpegCompositor::new(
        CompositionSettings::from_defaults(&config.composition)?,
    ));

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let listener: Arc<dyn RecorderListener> = Arc::new(CliListener { outcomes: tx });
    let recorder = Recorder::spawn(recorder_config, muxers, compositor, Arc::downgrade(&listener));
    if invert {
        recorder.set_filter(Arc::new(invert_colors));
    }

    let device = SyntheticDevice::start(recorder.router(), device)?;
    tokio::time::sleep(WARMUP).await;

    let result = record(&recorder, &mut outcomes, duration).await;

    device.stop();
    let stats = recorder.router().stats();
    tracing::info!(?stats, "Router statistics");
    recorder.shutdown().await;
    drop(listener);
    result
}

async fn record(
    recorder: &Recorder,
    outcomes: &mut mpsc::UnboundedReceiver<Outcome>,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    recorder.start_recording();
    match outcomes.recv().await {
        Some(Outcome::Started) => {}
        Some(Outcome::Failed(e)) => anyhow::bail!("Recording did not start: {e}"),
        other => anyhow::bail!("Recording did not start: {other:?}"),
    }

    match duration {
        Some(secs) => println!("Recording for {secs:.1}s (Ctrl+C aborts)..."),
        None => println!("Recording... press Ctrl+C to stop"),
    }

    let mut state = recorder.subscribe_state();
    let limit = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = limit => {
            recorder.stop_recording();
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!();
            if duration.is_some() {
                recorder.handle_interruption(InterruptionSignal::AppBackgrounded);
            } else {
                recorder.stop_recording();
            }
        }
        _ = state.wait_for(|s| *s == RecorderState::Idle) => {
            // Recording ended on its own; the outcome explains why.
        }
    }

    println!("Finalizing...");
    while let Some(outcome) = outcomes.recv().await {
        match outcome {
            Outcome::Finalized(path) => {
                println!("Recording saved to: {}", path.display());
                return Ok(());
            }
            Outcome::Aborted => anyhow::bail!("Recording was aborted"),
            Outcome::Failed(e) if ends_recording(&e) => anyhow::bail!("Recording failed: {e}"),
            Outcome::Failed(e) => eprintln!("warning: {e}"),
            Outcome::Finished => println!("Container written; composing..."),
            Outcome::Started => {}
        }
    }
    anyhow::bail!("Recorder stopped without a result")
}

/// Failures after which no further outcome follows.
fn ends_recording(error: &RecorderError) -> bool {
    matches!(
        error,
        RecorderError::CouldNotCompleteWritingVideo | RecorderError::CompositionFailed
    )
}
