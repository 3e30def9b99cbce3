//! Compose a finished recording into a deliverable file.

use std::path::PathBuf;

use framecap_capture_engine::RecorderConfig;
use framecap_common::config::AppConfig;
use framecap_render_engine::{
    probe_video_dimensions, CompositionJob, CompositionSettings, Compositor, FfmpegCompositor,
    Rotation,
};

pub async fn run(
    config: AppConfig,
    video: PathBuf,
    audio: Option<PathBuf>,
    output: Option<PathBuf>,
    rotate: u32,
    mirror: bool,
) -> anyhow::Result<()> {
    let mut settings = CompositionSettings::from_defaults(&config.composition)?;
    if rotate != 0 {
        settings.transform.rotation = Rotation::from_degrees(rotate)?;
    }
    settings.transform.mirror |= mirror;

    let destination =
        output.unwrap_or_else(|| RecorderConfig::from_app_config(&config).unique_output_path());

    println!("Composing: {}", video.display());
    if let Some(audio) = &audio {
        println!("  Audio: {}", audio.display());
    }
    println!("  Output: {}", destination.display());
    println!("  Transform: {:?}", settings.transform);
    if let Some((width, height)) = probe_video_dimensions(&video).await {
        let (out_w, out_h) = settings.transform.render_size(width, height);
        println!("  Size: {width}x{height} -> {out_w}x{out_h}");
    }

    let mut job = CompositionJob::new(video, destination);
    if let Some(audio) = audio {
        job = job.with_audio(audio);
    }

    let compositor = FfmpegCompositor::new(settings);
    let path = compositor
        .compose(job)
        .await
        .map_err(|e| anyhow::anyhow!("Composition failed: {e}"))?;

    match probe_video_dimensions(&path).await {
        Some((width, height)) => {
            println!("Composed recording: {} ({width}x{height})", path.display())
        }
        None => println!("Composed recording: {}", path.display()),
    }
    Ok(())
}
