//! ffmpeg-backed compositor.
//!
//! Probes the finished recording with `ffprobe`, builds one ffmpeg
//! invocation per job, and reports success only when ffmpeg exits cleanly
//! and the destination file exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use framecap_common::error::{FramecapError, FramecapResult};
use tokio::process::Command;

use crate::compositor::{reference_duration, CompositionJob, CompositionSettings, Compositor};

/// Compositor that shells out to `ffmpeg`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCompositor {
    settings: CompositionSettings,
}

/// What the probe learned about a job's inputs.
#[derive(Debug, Clone, PartialEq)]
struct CompositionInputs {
    video_duration_secs: f64,
    audio_duration_secs: Option<f64>,
    source_has_audio: bool,
}

impl FfmpegCompositor {
    pub fn new(settings: CompositionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompositionSettings {
        &self.settings
    }

    async fn load_inputs(&self, job: &CompositionJob) -> FramecapResult<CompositionInputs> {
        if !job.source.exists() {
            return Err(FramecapError::FileNotFound {
                path: job.source.clone(),
            });
        }

        let video_duration_secs = probe_stream_duration(&job.source, "v:0")
            .await
            .ok_or_else(|| {
                FramecapError::render(format!(
                    "No video track found in {}",
                    job.source.display()
                ))
            })?;

        let audio_duration_secs = match &job.audio {
            Some(audio) => {
                if !audio.exists() {
                    return Err(FramecapError::FileNotFound {
                        path: audio.clone(),
                    });
                }
                let duration = probe_stream_duration(audio, "a:0").await.ok_or_else(|| {
                    FramecapError::render(format!("No audio track found in {}", audio.display()))
                })?;
                Some(duration)
            }
            None => None,
        };

        let source_has_audio = probe_stream_duration(&job.source, "a:0").await.is_some();

        Ok(CompositionInputs {
            video_duration_secs,
            audio_duration_secs,
            source_has_audio,
        })
    }

    async fn run_ffmpeg(&self, args: &[String]) -> FramecapResult<()> {
        tracing::debug!(?args, "Running ffmpeg");
        let started = std::time::Instant::now();
        let output = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FramecapError::render(format!("Failed to start ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(FramecapError::render(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "ffmpeg finished");
        Ok(())
    }
}

#[async_trait]
impl Compositor for FfmpegCompositor {
    async fn compose(&self, job: CompositionJob) -> FramecapResult<PathBuf> {
        tracing::info!(
            source = %job.source.display(),
            destination = %job.destination.display(),
            audio = ?job.audio,
            "Starting composition"
        );

        if let Some(parent) = job.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let inputs = self.load_inputs(&job).await?;
        let args = build_ffmpeg_args(&job, &self.settings, &inputs);

        if let Err(e) = self.run_ffmpeg(&args).await {
            // A failed export leaves no output behind.
            let _ = tokio::fs::remove_file(&job.destination).await;
            return Err(e);
        }

        if !job.destination.exists() {
            return Err(FramecapError::render(format!(
                "ffmpeg completed without producing {}",
                job.destination.display()
            )));
        }

        tracing::info!(
            destination = %job.destination.display(),
            duration_secs = reference_duration(inputs.video_duration_secs, inputs.audio_duration_secs),
            "Composition complete"
        );
        Ok(job.destination)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

fn build_ffmpeg_args(
    job: &CompositionJob,
    settings: &CompositionSettings,
    inputs: &CompositionInputs,
) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        job.source.display().to_string(),
    ];

    // Even dimensions are required by yuv420p.
    let mut video_chain: Vec<String> = settings
        .transform
        .filters()
        .into_iter()
        .map(str::to_string)
        .collect();
    video_chain.push("scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string());

    match (&job.audio, inputs.audio_duration_secs) {
        (Some(audio), Some(audio_secs)) => {
            args.push("-i".to_string());
            args.push(audio.display().to_string());

            let duration = reference_duration(inputs.video_duration_secs, Some(audio_secs));
            let video_shortfall = duration - inputs.video_duration_secs;
            if video_shortfall > 1e-3 {
                video_chain.push(format!(
                    "tpad=stop_mode=clone:stop_duration={video_shortfall:.6}"
                ));
            }
            video_chain.push("format=yuv420p".to_string());

            args.push("-filter_complex".to_string());
            args.push(format!(
                "[0:v:0]{}[vout];[1:a:0]apad[aout]",
                video_chain.join(",")
            ));
            args.push("-map".to_string());
            args.push("[vout]".to_string());
            args.push("-map".to_string());
            args.push("[aout]".to_string());
            args.push("-t".to_string());
            args.push(format!("{duration:.6}"));
        }
        _ => {
            video_chain.push("format=yuv420p".to_string());
            args.push("-vf".to_string());
            args.push(video_chain.join(","));
            args.push("-map".to_string());
            args.push("0:v:0".to_string());
            if inputs.source_has_audio {
                args.push("-map".to_string());
                args.push("0:a:0".to_string());
            }
        }
    }

    args.append(&mut codec_args(settings));
    args.push(job.destination.display().to_string());
    args
}

fn codec_args(settings: &CompositionSettings) -> Vec<String> {
    vec![
        "-r".to_string(),
        settings.frame_rate.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-crf".to_string(),
        settings.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", settings.audio_bitrate_kbps),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]
}

/// Whether a binary is reachable through `PATH`.
pub fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Duration in seconds of the stream selected by `selector` (e.g. `v:0`).
///
/// Falls back to the container duration when the stream carries none.
/// Returns `None` when the stream does not exist or ffprobe is missing.
pub async fn probe_stream_duration(path: &Path, selector: &str) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            selector,
            "-show_entries",
            "stream=index,duration:format=duration",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Width and height of the first video stream.
pub async fn probe_video_dimensions(path: &Path) -> Option<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8(output.stdout).ok()?;
    let line = raw.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Parse `key=value` ffprobe output into a duration.
///
/// No `index=` line means the selected stream is absent. A stream
/// duration wins over the container duration.
fn parse_probe_duration(raw: &str) -> Option<f64> {
    let mut has_stream = false;
    let mut stream_duration = None;
    let mut format_duration = None;

    for line in raw.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let parsed = value.parse::<f64>().ok().filter(|d| d.is_finite() && *d > 0.0);
        match key {
            "index" => has_stream = true,
            "duration" if stream_duration.is_none() && has_stream => stream_duration = parsed,
            "duration" => format_duration = format_duration.or(parsed),
            _ => {}
        }
    }

    if !has_stream {
        return None;
    }
    stream_duration.or(format_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{GeometryTransform, Rotation};

    fn inputs(video: f64, audio: Option<f64>, source_has_audio: bool) -> CompositionInputs {
        CompositionInputs {
            video_duration_secs: video,
            audio_duration_secs: audio,
            source_has_audio,
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|idx| args.get(idx + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_video_only_job_reencodes_and_keeps_source_audio() {
        let job = CompositionJob::new("/tmp/recording.mov", "/tmp/out.mov");
        let args = build_ffmpeg_args(&job, &CompositionSettings::default(), &inputs(3.0, None, true));

        assert_eq!(
            arg_after(&args, "-vf"),
            Some("scale=trunc(iw/2)*2:trunc(ih/2)*2,format=yuv420p")
        );
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:a:0"));
        assert_eq!(arg_after(&args, "-preset"), Some("medium"));
        assert_eq!(arg_after(&args, "-r"), Some("30"));
        assert!(!args.iter().any(|a| a == "-t"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mov"));
    }

    #[test]
    fn test_video_only_job_without_source_audio_maps_video_alone() {
        let job = CompositionJob::new("/tmp/recording.mov", "/tmp/out.mov");
        let args = build_ffmpeg_args(&job, &CompositionSettings::default(), &inputs(3.0, None, false));
        let maps: Vec<_> = args
            .windows(2)
            .filter(|w| w[0] == "-map")
            .map(|w| w[1].clone())
            .collect();
        assert_eq!(maps, vec!["0:v:0".to_string()]);
    }

    #[test]
    fn test_dual_source_with_shorter_audio_keeps_video_length() {
        let job = CompositionJob::new("/tmp/v.mov", "/tmp/out.mov").with_audio("/tmp/a.m4a");
        let args = build_ffmpeg_args(
            &job,
            &CompositionSettings::default(),
            &inputs(5.0, Some(2.0), true),
        );

        assert_eq!(arg_after(&args, "-t"), Some("5.000000"));
        let graph = arg_after(&args, "-filter_complex").unwrap();
        assert!(!graph.contains("tpad"));
        assert!(graph.contains("[1:a:0]apad[aout]"));
    }

    #[test]
    fn test_dual_source_with_longer_audio_extends_video() {
        let job = CompositionJob::new("/tmp/v.mov", "/tmp/out.mov").with_audio("/tmp/a.m4a");
        let args = build_ffmpeg_args(
            &job,
            &CompositionSettings::default(),
            &inputs(2.0, Some(3.5), false),
        );

        assert_eq!(arg_after(&args, "-t"), Some("3.500000"));
        let graph = arg_after(&args, "-filter_complex").unwrap();
        assert!(graph.contains("tpad=stop_mode=clone:stop_duration=1.500000"));
    }

    #[test]
    fn test_transform_filters_precede_scaling() {
        let settings = CompositionSettings {
            transform: GeometryTransform {
                rotation: Rotation::Cw270,
                mirror: false,
            },
            ..CompositionSettings::default()
        };
        let job = CompositionJob::new("/tmp/v.mov", "/tmp/out.mov");
        let args = build_ffmpeg_args(&job, &settings, &inputs(1.0, None, false));
        assert!(arg_after(&args, "-vf")
            .unwrap()
            .starts_with("transpose=cclock,scale="));
    }

    #[test]
    fn test_parse_probe_prefers_stream_duration() {
        let raw = "index=0\nduration=3.200000\nduration=3.250000\n";
        assert_eq!(parse_probe_duration(raw), Some(3.2));
    }

    #[test]
    fn test_parse_probe_falls_back_to_container_duration() {
        let raw = "index=0\nduration=N/A\nduration=4.000000\n";
        assert_eq!(parse_probe_duration(raw), Some(4.0));
    }

    #[test]
    fn test_parse_probe_without_stream_is_none() {
        assert_eq!(parse_probe_duration("duration=4.000000\n"), None);
    }
}
