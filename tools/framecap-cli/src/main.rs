//! FrameCap CLI: record, compose, and check the media stack.
//!
//! Usage:
//!   framecap record [OPTIONS]          Record from the synthetic test device
//!   framecap compose <VIDEO> [OPTIONS] Post-process a finished recording
//!   framecap check                     Check ffmpeg and GStreamer availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod device;

#[derive(Parser)]
#[command(
    name = "framecap",
    about = "Camera capture-to-mux recorder with post-processing",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from a synthetic camera and microphone
    Record {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Device frame rate
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Do not deliver microphone audio
        #[arg(long)]
        no_audio: bool,

        /// Invert colours with the frame filter
        #[arg(long)]
        invert: bool,

        /// Directory for composed recordings
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Compose a finished recording into a deliverable file
    Compose {
        /// Recorded video file
        video: PathBuf,

        /// Separate audio source to merge
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Clockwise rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value = "0")]
        rotate: u32,

        /// Mirror horizontally
        #[arg(long)]
        mirror: bool,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = framecap_common::config::AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config.logging.json |= cli.json_logs;
    framecap_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            duration,
            width,
            height,
            fps,
            no_audio,
            invert,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                config.recording.output_dir = dir;
            }
            let device = device::DeviceConfig {
                width,
                height,
                fps,
                audio: !no_audio,
                pixel_format: framecap_capture_engine::configured_pixel_format(
                    &config.recording,
                )?,
            };
            commands::record::run(config, device, duration, invert).await
        }
        Commands::Compose {
            video,
            audio,
            output,
            rotate,
            mirror,
        } => commands::compose::run(config, video, audio, output, rotate, mirror).await,
        Commands::Check => commands::check::run(&config),
    }
}
