//! Check system capabilities.

use framecap_capture_engine::{missing_elements, RecorderConfig};
use framecap_common::config::AppConfig;
use framecap_render_engine::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("FrameCap System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;

    match missing_elements() {
        Ok(missing) if missing.is_empty() => println!("[OK] GStreamer recording elements"),
        Ok(missing) => {
            ready = false;
            println!("[MISSING] GStreamer elements: {}", missing.join(", "));
        }
        Err(e) => {
            ready = false;
            println!("[MISSING] GStreamer: {e}");
        }
    }

    for binary in ["ffmpeg", "ffprobe"] {
        if command_exists(binary) {
            println!("[OK] {binary}");
        } else {
            ready = false;
            println!("[MISSING] {binary} (needed for composition)");
        }
    }

    let recorder = RecorderConfig::from_app_config(config);
    println!();
    println!("Temp file:  {}", recorder.temp_path().display());
    println!("Output dir: {}", recorder.output_dir.display());
    println!(
        "Video:      {} ({})",
        config.recording.video_codec, config.recording.pixel_format
    );
    println!("Audio:      {} bps", config.recording.audio_bitrate);

    println!();
    if ready {
        println!("All required components are available. FrameCap is ready.");
    } else {
        println!("Some required components are missing. See above.");
    }

    Ok(())
}
