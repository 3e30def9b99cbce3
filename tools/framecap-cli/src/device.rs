//! Synthetic capture device: a test-pattern camera and a sine-wave
//! microphone, each pushing buffers from its own thread at device cadence.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use framecap_capture_engine::{
    AudioFormat, AudioFrame, CapturedSample, PixelFormat, SampleFormat, SampleRouter, VideoFrame,
};
use framecap_common::clock::RecordingClock;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;
const AUDIO_CHUNK_FRAMES: usize = 1024;
const TONE_HZ: f32 = 440.0;

#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio: bool,
    pub pixel_format: PixelFormat,
}

pub struct SyntheticDevice {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SyntheticDevice {
    pub fn start(router: Arc<SampleRouter>, config: DeviceConfig) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let clock = RecordingClock::start();
        tracing::info!(epoch = clock.epoch_wall(), ?config, "Synthetic device opened");

        let mut threads = Vec::new();
        {
            let (router, stop, clock) = (Arc::clone(&router), Arc::clone(&stop), clock.clone());
            threads.push(
                std::thread::Builder::new()
                    .name("video-device".into())
                    .spawn(move || video_loop(&router, &stop, &clock, config))?,
            );
        }
        if config.audio {
            let (router, stop) = (Arc::clone(&router), Arc::clone(&stop));
            threads.push(
                std::thread::Builder::new()
                    .name("audio-device".into())
                    .spawn(move || audio_loop(&router, &stop, &clock))?,
            );
        }

        Ok(Self { stop, threads })
    }

    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        for thread in self.threads {
            if thread.join().is_err() {
                tracing::warn!("Synthetic device thread panicked");
            }
        }
    }
}

fn video_loop(router: &SampleRouter, stop: &AtomicBool, clock: &RecordingClock, config: DeviceConfig) {
    let interval = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
    let mut next = Instant::now();
    let mut index = 0u64;

    while !stop.load(Ordering::SeqCst) {
        let data = test_pattern(config.width, config.height, config.pixel_format, index);
        match VideoFrame::new(data, clock.now(), config.width, config.height, config.pixel_format) {
            Ok(frame) => router.on_frame(CapturedSample::Video(frame)),
            Err(e) => {
                tracing::error!(error = %e, "Synthetic video frame rejected");
                return;
            }
        }
        index += 1;
        next += interval;
        std::thread::sleep(next.saturating_duration_since(Instant::now()));
    }
}

fn audio_loop(router: &SampleRouter, stop: &AtomicBool, clock: &RecordingClock) {
    let format = AudioFormat::new(CHANNELS, SAMPLE_RATE, SampleFormat::S16Le);
    let interval = Duration::from_secs_f64(AUDIO_CHUNK_FRAMES as f64 / SAMPLE_RATE as f64);
    let step = TAU * TONE_HZ / SAMPLE_RATE as f32;
    let mut phase = 0.0f32;
    let mut next = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let mut data = Vec::with_capacity(AUDIO_CHUNK_FRAMES * format.bytes_per_frame());
        for _ in 0..AUDIO_CHUNK_FRAMES {
            let sample = (phase.sin() * 0.2 * i16::MAX as f32) as i16;
            for _ in 0..CHANNELS {
                data.extend_from_slice(&sample.to_le_bytes());
            }
            phase = (phase + step) % TAU;
        }
        router.on_frame(CapturedSample::Audio(AudioFrame::new(
            data,
            clock.now(),
            Some(format),
        )));
        next += interval;
        std::thread::sleep(next.saturating_duration_since(Instant::now()));
    }
}

/// Gradient background with a bar sweeping left to right.
fn test_pattern(width: u32, height: u32, format: PixelFormat, index: u64) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let bar_width = (width / 16).max(1);
    let bar_x = ((index * 8) % width as u64) as u32;
    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);

    for y in 0..height {
        for x in 0..width {
            let on_bar = x >= bar_x && x < bar_x + bar_width;
            let r = if on_bar { 255 } else { (x * 255 / width.max(1)) as u8 };
            let g = if on_bar { 255 } else { (y * 255 / height.max(1)) as u8 };
            let b = if on_bar { 255 } else { 96 };
            match format {
                PixelFormat::Bgra => data.extend_from_slice(&[b, g, r, 255]),
                PixelFormat::Rgba => data.extend_from_slice(&[r, g, b, 255]),
                PixelFormat::Gray8 => data.push(((r as u16 + g as u16 + b as u16) / 3) as u8),
            }
        }
    }
    data
}

/// Frame filter inverting every colour channel, leaving alpha intact.
pub fn invert_colors(frame: VideoFrame) -> VideoFrame {
    let format = frame.format();
    let bpp = format.bytes_per_pixel();
    let mut data = Vec::with_capacity(frame.width() as usize * frame.height() as usize * bpp);

    for y in 0..frame.height() {
        for px in frame.row(y).chunks_exact(bpp) {
            match format {
                PixelFormat::Bgra | PixelFormat::Rgba => {
                    data.extend_from_slice(&[255 - px[0], 255 - px[1], 255 - px[2], px[3]])
                }
                PixelFormat::Gray8 => data.push(255 - px[0]),
            }
        }
    }

    VideoFrame::new(data, frame.pts(), frame.width(), frame.height(), format).unwrap_or(frame)
}
