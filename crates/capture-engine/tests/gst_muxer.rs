//! End-to-end check of the GStreamer muxer. Skipped when the required
//! plugins are not installed.

use framecap_capture_engine::{
    missing_elements, AppendOutcome, AudioFormat, AudioTrackSettings, FrameBufferPool, GstMuxerFactory,
    MuxerFactory, PixelFormat, SampleFormat, TrackSample, VideoTrackSettings,
};
use framecap_common::clock::MediaTime;

fn gstreamer_ready() -> bool {
    framecap_common::logging::init_default_logging();
    match missing_elements() {
        Ok(missing) if missing.is_empty() => true,
        Ok(missing) => {
            eprintln!("skipping: missing GStreamer elements {missing:?}");
            false
        }
        Err(e) => {
            eprintln!("skipping: {e}");
            false
        }
    }
}

#[test]
fn finish_writes_a_two_track_container() {
    if !gstreamer_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.mov");
    let mut muxer = GstMuxerFactory::new(8 * 1024 * 1024).open(&path).unwrap();

    let video = muxer
        .add_video_track(&VideoTrackSettings {
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Bgra,
            codec: "h264".to_string(),
        })
        .unwrap();
    let format = AudioFormat::new(2, 48_000, SampleFormat::S16Le);
    let settings = AudioTrackSettings::from_format(&format, 64_000).unwrap();
    assert!(muxer.can_apply_audio_settings(&settings));
    let audio = muxer.add_audio_track(&settings).unwrap();
    muxer.start_writing().unwrap();
    muxer.start_session(MediaTime::ZERO).unwrap();

    let pool = FrameBufferPool::new(4);
    for i in 0..10i64 {
        let pts = MediaTime::from_nanos(i * 33_333_333);
        let mut buffer = pool.acquire(64, 48, PixelFormat::Bgra).unwrap();
        buffer.fill((i * 20) as u8);
        assert!(video.is_ready());
        video
            .append(TrackSample::Video {
                buffer: buffer.freeze(),
                pts,
            })
            .unwrap();
        assert!(audio.is_ready());
        audio
            .append(TrackSample::Audio {
                data: vec![0u8; 1600 * 4].into(),
                pts,
                duration: Some(MediaTime::from_nanos(33_333_333)),
            })
            .unwrap();
    }

    muxer.end_session(MediaTime::from_nanos(9 * 33_333_333));
    let mut late = pool.acquire(64, 48, PixelFormat::Bgra).unwrap();
    late.fill(0);
    let outcome = video
        .append(TrackSample::Video {
            buffer: late.freeze(),
            pts: MediaTime::from_nanos(10 * 33_333_333),
        })
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Dropped);
    let written = muxer.finish().unwrap();
    assert_eq!(written, path);
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
}

#[test]
fn cancel_removes_partial_output() {
    if !gstreamer_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.mov");
    let mut muxer = GstMuxerFactory::new(1024 * 1024).open(&path).unwrap();
    muxer
        .add_video_track(&VideoTrackSettings {
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Bgra,
            codec: "h264".to_string(),
        })
        .unwrap();
    muxer.start_writing().unwrap();
    muxer.cancel();
    assert!(!path.exists());
}

#[test]
fn unsupported_codec_is_rejected() {
    if !gstreamer_ready() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut muxer = GstMuxerFactory::new(1024)
        .open(&dir.path().join("recording.mov"))
        .unwrap();
    let err = muxer
        .add_video_track(&VideoTrackSettings {
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Bgra,
            codec: "vp9".to_string(),
        })
        .err()
        .unwrap();
    assert!(err.to_string().contains("vp9"));
}
