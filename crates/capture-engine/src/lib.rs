//! FrameCap Capture Engine
//!
//! Routes live camera and microphone buffers through a filter hook into a
//! preview sink and, while recording, into a two-track container. The
//! finished container is handed to a compositor for post-processing.
//!
//! # Architecture
//!
//! ```text
//!  device threads                control task               background
//! ┌──────────────┐   events   ┌─────────────────┐
//! │ SampleRouter │ ─────────► │    Recorder     │ ── finish ──► Compositor
//! │  filter      │            │  state machine  │               (per job)
//! │  pool render │ ◄───────── │  Box<dyn Muxer> │
//! └──────┬───────┘  session   └─────────────────┘
//!        │ append
//!        ▼
//!  TrackWriter (video, audio?)
//! ```

pub mod filter;
pub mod frame;
pub mod listener;
pub mod muxer;
pub mod pipeline;
pub mod pool;
pub mod recorder;
pub mod router;
pub mod session;

pub use filter::{FrameFilter, IdentityFilter};
pub use frame::*;
pub use listener::{PreviewFrame, RecorderListener};
pub use muxer::*;
pub use pipeline::{missing_elements, GstMuxer, GstMuxerFactory};
pub use pool::{FrameBufferPool, PixelBufferMut, PoolStats, PooledBuffer};
pub use recorder::{
    configured_pixel_format, InterruptionSignal, Recorder, RecorderConfig, RecorderState,
};
pub use router::{RouterStats, SampleRouter};
pub use session::RecordingSession;
