//! FrameCap Render Engine
//!
//! Post-processes finished recordings into deliverable files. A
//! composition job re-encodes the recorded video track at a fixed quality,
//! applies a geometry transform, and optionally merges a separately
//! recorded audio source.
//!
//! # Pipeline Architecture
//!
//! ```text
//! recording.mov ──┐
//!                 ├── Transform (rotate / mirror)
//!                 │         │
//!                 │         ├── Pad to reference duration
//! audio.m4a ──────┘         │
//! (optional)                ▼
//!                     Encode (H.264 + AAC)
//!                           │
//!                           ▼
//!                      <uuid>.mov
//! ```

pub mod compositor;
pub mod export;

pub use compositor::*;
pub use export::*;
