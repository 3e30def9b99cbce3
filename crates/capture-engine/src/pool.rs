//! Reusable render targets for filtered video frames.
//!
//! The pool hands out at most `capacity` buffers for one
//! `(width, height, format)` key. A buffer is checked out from
//! [`FrameBufferPool::acquire`] until its last reference drops; only then
//! does it return to the free set. Consumers never release buffers
//! explicitly, so a buffer queued inside a track writer stays checked out
//! until the writer has flushed it.
//!
//! ```text
//!  acquire() ──► PixelBufferMut ──render──► freeze() ──► PooledBuffer ──clone──► muxer
//!      ▲                                                      │
//!      └──────────────── last reference dropped ──────────────┘
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::{PixelFormat, VideoFrame};

/// Identity of the buffers a pool currently hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl BufferKey {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub checked_out: usize,
    pub free: usize,
    /// `acquire` calls that found the pool exhausted.
    pub exhausted: u64,
}

#[derive(Debug)]
struct PoolState {
    key: Option<BufferKey>,
    generation: u64,
    free: Vec<Vec<u8>>,
    checked_out: usize,
    exhausted: u64,
}

#[derive(Debug)]
struct PoolShared {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolShared {
    /// Return a buffer whose last reference dropped.
    fn reclaim(&self, data: Vec<u8>, generation: u64) {
        let mut state = self.state.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        // Buffers of a previous key are freed instead of recycled.
        if generation == state.generation && state.free.len() < self.capacity {
            state.free.push(data);
        }
    }
}

/// Bounded pool of pixel buffers, shared between the router and the
/// track writers holding rendered frames.
#[derive(Clone)]
pub struct FrameBufferPool {
    shared: Arc<PoolShared>,
}

impl FrameBufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                capacity: capacity.max(1),
                state: Mutex::new(PoolState {
                    key: None,
                    generation: 0,
                    free: Vec::new(),
                    checked_out: 0,
                    exhausted: 0,
                }),
            }),
        }
    }

    /// Check out a buffer for `width`x`height` pixels of `format`.
    ///
    /// Never blocks: returns `None` when every buffer is still referenced.
    /// A key different from the current one retires the free set;
    /// outstanding buffers of the old key are dropped when released.
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> Option<PixelBufferMut> {
        let key = BufferKey {
            width,
            height,
            format,
        };
        let mut state = self.shared.state.lock();

        if state.key != Some(key) {
            if state.key.is_some() {
                tracing::debug!(?key, "Frame pool resized");
            }
            state.key = Some(key);
            state.generation += 1;
            state.free.clear();
        }

        // Retired buffers still count against capacity until released.
        let data = match state.free.pop() {
            Some(data) => data,
            None if state.checked_out < self.shared.capacity => vec![0u8; key.byte_len()],
            None => {
                state.exhausted += 1;
                return None;
            }
        };
        state.checked_out += 1;

        Some(PixelBufferMut {
            slot: Slot {
                data,
                key,
                generation: state.generation,
                pool: Arc::clone(&self.shared),
            },
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            capacity: self.shared.capacity,
            checked_out: state.checked_out,
            free: state.free.len(),
            exhausted: state.exhausted,
        }
    }
}

impl fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Storage of one checked-out buffer. Dropping it is the release.
struct Slot {
    data: Vec<u8>,
    key: BufferKey,
    generation: u64,
    pool: Arc<PoolShared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.pool
            .reclaim(std::mem::take(&mut self.data), self.generation);
    }
}

/// A uniquely owned, writable pool buffer.
pub struct PixelBufferMut {
    slot: Slot,
}

impl PixelBufferMut {
    pub fn key(&self) -> BufferKey {
        self.slot.key
    }

    /// Make the buffer immutable and shareable.
    pub fn freeze(self) -> PooledBuffer {
        PooledBuffer {
            slot: Arc::new(self.slot),
        }
    }
}

impl Deref for PixelBufferMut {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.slot.data
    }
}

impl DerefMut for PixelBufferMut {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.slot.data
    }
}

/// A rendered, immutable pool buffer. Clones share the same storage; the
/// buffer returns to the pool when the last clone drops.
#[derive(Clone)]
pub struct PooledBuffer {
    slot: Arc<Slot>,
}

impl PooledBuffer {
    pub fn key(&self) -> BufferKey {
        self.slot.key
    }

    pub fn width(&self) -> u32 {
        self.slot.key.width
    }

    pub fn height(&self) -> u32 {
        self.slot.key.height
    }

    pub fn format(&self) -> PixelFormat {
        self.slot.key.format
    }

    /// Outstanding references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.slot.data
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.slot.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("key", &self.slot.key)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Why a frame could not be rendered into a pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("frame {frame:?} does not match buffer {target:?}")]
    Mismatch {
        frame: (u32, u32, PixelFormat),
        target: BufferKey,
    },
}

/// Copy `frame` into `target`, dropping any row padding.
pub fn render_into(frame: &VideoFrame, target: &mut PixelBufferMut) -> Result<(), RenderError> {
    let key = target.key();
    if frame.width() != key.width || frame.height() != key.height || frame.format() != key.format
    {
        return Err(RenderError::Mismatch {
            frame: (frame.width(), frame.height(), frame.format()),
            target: key,
        });
    }

    let stride = key.stride();
    if frame.stride() == stride {
        target.copy_from_slice(&frame.data()[..key.byte_len()]);
    } else {
        for (y, dst) in target.chunks_exact_mut(stride).enumerate() {
            dst.copy_from_slice(frame.row(y as u32));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecap_common::clock::MediaTime;
    use proptest::prelude::*;

    fn gray_frame(width: u32, height: u32, fill: u8) -> VideoFrame {
        VideoFrame::new(
            vec![fill; (width * height) as usize],
            MediaTime::ZERO,
            width,
            height,
            PixelFormat::Gray8,
        )
        .unwrap()
    }

    #[test]
    fn exhausted_pool_returns_none_without_blocking() {
        let pool = FrameBufferPool::new(2);
        let a = pool.acquire(4, 4, PixelFormat::Bgra).unwrap();
        let b = pool.acquire(4, 4, PixelFormat::Bgra).unwrap();
        assert!(pool.acquire(4, 4, PixelFormat::Bgra).is_none());
        assert_eq!(pool.stats().exhausted, 1);
        drop(a);
        assert!(pool.acquire(4, 4, PixelFormat::Bgra).is_some());
        drop(b);
    }

    #[test]
    fn buffer_returns_only_after_last_clone_drops() {
        let pool = FrameBufferPool::new(1);
        let shared = pool.acquire(2, 2, PixelFormat::Gray8).unwrap().freeze();
        let held_by_writer = shared.clone();
        assert_eq!(shared.ref_count(), 2);

        drop(shared);
        assert!(pool.acquire(2, 2, PixelFormat::Gray8).is_none());

        drop(held_by_writer);
        let stats = pool.stats();
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.free, 1);
        assert!(pool.acquire(2, 2, PixelFormat::Gray8).is_some());
    }

    #[test]
    fn key_change_retires_old_buffers() {
        let pool = FrameBufferPool::new(2);
        let old = pool.acquire(2, 2, PixelFormat::Gray8).unwrap();
        drop(pool.acquire(2, 2, PixelFormat::Gray8).unwrap());
        assert_eq!(pool.stats().free, 1);

        let new = pool.acquire(4, 2, PixelFormat::Gray8).unwrap();
        assert_eq!(new.len(), 8);
        assert_eq!(pool.stats().free, 0);

        drop(old);
        let stats = pool.stats();
        assert_eq!(stats.checked_out, 1);
        assert_eq!(stats.free, 0, "buffer of the retired key is not recycled");
    }

    #[test]
    fn render_copies_padded_rows() {
        let data = vec![9, 8, 0xff, 7, 6, 0xff];
        let frame =
            VideoFrame::with_stride(data, MediaTime::ZERO, 2, 2, PixelFormat::Gray8, 3).unwrap();
        let pool = FrameBufferPool::new(1);
        let mut target = pool.acquire(2, 2, PixelFormat::Gray8).unwrap();
        render_into(&frame, &mut target).unwrap();
        assert_eq!(&target[..], &[9, 8, 7, 6]);
    }

    #[test]
    fn render_rejects_mismatched_dimensions() {
        let pool = FrameBufferPool::new(1);
        let mut target = pool.acquire(2, 2, PixelFormat::Gray8).unwrap();
        let err = render_into(&gray_frame(3, 2, 1), &mut target).unwrap_err();
        assert!(matches!(err, RenderError::Mismatch { .. }));
    }

    proptest! {
        #[test]
        fn checked_out_plus_free_never_exceeds_capacity(
            capacity in 1usize..6,
            ops in proptest::collection::vec((any::<bool>(), 0usize..8), 1..64),
        ) {
            let pool = FrameBufferPool::new(capacity);
            let mut held: Vec<PooledBuffer> = Vec::new();
            for (acquire, idx) in ops {
                if acquire {
                    if let Some(buf) = pool.acquire(8, 8, PixelFormat::Gray8) {
                        held.push(buf.freeze());
                    } else {
                        prop_assert_eq!(held.len(), capacity);
                    }
                } else if !held.is_empty() {
                    held.remove(idx % held.len());
                }
                let stats = pool.stats();
                prop_assert_eq!(stats.checked_out, held.len());
                prop_assert!(stats.checked_out + stats.free <= capacity);
            }
        }
    }
}
