// SPDX-License-Identifier: MPL-2.0

//! Per-target frame mailbox between playback threads and the Wayland thread.
//!
//! ```text
//! ┌─────────────┐ ┌─────────────┐
//! │ playback #0 │ │ playback #1 │
//! └─────┬───────┘ └─────┬───────┘
//!       │ push() - replaces the target's pending frame
//!       ▼               ▼
//! ┌─────────────────────────────┐
//! │ Frame Queue (1 per target)  │
//! └─────┬───────────────────────┘
//!       │ take_all() - on event loop wake-up
//!       ▼
//! ┌─────────────┐
//! │ Renderer    │
//! └─────────────┘
//! ```
//!
//! Neither side ever waits on the other: a playback thread that outpaces the
//! compositor overwrites its own pending frame, and the renderer only ever
//! draws the newest frame of each target.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use crate::target::TargetId;

/// Spare pixel buffers kept around for reuse.
const MAX_SPARE_BUFFERS: usize = 4;

/// A frame scaled to its target's size, waiting to be drawn.
#[derive(Clone)]
pub struct PendingFrame {
    pub target: TargetId,
    /// Packed BGRx, `width * 4` bytes per row.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// When this frame was queued (for debugging/metrics).
    pub queued_at: Instant,
}

impl std::fmt::Debug for PendingFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFrame")
            .field("target", &self.target)
            .field("size", &(self.width, self.height))
            .field("bytes", &self.pixels.len())
            .finish_non_exhaustive()
    }
}

/// Statistics about frame queue operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Total frames pushed to the queue.
    pub frames_pushed: u64,
    /// Frames overwritten before the renderer took them.
    pub frames_replaced: u64,
    /// Frames handed to the renderer.
    pub frames_taken: u64,
}

/// Latest-frame-wins mailbox, one slot per target.
#[derive(Default)]
pub struct FrameQueue {
    slots: Mutex<BTreeMap<TargetId, PendingFrame>>,
    spare: Mutex<Vec<Vec<u8>>>,
    /// Set once the renderer is gone.
    closed: AtomicBool,
    stats_pushed: AtomicU64,
    stats_replaced: AtomicU64,
    stats_taken: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for its target, replacing any frame still pending there.
    ///
    /// Returns `false` if the queue is closed.
    pub fn push(&self, frame: PendingFrame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let replaced = lock(&self.slots).insert(frame.target, frame);
        self.stats_pushed.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = replaced {
            self.stats_replaced.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                target_id = %old.target,
                age_ms = old.queued_at.elapsed().as_millis(),
                "Frame replaced before it was drawn"
            );
            self.recycle(old.pixels);
        }

        true
    }

    /// Take every pending frame, in target order.
    pub fn take_all(&self) -> Vec<PendingFrame> {
        let frames: Vec<PendingFrame> = std::mem::take(&mut *lock(&self.slots))
            .into_values()
            .collect();
        self.stats_taken
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        frames
    }

    /// A zeroed buffer of `len` bytes, reusing a recycled one when possible.
    pub fn buffer(&self, len: usize) -> Vec<u8> {
        let mut buffer = lock(&self.spare).pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0);
        buffer
    }

    /// Return a drawn frame's pixels for reuse.
    pub fn recycle(&self, pixels: Vec<u8>) {
        let mut spare = lock(&self.spare);
        if spare.len() < MAX_SPARE_BUFFERS {
            spare.push(pixels);
        }
    }

    /// Reject all further frames and drop the pending ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.slots).clear();
        lock(&self.spare).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of targets with a pending frame.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get queue statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            frames_pushed: self.stats_pushed.load(Ordering::Relaxed),
            frames_replaced: self.stats_replaced.load(Ordering::Relaxed),
            frames_taken: self.stats_taken.load(Ordering::Relaxed),
        }
    }
}

/// Shared handle to a frame queue.
pub type SharedFrameQueue = Arc<FrameQueue>;
