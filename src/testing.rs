// SPDX-License-Identifier: MPL-2.0

//! Scripted decode sources and recording surfaces for unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    frame::{BYTES_PER_PIXEL, DecodedFrame},
    presenter::{Staging, Surface, SurfaceError},
    source::{DecodeSource, OutputSize, Pull, SourceError},
    target::{TargetGeometry, TargetId},
};

pub(crate) fn target(id: u32, width: u32, height: u32) -> TargetGeometry {
    TargetGeometry {
        id: TargetId(id),
        name: format!("TEST-{id}"),
        width,
        height,
        x_offset: 0,
        y_offset: 0,
        primary: id == 0,
    }
}

/// BGRx pixels where pixel (x, y) is `[x, y, 0, 0]`.
pub(crate) fn xy_pattern(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * BYTES_PER_PIXEL);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[x as u8, y as u8, 0, 0]);
        }
    }
    pixels
}

/// Counters shared between a [`MockSource`] and the test observing it.
#[derive(Debug, Default)]
pub(crate) struct SourceStats {
    pub pulls: AtomicUsize,
    pub frames: AtomicUsize,
    pub rewinds: AtomicUsize,
    /// Threads currently inside `pull_frame`.
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub closed: AtomicBool,
    pub configured: Mutex<Vec<OutputSize>>,
}

impl SourceStats {
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Decode source that produces solid frames from a script.
pub(crate) struct MockSource {
    native: (u32, u32),
    delivered: (u32, u32),
    interval: Duration,
    /// Frames per pass through the stream; `None` never ends.
    length: Option<usize>,
    /// Pull at which decoding fails.
    fail_at: Option<usize>,
    position: usize,
    pixels: Vec<u8>,
    stats: Arc<SourceStats>,
}

impl MockSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            native: (width, height),
            delivered: (width, height),
            interval: Duration::from_millis(1),
            length: None,
            fail_at: None,
            position: 0,
            pixels: Vec::new(),
            stats: Arc::default(),
        }
    }

    pub fn frames(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn fail_at(mut self, pull: usize) -> Self {
        self.fail_at = Some(pull);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn stats(&self) -> Arc<SourceStats> {
        Arc::clone(&self.stats)
    }

    pub fn boxed(self) -> Box<dyn DecodeSource> {
        Box::new(self)
    }
}

impl DecodeSource for MockSource {
    fn native_resolution(&self) -> (u32, u32) {
        self.native
    }

    fn frame_interval(&self) -> Duration {
        self.interval
    }

    fn configure_output(&mut self, size: OutputSize) -> Result<(), SourceError> {
        self.stats.configured.lock().push(size);
        self.delivered = match size {
            OutputSize::Native => self.native,
            OutputSize::Scaled { width, height } => (width, height),
        };
        Ok(())
    }

    fn pull_frame(&mut self, looping: bool) -> Result<Pull<'_>, SourceError> {
        let pull = self.stats.pulls.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(200));
        self.stats.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_at == Some(pull) {
            return Err(SourceError::Decode("scripted failure".into()));
        }

        if self.length.is_some_and(|length| self.position >= length) {
            if !looping {
                return Ok(Pull::EndOfStream);
            }
            self.position = 0;
            self.stats.rewinds.fetch_add(1, Ordering::SeqCst);
            return Ok(Pull::Rewound);
        }

        let (width, height) = self.delivered;
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        self.pixels.clear();
        self.pixels.resize(len, self.position as u8);
        self.position += 1;
        self.stats.frames.fetch_add(1, Ordering::SeqCst);

        Ok(Pull::Frame(DecodedFrame {
            pixels: &self.pixels,
            stride: width as usize * BYTES_PER_PIXEL,
            width,
            height,
        }))
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::SeqCst);
    }
}

/// One recorded blit, with the staged region compacted row by row.
#[derive(Debug, Clone)]
pub(crate) struct Blit {
    pub target: TargetId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Blit {
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let at = (y * self.width + x) as usize * BYTES_PER_PIXEL;
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&self.pixels[at..at + BYTES_PER_PIXEL]);
        pixel
    }
}

/// Surface that remembers every blit.
#[derive(Clone, Default)]
pub(crate) struct RecordingSurface {
    blits: Arc<Mutex<Vec<Blit>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSurface {
    pub fn blits(&self) -> Vec<Blit> {
        self.blits.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.blits.lock().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Surface for RecordingSurface {
    fn blit(&mut self, target: &TargetGeometry, staging: &Staging<'_>) -> Result<(), SurfaceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SurfaceError::Closed);
        }

        let row_len = staging.width as usize * BYTES_PER_PIXEL;
        let mut pixels = Vec::with_capacity(row_len * staging.height as usize);
        for row in staging.pixels.chunks(staging.stride).take(staging.height as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }

        self.blits.lock().push(Blit {
            target: target.id,
            width: staging.width,
            height: staging.height,
            pixels,
        });
        Ok(())
    }
}
