// SPDX-License-Identifier: MPL-2.0

//! Serialized presentation onto the surface shared by every session.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Mutex, MutexGuard};

use crate::{
    frame::{BYTES_PER_PIXEL, FrameRecord},
    target::{TargetGeometry, TargetId},
};

/// Pixels staged for one target, ready to be blitted.
///
/// The valid region is the top-left `width` x `height` pixels; the surface
/// stretches it to the target size when the two differ.
#[derive(Debug, Clone, Copy)]
pub struct Staging<'a> {
    pub pixels: &'a [u8],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("presentation surface is closed")]
    Closed,
    #[error("no drawing surface for target {0}")]
    UnknownTarget(TargetId),
    #[error("failed to scale frame: {0}")]
    Scale(String),
}

/// Drawing surface spanning every target.
pub trait Surface: Send {
    fn blit(&mut self, target: &TargetGeometry, staging: &Staging<'_>) -> Result<(), SurfaceError>;
}

/// Handle to the one surface all sessions draw on.
///
/// Access is exclusive and acquisition waits at most `timeout`.
#[derive(Clone)]
pub struct SharedSurface {
    inner: Arc<Mutex<Box<dyn Surface>>>,
    timeout: Duration,
}

impl fmt::Debug for SharedSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSurface")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SharedSurface {
    pub fn new(surface: impl Surface + 'static, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(surface))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits up to the configured timeout for exclusive access.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn Surface>>> {
        self.inner.try_lock_for(self.timeout)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresentError {
    #[error("frame has no pixels to present")]
    EmptyFrame,
    #[error(
        "crop region {width}x{height}+{x}+{y} does not fit the {frame_width}x{frame_height} \
         frame and {target_width}x{target_height} target"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("surface was busy for longer than {0:?}")]
    LockTimeout(Duration),
    #[error("frame buffer ends before scanline {row}")]
    Copy { row: u32 },
    #[error("blit failed")]
    Blit(#[source] SurfaceError),
}

/// Presents frames for a single target.
pub struct Presenter {
    surface: SharedSurface,
    target: TargetGeometry,
    /// Target-sized BGRx buffer the crop region is copied into.
    staging: Vec<u8>,
}

impl Presenter {
    pub fn new(surface: SharedSurface, target: TargetGeometry) -> Self {
        let staging = vec![0; target.width as usize * target.height as usize * BYTES_PER_PIXEL];
        Self {
            surface,
            target,
            staging,
        }
    }

    pub fn target(&self) -> &TargetGeometry {
        &self.target
    }

    /// Copies the crop region of `record` into staging and blits it onto the
    /// shared surface, holding the surface for the whole step.
    pub fn present(&mut self, record: &FrameRecord<'_>) -> Result<(), PresentError> {
        let g = record.geometry;
        let frame = &record.frame;

        if frame.pixels.is_empty() || g.crop_width == 0 || g.crop_height == 0 {
            return Err(PresentError::EmptyFrame);
        }

        if !record.in_bounds() || g.crop_width > self.target.width || g.crop_height > self.target.height
        {
            return Err(PresentError::OutOfBounds {
                x: g.x_offset,
                y: g.y_offset,
                width: g.crop_width,
                height: g.crop_height,
                frame_width: frame.width,
                frame_height: frame.height,
                target_width: self.target.width,
                target_height: self.target.height,
            });
        }

        let Some(mut surface) = self.surface.try_lock() else {
            return Err(PresentError::LockTimeout(self.surface.timeout()));
        };

        let stride = self.target.width as usize * BYTES_PER_PIXEL;
        let row_len = g.crop_width as usize * BYTES_PER_PIXEL;
        let x = g.x_offset as usize * BYTES_PER_PIXEL;

        for row in 0..g.crop_height {
            let start = (g.y_offset + row) as usize * frame.stride + x;
            let Some(src) = frame.pixels.get(start..start + row_len) else {
                return Err(PresentError::Copy { row });
            };
            let dst = row as usize * stride;
            self.staging[dst..dst + row_len].copy_from_slice(src);
        }

        let staging = Staging {
            pixels: &self.staging,
            stride,
            width: g.crop_width,
            height: g.crop_height,
        };

        surface
            .blit(&self.target, &staging)
            .map_err(PresentError::Blit)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{
        frame::DecodedFrame,
        geometry::Geometry,
        testing::{RecordingSurface, target, xy_pattern},
    };

    fn shared(surface: &RecordingSurface, timeout: Duration) -> SharedSurface {
        SharedSurface::new(surface.clone(), timeout)
    }

    #[test]
    fn zero_crop_is_rejected_without_locking() {
        let recording = RecordingSurface::default();
        let surface = shared(&recording, Duration::from_secs(5));
        let mut presenter = Presenter::new(surface.clone(), target(0, 4, 4));

        let pixels = xy_pattern(4, 4);
        let frame = DecodedFrame {
            pixels: &pixels,
            stride: 16,
            width: 4,
            height: 4,
        };

        let _held = surface.try_lock().unwrap();
        let started = Instant::now();

        for geometry in [
            Geometry { crop_width: 0, ..Geometry::full(4, 4) },
            Geometry { crop_height: 0, ..Geometry::full(4, 4) },
        ] {
            let result = presenter.present(&FrameRecord::new(frame, geometry));
            assert!(matches!(result, Err(PresentError::EmptyFrame)));
        }

        let empty = DecodedFrame { pixels: &[], ..frame };
        let result = presenter.present(&FrameRecord::new(empty, Geometry::full(4, 4)));
        assert!(matches!(result, Err(PresentError::EmptyFrame)));

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(recording.count(), 0);
    }

    #[test]
    fn busy_surface_times_out() {
        let recording = RecordingSurface::default();
        let surface = shared(&recording, Duration::from_millis(50));
        let mut presenter = Presenter::new(surface.clone(), target(0, 4, 4));

        let pixels = xy_pattern(4, 4);
        let frame = DecodedFrame {
            pixels: &pixels,
            stride: 16,
            width: 4,
            height: 4,
        };

        let holder = std::thread::spawn({
            let surface = surface.clone();
            move || {
                let _held = surface.try_lock().unwrap();
                std::thread::sleep(Duration::from_millis(300));
            }
        });
        std::thread::sleep(Duration::from_millis(50));

        let result = presenter.present(&FrameRecord::new(frame, Geometry::full(4, 4)));
        assert!(matches!(result, Err(PresentError::LockTimeout(_))));
        assert_eq!(recording.count(), 0);

        holder.join().unwrap();
        presenter
            .present(&FrameRecord::new(frame, Geometry::full(4, 4)))
            .unwrap();
        assert_eq!(recording.count(), 1);
    }

    #[test]
    fn copies_crop_region_row_by_row() {
        let recording = RecordingSurface::default();
        let surface = shared(&recording, Duration::from_secs(5));
        let mut presenter = Presenter::new(surface, target(3, 2, 2));

        // Padded stride: 4 pixels wide, 24 bytes per row.
        let mut pixels = Vec::new();
        for row in xy_pattern(4, 4).chunks(16) {
            pixels.extend_from_slice(row);
            pixels.extend_from_slice(&[0xff; 8]);
        }
        let frame = DecodedFrame {
            pixels: &pixels,
            stride: 24,
            width: 4,
            height: 4,
        };
        let geometry = Geometry {
            x_offset: 1,
            y_offset: 1,
            crop_width: 2,
            crop_height: 2,
        };

        presenter.present(&FrameRecord::new(frame, geometry)).unwrap();

        let blits = recording.blits();
        assert_eq!(blits.len(), 1);
        assert_eq!(blits[0].target, TargetId(3));
        assert_eq!((blits[0].width, blits[0].height), (2, 2));
        assert_eq!(blits[0].pixel(0, 0), [1, 1, 0, 0]);
        assert_eq!(blits[0].pixel(1, 0), [2, 1, 0, 0]);
        assert_eq!(blits[0].pixel(0, 1), [1, 2, 0, 0]);
        assert_eq!(blits[0].pixel(1, 1), [2, 2, 0, 0]);
    }

    #[test]
    fn crop_outside_frame_is_rejected() {
        let recording = RecordingSurface::default();
        let surface = shared(&recording, Duration::from_secs(5));
        let mut presenter = Presenter::new(surface, target(0, 4, 4));

        let pixels = xy_pattern(4, 4);
        let frame = DecodedFrame {
            pixels: &pixels,
            stride: 16,
            width: 4,
            height: 4,
        };
        let geometry = Geometry {
            x_offset: 2,
            y_offset: 0,
            crop_width: 4,
            crop_height: 4,
        };

        let result = presenter.present(&FrameRecord { frame, geometry });
        assert!(matches!(result, Err(PresentError::OutOfBounds { .. })));
        assert_eq!(recording.count(), 0);
    }

    #[test]
    fn short_buffer_fails_the_copy() {
        let recording = RecordingSurface::default();
        let surface = shared(&recording, Duration::from_secs(5));
        let mut presenter = Presenter::new(surface, target(0, 4, 4));

        let pixels = xy_pattern(4, 4);
        let frame = DecodedFrame {
            pixels: &pixels[..40],
            stride: 16,
            width: 4,
            height: 4,
        };

        let result = presenter.present(&FrameRecord::new(frame, Geometry::full(4, 4)));
        assert!(matches!(result, Err(PresentError::Copy { row: 2 })));
        assert_eq!(recording.count(), 0);
    }

    #[test]
    fn blit_failure_releases_the_surface() {
        let recording = RecordingSurface::default();
        recording.set_failing(true);
        let surface = shared(&recording, Duration::from_millis(100));
        let mut presenter = Presenter::new(surface.clone(), target(0, 4, 4));

        let pixels = xy_pattern(4, 4);
        let frame = DecodedFrame {
            pixels: &pixels,
            stride: 16,
            width: 4,
            height: 4,
        };

        let result = presenter.present(&FrameRecord::new(frame, Geometry::full(4, 4)));
        assert!(matches!(result, Err(PresentError::Blit(SurfaceError::Closed))));
        assert!(surface.try_lock().is_some());
    }
}
