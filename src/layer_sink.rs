// SPDX-License-Identifier: MPL-2.0

//! Presentation surface backed by the Wayland layer surfaces.
//!
//! Playback threads never touch Wayland objects. A blit scales the staged
//! frame to its target's size, leaves it in the frame queue and pings the
//! event loop, which draws it on the target's layer.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use calloop::ping::Ping;
use fast_image_resize::Resizer;
use motion_bg_config::FilterMethod;
use parking_lot::Mutex;

use crate::{
    frame::BYTES_PER_PIXEL,
    frame_queue::{PendingFrame, SharedFrameQueue},
    presenter::{Staging, Surface, SurfaceError},
    scaler,
    target::{TargetGeometry, TargetId},
};

/// Stretch filter per target, shared with the config reload path.
#[derive(Debug, Clone, Default)]
pub struct Filters(Arc<Mutex<BTreeMap<TargetId, FilterMethod>>>);

impl Filters {
    pub fn set(&self, target: TargetId, method: FilterMethod) {
        self.0.lock().insert(target, method);
    }

    pub fn get(&self, target: TargetId) -> FilterMethod {
        self.0.lock().get(&target).copied().unwrap_or_default()
    }
}

pub struct LayerSink {
    queue: SharedFrameQueue,
    ping: Ping,
    filters: Filters,
    resizer: Resizer,
}

impl LayerSink {
    pub fn new(queue: SharedFrameQueue, ping: Ping, filters: Filters) -> Self {
        Self {
            queue,
            ping,
            filters,
            resizer: Resizer::new(),
        }
    }
}

impl Surface for LayerSink {
    fn blit(&mut self, target: &TargetGeometry, staging: &Staging<'_>) -> Result<(), SurfaceError> {
        if self.queue.is_closed() {
            return Err(SurfaceError::Closed);
        }

        let len = target.width as usize * target.height as usize * BYTES_PER_PIXEL;
        let pixels = scaler::stretch(
            &mut self.resizer,
            staging,
            target.width,
            target.height,
            self.filters.get(target.id),
            self.queue.buffer(len),
        )?;

        let queued = self.queue.push(PendingFrame {
            target: target.id,
            pixels,
            width: target.width,
            height: target.height,
            queued_at: Instant::now(),
        });

        if !queued {
            return Err(SurfaceError::Closed);
        }

        self.ping.ping();
        Ok(())
    }
}
