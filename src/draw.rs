// SPDX-License-Identifier: MPL-2.0

use crate::{MotionBg, frame_queue::PendingFrame};
use sctk::{
    reexports::client::{QueueHandle, protocol::wl_shm},
    shell::{WaylandSurface, wlr_layer::LayerSurface},
    shm::slot::{Buffer, CreateBufferError, SlotPool},
};

pub fn canvas(pool: &mut SlotPool, frame: &PendingFrame) -> Result<Buffer, CreateBufferError> {
    let stride = frame.width as i32 * 4;

    let (buffer, canvas) = pool.create_buffer(
        frame.width as i32,
        frame.height as i32,
        stride,
        wl_shm::Format::Xrgb8888,
    )?;

    xrgb8888_canvas(canvas, &frame.pixels);

    Ok(buffer)
}

pub fn layer_surface(
    layer: &LayerSurface,
    queue_handle: &QueueHandle<MotionBg>,
    buffer: &Buffer,
    buffer_damage: (i32, i32),
) {
    let wl_surface = layer.wl_surface();

    // Damage the entire window
    wl_surface.damage_buffer(0, 0, buffer_damage.0, buffer_damage.1);

    // Request our next frame
    wl_surface.frame(queue_handle, wl_surface.clone());

    // Attach and commit to present.
    if let Err(why) = buffer.attach_to(wl_surface) {
        tracing::error!(?why, "Buffer attachment failed");
    }

    wl_surface.commit();
}

/// Draws packed BGRx pixels on an 8-bit canvas.
///
/// BGRx and little-endian `Xrgb8888` share a byte order.
pub fn xrgb8888_canvas(canvas: &mut [u8], pixels: &[u8]) {
    let len = canvas.len().min(pixels.len());
    canvas[..len].copy_from_slice(&pixels[..len]);
}
