// SPDX-License-Identifier: MPL-2.0

//! Decoded frames and their placement.

use crate::geometry::Geometry;

/// Packed BGRx.
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded image borrowed from its decode source.
///
/// The pixels stay valid until the next pull from the same source.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame<'a> {
    pub pixels: &'a [u8],
    /// Bytes per scanline, at least `width * BYTES_PER_PIXEL`.
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

/// A decoded frame together with the region of it that is presented.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord<'a> {
    pub frame: DecodedFrame<'a>,
    pub geometry: Geometry,
}

impl<'a> FrameRecord<'a> {
    pub fn new(frame: DecodedFrame<'a>, geometry: Geometry) -> Self {
        Self { frame, geometry }
    }

    /// Whether the crop region lies inside the decoded frame.
    pub fn in_bounds(&self) -> bool {
        let g = &self.geometry;
        u64::from(g.x_offset) + u64::from(g.crop_width) <= u64::from(self.frame.width)
            && u64::from(g.y_offset) + u64::from(g.crop_height) <= u64::from(self.frame.height)
    }
}
