// SPDX-License-Identifier: MPL-2.0

//! Stretching staged frames onto their target size.

use fast_image_resize::{
    PixelType, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use motion_bg_config::FilterMethod;

use crate::{
    frame::BYTES_PER_PIXEL,
    presenter::{Staging, SurfaceError},
};

/// Scales the valid region of `staging` to exactly `width` x `height`,
/// writing into `dst` (reused when large enough).
///
/// Returns packed pixels with `width * 4` bytes per row.
pub fn stretch(
    resizer: &mut Resizer,
    staging: &Staging<'_>,
    width: u32,
    height: u32,
    filter: FilterMethod,
    mut dst: Vec<u8>,
) -> Result<Vec<u8>, SurfaceError> {
    let row_len = width as usize * BYTES_PER_PIXEL;
    dst.resize(row_len * height as usize, 0);

    if staging.width == width && staging.height == height {
        for (dst_row, src_row) in dst
            .chunks_exact_mut(row_len)
            .zip(staging.pixels.chunks(staging.stride))
        {
            dst_row.copy_from_slice(&src_row[..row_len]);
        }
        return Ok(dst);
    }

    // The staging buffer is addressed as a whole image and cropped to the
    // valid region, so its stride carries over.
    let staging_width = (staging.stride / BYTES_PER_PIXEL) as u32;
    let staging_height = (staging.pixels.len() / staging.stride) as u32;

    let src = ImageRef::new(staging_width, staging_height, staging.pixels, PixelType::U8x4)
        .map_err(|why| SurfaceError::Scale(why.to_string()))?;
    let mut dst_image = Image::from_vec_u8(width, height, dst, PixelType::U8x4)
        .map_err(|why| SurfaceError::Scale(why.to_string()))?;

    let options = ResizeOptions::new()
        .resize_alg(filter.into())
        .use_alpha(false)
        .crop(
            0.0,
            0.0,
            f64::from(staging.width),
            f64::from(staging.height),
        );

    resizer
        .resize(&src, &mut dst_image, &options)
        .map_err(|why| SurfaceError::Scale(why.to_string()))?;

    Ok(dst_image.into_vec())
}
