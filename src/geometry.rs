// SPDX-License-Identifier: MPL-2.0

//! Reconciles a media resolution with a display resolution.
//!
//! The outcome has two halves: the size the decode source should deliver frames
//! at, and the sub-region of each delivered frame that reaches the display.

use motion_bg_config::Fit;

use crate::source::{OutputSize, SourceError};

/// The region of a decoded frame that is shown on a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x_offset: u32,
    pub y_offset: u32,
    pub crop_width: u32,
    pub crop_height: u32,
}

impl Geometry {
    /// Geometry showing a whole `width` x `height` frame.
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            crop_width: width,
            crop_height: height,
        }
    }
}

/// Result of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// How the decode source must size its frames.
    pub output: OutputSize,
    pub geometry: Geometry,
    /// The policy that was applied.
    pub fit: Fit,
}

#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("display has no area ({width}x{height})")]
    EmptyTarget { width: u32, height: u32 },
    #[error(
        "media ({source_width}x{source_height}) is larger than the display \
         ({target_width}x{target_height}); choose crop or scale"
    )]
    ChoiceRequired {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("decode source rejected the requested output size")]
    Resize(#[source] SourceError),
}

/// Decides between cropping and scaling `source` media onto a `target` display.
///
/// - Equal resolutions are delivered at the target size, uncropped.
/// - Media larger on either axis needs the caller's `choice`: `Crop` keeps the
///   native resolution and shows the centered target-sized window, `Scale`
///   rescales to the target.
/// - Smaller media is always scaled up to fill the target.
///
/// When cropping media that is smaller than the target on one axis, that axis
/// has a zero offset and the whole source extent is shown.
pub fn negotiate(
    source: (u32, u32),
    target: (u32, u32),
    choice: Option<Fit>,
) -> Result<Negotiated, NegotiationError> {
    let (source_width, source_height) = source;
    let (target_width, target_height) = target;

    if target_width == 0 || target_height == 0 {
        return Err(NegotiationError::EmptyTarget {
            width: target_width,
            height: target_height,
        });
    }

    let scaled = Negotiated {
        output: OutputSize::Scaled {
            width: target_width,
            height: target_height,
        },
        geometry: Geometry::full(target_width, target_height),
        fit: Fit::Scale,
    };

    if source == target {
        return Ok(scaled);
    }

    if source_width > target_width || source_height > target_height {
        return match choice {
            Some(Fit::Crop) => Ok(Negotiated {
                output: OutputSize::Native,
                geometry: Geometry {
                    x_offset: source_width.saturating_sub(target_width) / 2,
                    y_offset: source_height.saturating_sub(target_height) / 2,
                    crop_width: source_width.min(target_width),
                    crop_height: source_height.min(target_height),
                },
                fit: Fit::Crop,
            }),
            Some(Fit::Scale) => Ok(scaled),
            None => Err(NegotiationError::ChoiceRequired {
                source_width,
                source_height,
                target_width,
                target_height,
            }),
        };
    }

    Ok(scaled)
}
