// SPDX-License-Identifier: MPL-2.0

//! Decode sources: media in, raw BGRx frames out.

pub mod detection;
#[cfg(feature = "gstreamer")]
mod gst;

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::frame::DecodedFrame;

/// Frame interval used when the media does not report a frame rate (60 FPS).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Size at which a decode source delivers frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSize {
    /// The media's own resolution, without rescaling.
    Native,
    Scaled { width: u32, height: u32 },
}

/// Outcome of a successful pull.
#[derive(Debug)]
pub enum Pull<'a> {
    Frame(DecodedFrame<'a>),
    /// The stream ended and was rewound to its start; no frame this time.
    Rewound,
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("media not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported media {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot deliver frames at {requested:?}: {reason}")]
    Configure {
        requested: OutputSize,
        reason: String,
    },
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("decoder backend failure: {0}")]
    Backend(String),
}

/// A handle to one open media stream.
///
/// Owned by exactly one playback session and moved onto its playback thread.
pub trait DecodeSource: Send {
    /// Width and height of the media as encoded.
    fn native_resolution(&self) -> (u32, u32);

    /// Nominal time between frames.
    fn frame_interval(&self) -> Duration;

    /// Selects the size of subsequently pulled frames.
    fn configure_output(&mut self, size: OutputSize) -> Result<(), SourceError>;

    /// Blocks until the next frame is decoded.
    ///
    /// With `looping`, reaching the end of the stream rewinds it and yields
    /// [`Pull::Rewound`] instead of [`Pull::EndOfStream`].
    fn pull_frame(&mut self, looping: bool) -> Result<Pull<'_>, SourceError>;
}

/// Opens the media at `path`.
pub fn open(path: &Path) -> Result<Box<dyn DecodeSource>, SourceError> {
    let metadata = std::fs::metadata(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            SourceError::NotFound(path.to_path_buf())
        } else {
            SourceError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    if !metadata.is_file() || !detection::is_animated_file(path) {
        return Err(SourceError::Unsupported {
            path: path.to_path_buf(),
            reason: "not a known video container".into(),
        });
    }

    open_backend(path)
}

#[cfg(feature = "gstreamer")]
fn open_backend(path: &Path) -> Result<Box<dyn DecodeSource>, SourceError> {
    Ok(Box::new(gst::GstSource::open(path)?))
}

#[cfg(not(feature = "gstreamer"))]
fn open_backend(path: &Path) -> Result<Box<dyn DecodeSource>, SourceError> {
    Err(SourceError::Unsupported {
        path: path.to_path_buf(),
        reason: "built without a decoder backend".into(),
    })
}
