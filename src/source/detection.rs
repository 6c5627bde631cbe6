// SPDX-License-Identifier: MPL-2.0

//! File type detection for playable media.
//!
//! Detection is by extension only; whether the system can actually decode the
//! file is discovered when the decode pipeline prerolls.

use std::path::Path;

/// Video container extensions that may contain playable video.
/// Checked case-insensitively.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4",  // MPEG-4 container (typically H.264/H.265 codec)
    "webm", // WebM container (VP8/VP9/AV1)
    "mkv",  // Matroska container (any codec)
    "avi",  // AVI container (legacy format)
    "mov",  // QuickTime container (typically H.264)
    "m4v",  // MPEG-4 Video (Apple variant of MP4)
    "ogv",  // Ogg Video container (Theora codec)
];

fn has_extension(path: &Path, candidates: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

/// Check if a path points to a GIF.
#[must_use]
pub fn is_gif_file(path: &Path) -> bool {
    has_extension(path, &["gif"])
}

/// Check if a path points to a video container.
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

/// Check if a path points to anything the decode source can play.
#[must_use]
pub fn is_animated_file(path: &Path) -> bool {
    is_gif_file(path) || is_video_file(path)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{is_animated_file, is_gif_file, is_video_file};

    #[test]
    fn test_is_gif_file() {
        assert!(is_gif_file(Path::new("test.gif")));
        assert!(is_gif_file(Path::new("test.GIF")));
        assert!(is_gif_file(Path::new("/path/to/animation.gif")));
        assert!(!is_gif_file(Path::new("test.mp4")));
        assert!(!is_gif_file(Path::new("test.png")));
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("test.mp4")));
        assert!(is_video_file(Path::new("test.MP4")));
        assert!(is_video_file(Path::new("test.WEBM")));
        assert!(is_video_file(Path::new("test.mkv")));
        assert!(is_video_file(Path::new("test.m4v")));
        assert!(is_video_file(Path::new("test.mov")));
        assert!(is_video_file(Path::new("test.ogv")));
        assert!(is_video_file(Path::new("test.avi")));
        assert!(!is_video_file(Path::new("test.gif")));
        assert!(!is_video_file(Path::new("test.png")));
    }

    #[test]
    fn test_playable_extensions() {
        for ext in ["gif", "mp4", "webm", "mkv", "avi", "mov", "m4v", "ogv"] {
            let filename = format!("clip.{ext}");
            assert!(
                is_animated_file(Path::new(&filename)),
                "Extension {ext} should be playable"
            );
        }
    }

    #[test]
    fn test_edge_cases() {
        assert!(!is_animated_file(Path::new("test")));
        assert!(!is_animated_file(Path::new("/path/to/file")));
        assert!(!is_animated_file(Path::new("test.jpg")));

        assert!(is_animated_file(Path::new(".hidden.mp4")));
        assert!(is_animated_file(Path::new("my.video.file.WebM")));
        assert!(is_animated_file(Path::new("../test.gif")));
    }
}
