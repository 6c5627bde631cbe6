// SPDX-License-Identifier: MPL-2.0

//! Frame pacing.

use std::time::Duration;

/// Delay before the next frame is requested, given how long the last
/// pull-and-present cycle took.
///
/// A late cycle yields no delay and its lateness is forgotten, so playback
/// slips instead of catching up with a burst of frames.
#[must_use]
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}
