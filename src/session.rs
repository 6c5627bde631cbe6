// SPDX-License-Identifier: MPL-2.0

//! Playback of one media stream onto one target.
//!
//! A session moves its decode source onto a dedicated playback thread while it
//! plays and gets it back when the thread is joined:
//!
//! ```text
//!        start()              stop() / Drop
//! Idle ──────────► Playing ───────────────► Stopping ──join──► Idle
//!                     │
//!                     └── end of stream, decode or present failure ──► Idle
//! ```

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use motion_bg_config::Fit;
use tracing::{debug, error, info, trace, warn};

use crate::{
    frame::FrameRecord,
    geometry::{self, Geometry, Negotiated, NegotiationError},
    pacer,
    presenter::{Presenter, SharedSurface},
    source::{DecodeSource, Pull, SourceError},
    target::{TargetGeometry, TargetId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Playing = 1,
    Stopping = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no target {0}")]
    UnknownTarget(TargetId),
    #[error("no media attached")]
    NoMedia,
    #[error("media has not been fitted to the target")]
    NotNegotiated,
    #[error("failed to open media")]
    Open(#[from] SourceError),
    #[error("failed to fit media to the target")]
    Negotiation(#[from] NegotiationError),
    #[error("failed to spawn playback thread")]
    Spawn(#[source] io::Error),
}

/// Playback state of one target.
pub struct PlaybackSession {
    target: TargetGeometry,
    surface: SharedSurface,
    /// Held here while idle; owned by the playback thread while playing.
    media: Option<Box<dyn DecodeSource>>,
    geometry: Option<Geometry>,
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Box<dyn DecodeSource>>>,
}

impl PlaybackSession {
    pub fn new(target: TargetGeometry, surface: SharedSurface) -> Self {
        Self {
            target,
            surface,
            media: None,
            geometry: None,
            state: Arc::new(AtomicU8::new(RunState::Idle as u8)),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn target(&self) -> &TargetGeometry {
        &self.target
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.state() == RunState::Playing
    }

    #[cfg(test)]
    pub fn has_media(&self) -> bool {
        self.media.is_some() || self.thread.is_some()
    }

    /// Replaces the attached media, stopping playback and closing the previous
    /// media first. The new media must be negotiated before it can start.
    pub fn set_media(&mut self, media: Box<dyn DecodeSource>) {
        self.stop();
        self.geometry = None;
        drop(self.media.take());
        self.media = Some(media);
    }

    /// Fits the attached media to the target and configures the decode size.
    ///
    /// Stops playback first.
    pub fn negotiate(&mut self, fit: Option<Fit>) -> Result<Negotiated, SessionError> {
        self.stop();
        self.geometry = None;

        let media = self.media.as_mut().ok_or(SessionError::NoMedia)?;
        let negotiated = geometry::negotiate(
            media.native_resolution(),
            (self.target.width, self.target.height),
            fit,
        )?;

        media
            .configure_output(negotiated.output)
            .map_err(NegotiationError::Resize)?;

        debug!(
            output = %self.target.name,
            fit = ?negotiated.fit,
            geometry = ?negotiated.geometry,
            size = ?negotiated.output,
            "Negotiated media geometry"
        );

        self.geometry = Some(negotiated.geometry);
        Ok(negotiated)
    }

    /// Starts playing on a new thread, stopping any current playback first.
    pub fn start(&mut self, looping: bool) -> Result<(), SessionError> {
        self.stop();

        if self.media.is_none() {
            return Err(SessionError::NoMedia);
        }
        let geometry = self.geometry.ok_or(SessionError::NotNegotiated)?;
        let media = self.media.take().ok_or(SessionError::NoMedia)?;

        self.stop = Arc::new(AtomicBool::new(false));
        self.state.store(RunState::Playing as u8, Ordering::Release);

        let worker = Worker {
            media,
            presenter: Presenter::new(self.surface.clone(), self.target.clone()),
            geometry,
            looping,
            stop: Arc::clone(&self.stop),
            state: Arc::clone(&self.state),
        };

        let spawned = thread::Builder::new()
            .name(format!("playback-{}", self.target.name))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(why) => {
                self.state.store(RunState::Idle as u8, Ordering::Release);
                Err(SessionError::Spawn(why))
            }
        }
    }

    /// Asks the playback thread to finish its current cycle without waiting.
    pub(crate) fn signal_stop(&self) {
        let _ = self.state.compare_exchange(
            RunState::Playing as u8,
            RunState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.stop.store(true, Ordering::Release);
    }

    /// Stops playback and waits for the playback thread to exit.
    ///
    /// Does nothing when no playback thread exists.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.signal_stop();

        match thread.join() {
            Ok(media) => self.media = Some(media),
            Err(_) => error!(output = %self.target.name, "Playback thread panicked"),
        }

        self.state.store(RunState::Idle as u8, Ordering::Release);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the playback thread owns.
struct Worker {
    media: Box<dyn DecodeSource>,
    presenter: Presenter,
    geometry: Geometry,
    looping: bool,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl Worker {
    fn run(mut self) -> Box<dyn DecodeSource> {
        let span = tracing::info_span!("playback", output = %self.presenter.target().name);
        let _entered = span.enter();

        let interval = self.media.frame_interval();
        let mut presented = 0u64;

        info!(
            interval_ms = interval.as_millis(),
            looping = self.looping,
            "Playback started"
        );

        while !self.stop.load(Ordering::Acquire) {
            let cycle = Instant::now();

            match self.media.pull_frame(self.looping) {
                Ok(Pull::Frame(frame)) => {
                    if let Err(why) = self.presenter.present(&FrameRecord::new(frame, self.geometry)) {
                        warn!(?why, presented, "Presentation failed, stopping playback");
                        break;
                    }
                    presented += 1;
                }
                // Nothing to present, but the cycle is still paced.
                Ok(Pull::Rewound) => debug!(presented, "Stream rewound"),
                Ok(Pull::EndOfStream) => {
                    info!(presented, "End of stream");
                    break;
                }
                Err(why) => {
                    warn!(?why, presented, "Decode failed, stopping playback");
                    break;
                }
            }

            let elapsed = cycle.elapsed();
            let delay = pacer::next_delay(interval, elapsed);
            if delay.is_zero() {
                trace!(
                    late_by_us = (elapsed - interval).as_micros(),
                    "Frame cycle overran its interval"
                );
            } else {
                thread::sleep(delay);
            }
        }

        if self.stop.load(Ordering::Acquire) {
            debug!(presented, "Playback stopped");
        }

        self.state.store(RunState::Idle as u8, Ordering::Release);
        self.media
    }
}
