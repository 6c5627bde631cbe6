// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeMap;

use motion_bg_config::Fit;

use crate::{
    geometry::Negotiated,
    presenter::SharedSurface,
    session::{PlaybackSession, SessionError},
    source::DecodeSource,
    target::{TargetId, Targets},
};

/// One playback session per discovered target.
pub struct SessionRegistry {
    sessions: BTreeMap<TargetId, PlaybackSession>,
}

impl SessionRegistry {
    pub fn new(targets: &Targets, surface: &SharedSurface) -> Self {
        let sessions = targets
            .iter()
            .map(|target| {
                (
                    target.id,
                    PlaybackSession::new(target.clone(), surface.clone()),
                )
            })
            .collect();

        Self { sessions }
    }

    #[cfg(test)]
    pub fn get(&self, id: TargetId) -> Option<&PlaybackSession> {
        self.sessions.get(&id)
    }

    /// The session for the target with the given connector name.
    #[cfg(test)]
    pub fn find(&self, name: &str) -> Option<&PlaybackSession> {
        self.sessions
            .values()
            .find(|session| session.target().name == name)
    }

    pub fn primary(&self) -> Option<&PlaybackSession> {
        self.sessions.values().find(|session| session.target().primary)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &PlaybackSession> {
        self.sessions.values()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Replaces the media of a target's session, fits it and starts playing.
    pub fn play(
        &mut self,
        id: TargetId,
        media: Box<dyn DecodeSource>,
        fit: Option<Fit>,
        looping: bool,
    ) -> Result<Negotiated, SessionError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownTarget(id))?;

        session.set_media(media);
        let negotiated = session.negotiate(fit)?;
        session.start(looping)?;
        Ok(negotiated)
    }

    pub fn stop(&mut self, id: TargetId) -> Result<(), SessionError> {
        self.sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownTarget(id))?
            .stop();
        Ok(())
    }

    /// Signals every session, then waits for each playback thread.
    pub fn stop_all(&mut self) {
        for session in self.sessions.values() {
            session.signal_stop();
        }
        for session in self.sessions.values_mut() {
            session.stop();
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
