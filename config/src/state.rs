// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;

use cosmic_config::{Config, CosmicConfigEntry, cosmic_config_derive::CosmicConfigEntry};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::NAME;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq, Setters, CosmicConfigEntry)]
#[serde(deny_unknown_fields)]
#[must_use]
pub struct State {
    /// The media last started on each output
    /// (output_name, media path)
    pub playing: Vec<(String, PathBuf)>,
}

impl State {
    pub fn version() -> u64 {
        1
    }

    pub fn state() -> Result<Config, cosmic_config::Error> {
        Config::new_state(NAME, Self::version())
    }

    /// Record `source` as the media playing on `output`.
    pub fn record(&mut self, output: &str, source: PathBuf) {
        if let Some((_, path)) = self.playing.iter_mut().find(|(name, _)| name == output) {
            *path = source;
        } else {
            self.playing.push((output.to_owned(), source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_replaces_existing_output() {
        let mut state = State::default();
        state.record("DP-1", PathBuf::from("/a.webm"));
        state.record("DP-2", PathBuf::from("/b.webm"));
        state.record("DP-1", PathBuf::from("/c.webm"));

        assert_eq!(
            state.playing,
            vec![
                ("DP-1".to_owned(), PathBuf::from("/c.webm")),
                ("DP-2".to_owned(), PathBuf::from("/b.webm")),
            ]
        );
    }
}
