// SPDX-License-Identifier: MPL-2.0

pub mod state;

use cosmic_config::{Config as CosmicConfig, ConfigGet, ConfigSet};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, path::PathBuf, time::Duration};

pub const NAME: &str = "com.system76.CosmicMotionBackground";
pub const OUTPUTS_KEY: &str = "outputs";
pub const PRESENT_TIMEOUT_KEY: &str = "present_timeout_ms";

/// How long a session may wait for the shared surface before its frame fails.
pub const DEFAULT_PRESENT_TIMEOUT_MS: u64 = 5000;

/// Configuration for the background's output
#[derive(Debug, Deserialize, Serialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
#[must_use]
pub enum Output {
    /// play on a specific output
    Name(String),
    /// play on all outputs
    All,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::All => f.write_str("all"),
            Output::Name(name) => write!(f, "output.{name}"),
        }
    }
}

/// What to do with media that is larger than the display on at least one axis.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fit {
    /// Show the centered region of the media at native resolution.
    Crop,
    /// Rescale the media to the display's resolution.
    Scale,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Setters)]
#[serde(deny_unknown_fields)]
#[must_use]
pub struct Entry {
    /// the configured output
    #[setters(skip)]
    pub output: Output,
    /// the media to play
    #[setters(skip)]
    pub source: PathBuf,
    /// restart the media when it ends
    #[serde(default)]
    pub looping: bool,
    /// crop or scale media larger than the output
    #[serde(default)]
    #[setters(strip_option)]
    pub fit: Option<Fit>,
    /// filter used when stretching frames onto the output
    #[serde(default)]
    pub filter_method: FilterMethod,
}

impl Entry {
    /// Define the media played on a given output device.
    pub fn new(output: Output, source: PathBuf) -> Self {
        Self {
            output,
            source,
            looping: true,
            fit: None,
            filter_method: FilterMethod::default(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        self.output.to_string()
    }
}

/// Image filtering method
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMethod {
    // nearest neighbor filtering
    Nearest,
    // linear filtering
    #[default]
    Linear,
    // lanczos filtering with window 3
    Lanczos,
}

#[cfg(feature = "scaler")]
impl From<FilterMethod> for fast_image_resize::ResizeAlg {
    fn from(method: FilterMethod) -> Self {
        use fast_image_resize::{FilterType, ResizeAlg};
        match method {
            FilterMethod::Nearest => ResizeAlg::Nearest,
            FilterMethod::Linear => ResizeAlg::Convolution(FilterType::Bilinear),
            FilterMethod::Lanczos => ResizeAlg::Convolution(FilterType::Lanczos3),
        }
    }
}

#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub outputs: HashSet<Output>,
    pub entries: Vec<Entry>,
    pub present_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outputs: HashSet::new(),
            entries: Vec::new(),
            present_timeout_ms: DEFAULT_PRESENT_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Convenience function for cosmic-config
    ///
    /// # Errors
    ///
    /// Fails if cosmic-config paths are missing or cannot be created.
    pub fn helper() -> Result<CosmicConfig, cosmic_config::Error> {
        CosmicConfig::new(NAME, 1)
    }

    /// Load the config from cosmic-config.
    ///
    /// # Errors
    ///
    /// Fails if the list of outputs stored within cosmic-config cannot be parsed.
    pub fn load(context: &CosmicConfig) -> Result<Self, cosmic_config::Error> {
        let mut config = Self::default();

        if let Ok(timeout) = context.get::<u64>(PRESENT_TIMEOUT_KEY) {
            config.present_timeout_ms = timeout;
        }

        let entries = Self::load_outputs(context)?
            .into_iter()
            .filter_map(|output| match Self::load_entry(context, &output.to_string()) {
                Ok(entry) => Some(entry),
                Err(why) => {
                    tracing::warn!(%output, ?why, "Skipping unreadable entry");
                    None
                }
            });

        for entry in entries {
            config.outputs.insert(entry.output.clone());
            config.entries.push(entry);
        }

        if config.entries.is_empty() {
            tracing::info!("No media configured for any output.");
        }

        Ok(config)
    }

    /// How long a presentation may wait for the shared surface.
    #[must_use]
    pub fn present_timeout(&self) -> Duration {
        Duration::from_millis(self.present_timeout_ms)
    }

    /// Get the entry for a given output.
    #[must_use]
    pub fn entry(&self, output: &Output) -> Option<&Entry> {
        self.entries.iter().find(|entry| &entry.output == output)
    }

    /// get a mutable entry for a given output.
    #[must_use]
    pub fn entry_mut(&mut self, output: &Output) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| &entry.output == output)
    }

    /// The entry that applies to the output with the given connector name.
    ///
    /// An entry naming the output wins over the `All` entry.
    #[must_use]
    pub fn entry_for(&self, output_name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| matches!(&entry.output, Output::Name(name) if name == output_name))
            .or_else(|| self.entry(&Output::All))
    }

    /// Get the entry for an output from cosmic-config.
    ///
    /// # Errors
    ///
    /// Fails if the config is missing or fails to parse.
    pub fn load_entry(config: &CosmicConfig, output: &str) -> Result<Entry, cosmic_config::Error> {
        config.get::<Entry>(output)
    }

    /// Applies the entry for the given output to cosmic-config.
    ///
    /// # Errors
    ///
    /// Fails if the config could not be set in cosmic-config.
    pub fn set_entry(
        &mut self,
        config: &CosmicConfig,
        entry: Entry,
    ) -> Result<(), cosmic_config::Error> {
        config.set(&entry.key(), entry.clone())?;

        if let Some(old) = self.entry_mut(&entry.output) {
            *old = entry;
        } else {
            self.outputs.insert(entry.output.clone());
            self.entries.push(entry);
        }

        if let Err(why) = config.set(OUTPUTS_KEY, self.outputs.iter().collect::<Vec<_>>()) {
            tracing::error!(?why, "Failed to update outputs");
        }

        Ok(())
    }

    /// Get all stored outputs from cosmic-config.
    ///
    /// # Errors
    ///
    /// Fails if the config is missing or fails to parse.
    pub fn load_outputs(config: &CosmicConfig) -> Result<Vec<Output>, cosmic_config::Error> {
        config.get::<Vec<Output>>(OUTPUTS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: Vec<Entry>) -> Config {
        Config {
            outputs: entries.iter().map(|e| e.output.clone()).collect(),
            entries,
            ..Config::default()
        }
    }

    #[test]
    fn output_keys() {
        assert_eq!(Output::All.to_string(), "all");
        assert_eq!(Output::Name("DP-1".into()).to_string(), "output.DP-1");
    }

    #[test]
    fn named_entry_wins_over_all() {
        let config = config(vec![
            Entry::new(Output::All, PathBuf::from("/media/all.webm")),
            Entry::new(Output::Name("HDMI-A-1".into()), PathBuf::from("/media/hdmi.mp4")),
        ]);

        let hdmi = config.entry_for("HDMI-A-1").unwrap();
        assert_eq!(hdmi.source, PathBuf::from("/media/hdmi.mp4"));

        let other = config.entry_for("DP-2").unwrap();
        assert_eq!(other.source, PathBuf::from("/media/all.webm"));
    }

    #[test]
    fn no_entry_without_all() {
        let config = config(vec![Entry::new(
            Output::Name("eDP-1".into()),
            PathBuf::from("/media/laptop.mkv"),
        )]);

        assert!(config.entry_for("DP-1").is_none());
    }

    #[test]
    fn default_timeout() {
        assert_eq!(
            Config::default().present_timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn entry_setters() {
        let entry = Entry::new(Output::All, PathBuf::from("/media/a.webm"))
            .looping(false)
            .fit(Fit::Crop)
            .filter_method(FilterMethod::Nearest);

        assert!(!entry.looping);
        assert_eq!(entry.fit, Some(Fit::Crop));
        assert_eq!(entry.filter_method, FilterMethod::Nearest);
    }
}
