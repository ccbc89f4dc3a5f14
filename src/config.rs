//! The configuration file of the program.

use std::fmt;
use std::path::{Path, PathBuf};

use ec_log::Verbosity;
use ec_worldgen_core::GenConfig;
use serde::{Deserialize, Serialize};

/// Everything that can be tuned from `city.ron`.
///
/// Every field has a default, so a configuration file only needs to name what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The most verbose messages that get printed.
    pub log_level: Verbosity,
    /// How chunks are generated.
    pub generation: GenConfig,
    /// When chunks are loaded and unloaded.
    pub streaming: StreamingConfig,
    /// Where chunks are persisted.
    pub storage: StorageConfig,
    /// The headless camera flight.
    pub demo: DemoConfig,
}

/// The distances at which chunks are streamed in and out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks whose center is within this distance of the camera get loaded.
    pub load_radius: f32,
    /// Chunks whose center is farther than this from the camera get unloaded.
    ///
    /// Must be larger than `load_radius`, otherwise chunks on the edge would be loaded and
    /// unloaded every other frame.
    pub unload_radius: f32,
    /// How long the loader waits for the render thread to release a chunk before checking
    /// whether it was asked to stop, in milliseconds.
    pub release_poll_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: 1800.0,
            unload_radius: 2600.0,
            release_poll_ms: 50,
        }
    }
}

/// Where and when chunks are written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The directory holding one file per persisted chunk.
    pub directory: PathBuf,
    /// Whether chunks are saved when they are unloaded.
    pub save_on_unload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("chunks"),
            save_on_unload: true,
        }
    }
}

/// The straight flight of the headless camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Where the camera starts, in world units.
    pub start: [f32; 3],
    /// The distance covered every frame, along X and Z.
    pub velocity: [f32; 2],
    /// The number of frames to simulate.
    pub frames: u32,
    /// The duration of a frame, in milliseconds.
    pub frame_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            start: [500.0, 50.0, 500.0],
            velocity: [12.0, 4.0],
            frames: 1200,
            frame_ms: 16,
        }
    }
}

/// An error that might occur while loading a [`Config`].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(PathBuf, std::io::Error),
    /// The file is not valid RON, or does not describe a [`Config`].
    Parse(PathBuf, ron::error::SpannedError),
    /// The values of the file contradict each other.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(path, err) => write!(f, "can't read `{}`: {err}", path.display()),
            Self::Parse(path, err) => write!(f, "can't parse `{}`: {err}", path.display()),
            Self::Invalid(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_, err) => Some(err),
            Self::Parse(_, err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl Config {
    /// Parses a configuration from RON text.
    pub fn from_ron(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            ron::from_str(text).map_err(|err| ConfigError::Parse(path.to_path_buf(), err))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_ron(path, &text)
    }

    /// Loads the configuration file at `path`, or returns the default configuration if there is
    /// no such file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(_, err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Checks that the values of the configuration make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming.unload_radius <= self.streaming.load_radius {
            return Err(ConfigError::Invalid(
                "`unload_radius` must be larger than `load_radius`",
            ));
        }
        if self.generation.min_intersection_distance <= 0.0 {
            return Err(ConfigError::Invalid(
                "`min_intersection_distance` must be positive",
            ));
        }
        if self.generation.max_walk_steps < 3 {
            return Err(ConfigError::Invalid("`max_walk_steps` must be at least 3"));
        }
        Ok(())
    }
}
