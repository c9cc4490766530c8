//! Game and agent configuration.
//!
//! A [`GameConfig`] is read once from a JSON file, validated, and then handed
//! by reference (or behind an `Arc`) to everything that needs it.

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::map::GridError;

/// Name of the object entry that describes the controlled character.
pub const CHARACTER_NAME: &str = "character";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("World size {size_x}x{size_y} must be non-zero in both dimensions")]
    EmptyWorld { size_x: usize, size_y: usize },
    #[error("World size {size_x}x{size_y} has more cells than can be addressed")]
    WorldTooLarge { size_x: usize, size_y: usize },
    #[error("No '{CHARACTER_NAME}' object configured")]
    MissingCharacter,
    #[error("Object '{name}' at ({x}, {y}) lies outside the {size_x}x{size_y} world")]
    ObjectOutOfBounds {
        name: String,
        x: usize,
        y: usize,
        size_x: usize,
        size_y: usize,
    },
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("Hyperparameter {name} = {value} is out of range")]
    InvalidHyperparameter { name: &'static str, value: f64 },
}

/// Grid extents and the per-step move reward (usually a negative penalty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub size_x: usize,
    pub size_y: usize,
    /// Reward charged on every step that does not land on a rewarding object.
    pub reward: f64,
    /// Glyph used for empty cells.
    #[serde(default = "default_background")]
    pub background: String,
}

/// One placed object. Flags that are absent in the file default to `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub x: usize,
    pub y: usize,
    pub icon: String,
    /// Blocks movement into its cell.
    #[serde(default)]
    pub solid: bool,
    /// Disappears once taken.
    #[serde(default)]
    pub consumable: bool,
    /// Taking this object ends the episode.
    #[serde(default)]
    pub ends_game: bool,
    /// Reward that replaces the move penalty when the character lands here.
    #[serde(default)]
    pub reward: Option<f64>,
    #[serde(default)]
    pub taken: bool,
}

/// Tabular Q-learning hyperparameters and the train/evaluate cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub epsilon_start: f64,
    pub epsilon_end: f64,
    /// Episodes over which epsilon decays linearly from start to end.
    pub epsilon_max_episodes: u64,
    pub gamma: f64,
    /// Consecutive greedy evaluation episodes run after each checkpoint.
    pub n_episodes_evaluate: u64,
    /// Training episodes between checkpoints. Zero disables the cycle.
    pub eval_every_n_episodes: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            learning_rate: 0.1,
            epsilon_start: 1.0,
            epsilon_end: 0.05,
            epsilon_max_episodes: 1000,
            gamma: 0.9,
            n_episodes_evaluate: 10,
            eval_every_n_episodes: 100,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_range = [
            ("epsilon_start", self.epsilon_start),
            ("epsilon_end", self.epsilon_end),
            ("gamma", self.gamma),
        ];
        for (name, value) in unit_range {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidHyperparameter { name, value });
            }
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::InvalidHyperparameter {
                name: "learning_rate",
                value: self.learning_rate,
            });
        }
        Ok(())
    }
}

/// The full configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    pub world: WorldConfig,
    pub objects: BTreeMap<String, ObjectConfig>,
    /// Step budget of every episode.
    pub max_steps: u32,
    /// Artificial delay per step, in seconds.
    #[serde(default)]
    pub speed: f64,
    #[serde(flatten)]
    pub agent: AgentConfig,
}

fn default_background() -> String {
    " ".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

impl GameConfig {
    /// Reads, parses and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (size_x, size_y) = (self.world.size_x, self.world.size_y);
        if size_x == 0 || size_y == 0 {
            return Err(ConfigError::EmptyWorld { size_x, size_y });
        }
        if size_x.checked_mul(size_y).is_none() {
            return Err(ConfigError::WorldTooLarge { size_x, size_y });
        }
        self.character()?;
        for (name, object) in &self.objects {
            if object.x >= size_x || object.y >= size_y {
                return Err(ConfigError::ObjectOutOfBounds {
                    name: name.clone(),
                    x: object.x,
                    y: object.y,
                    size_x,
                    size_y,
                });
            }
        }
        self.agent.validate()
    }

    pub fn character(&self) -> Result<&ObjectConfig, ConfigError> {
        self.objects
            .get(CHARACTER_NAME)
            .ok_or(ConfigError::MissingCharacter)
    }

    /// Number of distinct states, `size_x * size_y`.
    ///
    /// Exact for any config that passed [`GameConfig::validate`]; an unvalidated
    /// oversized world saturates at `usize::MAX` instead of overflowing.
    pub fn num_states(&self) -> usize {
        self.world.size_x.saturating_mul(self.world.size_y)
    }

    pub fn step_delay(&self) -> Duration {
        if self.speed.is_finite() && self.speed > 0.0 {
            Duration::from_secs_f64(self.speed)
        } else {
            Duration::ZERO
        }
    }
}
