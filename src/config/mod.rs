//! Run configuration (layered: defaults < config file < env < code).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ParleyError;

const DEFAULT_MAX_TURNS: u32 = 10;
const CONFIG_FILE_NAME: &str = "parley.toml";

const MAX_TURNS_ENV: &str = "PARLEY_MAX_TURNS";
const HANDOFF_CONSUMES_TURN_ENV: &str = "PARLEY_HANDOFF_CONSUMES_TURN";
const VALIDATE_TOOL_ARGUMENTS_ENV: &str = "PARLEY_VALIDATE_TOOL_ARGUMENTS";
const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

/// Per-invocation engine configuration.
///
/// Serializable, since every interruption carries the configuration of the
/// run that produced it.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Full turns allowed before the run fails with `max_turns_exceeded`.
    #[builder(default = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,
    /// Whether a tool batch that performed a handoff counts against the budget.
    #[builder(default = true)]
    pub handoff_consumes_turn: bool,
    /// Validate tool arguments against the tool's parameter schema.
    #[builder(default = true)]
    pub validate_tool_arguments: bool,
    /// Free-form labels stamped on every [`EngineEvent`](crate::agent_loop::EngineEvent) of the run.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            handoff_consumes_turn: true,
            validate_tool_arguments: true,
            metadata: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Parse a TOML document; missing keys fall back to defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ParleyError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParleyError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Overlay environment variables (`PARLEY_*`, `.env` honored).
    pub fn apply_env(mut self) -> Result<Self, ParleyError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        if let Some(value) = env_var(MAX_TURNS_ENV) {
            self.max_turns = value.parse().map_err(|_| {
                ParleyError::Configuration(format!("{MAX_TURNS_ENV} must be an integer, got '{value}'"))
            })?;
        }
        if let Some(value) = env_var(HANDOFF_CONSUMES_TURN_ENV) {
            self.handoff_consumes_turn = parse_bool(HANDOFF_CONSUMES_TURN_ENV, &value)?;
        }
        if let Some(value) = env_var(VALIDATE_TOOL_ARGUMENTS_ENV) {
            self.validate_tool_arguments = parse_bool(VALIDATE_TOOL_ARGUMENTS_ENV, &value)?;
        }
        Ok(self)
    }

    /// Load defaults, then the config file, then the environment.
    ///
    /// The file is `$PARLEY_CONFIG` when set, otherwise `parley.toml` in the
    /// platform config directory. A missing file is not an error.
    pub fn load() -> Result<Self, ParleyError> {
        let base = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        base.apply_env()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_handoff_consumes_turn(mut self, consumes: bool) -> Self {
        self.handoff_consumes_turn = consumes;
        self
    }
}

/// Location of the config file consulted by [`RunConfig::load`].
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = env_var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ParleyError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ParleyError::Configuration(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}
