use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};
use crate::types::Participant;

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub flow: Option<FlowConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on steps taken by run-to-completion.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Refuse to run graphs whose validation report contains errors.
    #[serde(default = "default_validate_before_run")]
    pub validate_before_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            validate_before_run: default_validate_before_run(),
        }
    }
}

fn default_max_steps() -> usize {
    1000
}

fn default_validate_before_run() -> bool {
    true
}

/// Which flow to run and what it starts with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Path to a JSON graph definition.
    #[serde(default)]
    pub graph: Option<String>,
    /// Path to a JSON participant roster.
    #[serde(default)]
    pub participants: Option<String>,
    /// Variables bound before the start node runs.
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl FlowConfig {
    /// Load the participant roster, or an empty one if none is configured.
    pub fn load_participants(&self) -> Result<Vec<Participant>> {
        match self.participants.as_deref() {
            Some(path) => load_participants(Path::new(path)),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ParleyError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| ParleyError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolve the configured graph path, if any.
    pub fn graph_path(&self) -> Option<PathBuf> {
        self.flow
            .as_ref()
            .and_then(|f| f.graph.as_deref())
            .map(PathBuf::from)
    }
}

/// Read a participant roster (a JSON array of participant records).
pub fn load_participants(path: &Path) -> Result<Vec<Participant>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
