use crate::error::ConfigError;
use crate::recalc::{DEFAULT_MAX_PASSES, RecalcMode, Recalculator};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime settings shared by the CLI and the server.
///
/// Values come from a JSON file, from `BUDGET_*` environment variables, or
/// both (environment wins). Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory holding the local key-value store and the user database.
    pub data_dir: PathBuf,
    /// Prefix of every local storage key.
    pub scope: String,
    pub recalc_mode: RecalcMode,
    pub max_passes: usize,
    /// Base URL of a remote row-store server.
    pub remote_url: Option<String>,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("database"),
            scope: "user".to_string(),
            recalc_mode: RecalcMode::default(),
            max_passes: DEFAULT_MAX_PASSES,
            remote_url: None,
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Config::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `BUDGET_*` overrides from any lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup("BUDGET_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(scope) = lookup("BUDGET_SCOPE") {
            self.scope = scope;
        }
        if let Some(mode) = lookup("BUDGET_RECALC_MODE") {
            self.recalc_mode = match mode.to_lowercase().as_str() {
                "dependency" => RecalcMode::Dependency,
                "iterative" => RecalcMode::Iterative,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "BUDGET_RECALC_MODE",
                        value: mode,
                    });
                }
            };
        }
        if let Some(passes) = lookup("BUDGET_MAX_PASSES") {
            self.max_passes = match passes.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "BUDGET_MAX_PASSES",
                        value: passes,
                    });
                }
            };
        }
        if let Some(url) = lookup("BUDGET_REMOTE_URL") {
            self.remote_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(addr) = lookup("BUDGET_BIND_ADDR") {
            self.bind_addr = addr;
        }
        Ok(self)
    }

    pub fn recalculator(&self) -> Recalculator {
        Recalculator::new(self.recalc_mode, self.max_passes)
    }
}
