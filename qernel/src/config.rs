#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use miette::{Diagnostic, IntoDiagnostic};
use qernel_core::LowerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "qernel.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("config error in {}: {message}", path.display())]
#[diagnostic(code(qernel::config))]
pub struct ConfigError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Contents of `qernel.toml`. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QernelConfig {
    pub lowering: LowerConfig,
    pub log: LogSettings,
}

impl QernelConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Load `explicit`, or `./qernel.toml` when present, or the defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> miette::Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let local = PathBuf::from(CONFIG_FILE);
                if !local.is_file() {
                    return Ok(Self::default());
                }
                local
            }
        };
        let text = fs::read_to_string(&path).into_diagnostic()?;
        Ok(Self::parse(&path, &text)?)
    }

    pub fn to_toml(&self) -> miette::Result<String> {
        toml::to_string_pretty(self).into_diagnostic()
    }
}
