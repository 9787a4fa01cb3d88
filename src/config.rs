//! Process settings read from the environment
//!
//! A `.env` file in the working directory is loaded first when present.

use std::path::PathBuf;

use thiserror::Error;

use crate::security::DEFAULT_SWEEP_INTERVAL_SECS;

pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const DATA_DIR_VAR: &str = "BASTION_DATA_DIR";
pub const SWEEP_INTERVAL_VAR: &str = "BASTION_SWEEP_INTERVAL_SECS";
pub const LOG_DIR_VAR: &str = "BASTION_LOG_DIR";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Startup configuration problems. These are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} must be a positive whole number of seconds, got `{value}`")]
    InvalidInterval { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub token: String,
    /// Directory holding `security_policies.yaml`
    pub data_dir: PathBuf,
    pub sweep_interval_secs: u64,
    pub log_dir: PathBuf,
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment
    ///
    /// # Errors
    /// Returns `SettingsError` when the token is missing or the sweep interval
    /// is not a positive number.
    pub fn from_env() -> Result<Self, SettingsError> {
        // A missing .env file is fine, the variables may come from the shell
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup
    ///
    /// # Errors
    /// See [`Settings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let token = lookup(TOKEN_VAR)
            .filter(|token| !token.trim().is_empty())
            .ok_or(SettingsError::Missing(TOKEN_VAR))?;

        let sweep_interval_secs = match lookup(SWEEP_INTERVAL_VAR) {
            None => DEFAULT_SWEEP_INTERVAL_SECS,
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(SettingsError::InvalidInterval {
                    var: SWEEP_INTERVAL_VAR,
                    value,
                })?,
        };

        Ok(Self {
            token,
            data_dir: lookup(DATA_DIR_VAR).map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from),
            sweep_interval_secs,
            log_dir: lookup(LOG_DIR_VAR).map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from),
        })
    }
}
