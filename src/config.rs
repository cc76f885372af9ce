use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "DOFLER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dofler/console.yaml";

static PARSER_NAME_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid parser name regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct ConsoleConfig {
    pub database: PathBuf,
    pub parsers: Vec<String>,
    pub stop_grace_ms: u64,
    pub kill_wait_ms: u64,
    pub admin_password: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("/var/lib/dofler/dofler.sqlite"),
            parsers: vec![
                "driftnet".to_string(),
                "ettercap".to_string(),
                "tshark".to_string(),
            ],
            stop_grace_ms: 1_500,
            kill_wait_ms: 2_000,
            admin_password: "dofler".to_string(),
        }
    }
}

impl ConsoleConfig {
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Self::default(),
            Ok(raw) => serde_yaml::from_str::<Self>(&raw)
                .map_err(|err| AppError::Config(format!("{}: {}", path.display(), err)))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(err) => return Err(AppError::Io(err.to_string())),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut seen = BTreeSet::new();
        for parser in &self.parsers {
            if !PARSER_NAME_RE.is_match(parser) {
                return Err(AppError::Config(format!(
                    "parser name '{}' contains invalid characters",
                    parser
                )));
            }
            if !seen.insert(parser.as_str()) {
                return Err(AppError::Config(format!("parser '{}' is listed twice", parser)));
            }
        }
        Ok(())
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            grace: Duration::from_millis(self.stop_grace_ms),
            kill_wait: Duration::from_millis(self.kill_wait_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub grace: Duration,
    pub kill_wait: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        ConsoleConfig::default().stop_policy()
    }
}
