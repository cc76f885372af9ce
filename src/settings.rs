use crate::errors::{AppError, AppResult};
use serde::Serialize;
use std::collections::BTreeMap;

pub const KNOWN_SETTINGS: &[(&str, &str)] = &[
    ("api_debug", "0"),
    ("api_port", "3000"),
    ("api_host", "0.0.0.0"),
    ("api_app_server", "wsgiref"),
    ("cookie_key", ""),
    ("server_host", "127.0.0.1"),
    ("server_port", "3000"),
    ("server_ssl", "0"),
    ("server_anonymize", "1"),
    ("server_username", "admin"),
    ("server_password", ""),
    ("log_console", "1"),
    ("log_console_level", "info"),
    ("log_file", "0"),
    ("log_file_level", "info"),
    ("log_file_path", "/var/log/dofler.log"),
    ("web_images", "1"),
    ("web_accounts", "1"),
    ("web_stats", "1"),
    ("web_image_delay", "5"),
    ("web_account_delay", "5"),
    ("web_stat_delay", "30"),
    ("web_image_max", "20"),
    ("web_account_max", "20"),
    ("web_stat_max", "10"),
    ("web_display_settings", "1"),
    ("autostart", "1"),
    ("listen_interface", "eth0"),
];

const TRUTHY: &[&str] = &["true", "1", "yes"];

pub fn default_for(name: &str) -> &'static str {
    if let Some((_, value)) = KNOWN_SETTINGS.iter().find(|(key, _)| *key == name) {
        return value;
    }
    if name.ends_with("_enabled") {
        return "0";
    }
    ""
}

pub fn enabled_key(parser: &str) -> String {
    format!("{}_enabled", parser)
}

pub fn command_key(parser: &str) -> String {
    format!("{}_command", parser)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub name: String,
    pub stored: Option<String>,
    #[serde(skip)]
    pub default: &'static str,
}

impl Setting {
    pub fn new(name: &str, stored: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            stored,
            default: default_for(name),
        }
    }

    pub fn is_set(&self) -> bool {
        self.stored.is_some()
    }

    pub fn value(&self) -> &str {
        self.stored.as_deref().unwrap_or(self.default)
    }

    pub fn bool_value(&self) -> bool {
        let value = self.value().trim();
        TRUTHY
            .iter()
            .any(|truthy| value.eq_ignore_ascii_case(truthy))
    }

    pub fn int_value(&self) -> AppResult<i64> {
        self.value()
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::InvalidSettingType {
                name: self.name.clone(),
                value: self.value().to_string(),
            })
    }

    pub fn int_or_default(&self) -> i64 {
        match self.int_value() {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(setting = %self.name, error = %error, "falling back to default integer");
                self.default.trim().parse::<i64>().unwrap_or(0)
            }
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self, name: &str) -> AppResult<Setting>;

    // All pairs land or none do.
    fn write_batch(&self, pairs: &BTreeMap<String, String>) -> AppResult<()>;
}
