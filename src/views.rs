use crate::connection::ConnectionConfig;
use crate::errors::AppResult;
use crate::models::{UserRecord, WorkerStatus};
use crate::pipeline::PASSWORD_PLACEHOLDER;
use crate::settings::{command_key, enabled_key, SettingsStore};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MainView {
    pub auth: bool,
    pub web_images: bool,
    pub web_accounts: bool,
    pub web_stats: bool,
    pub web_image_delay: i64,
    pub web_account_delay: i64,
    pub web_stat_delay: i64,
    pub web_image_max: i64,
    pub web_account_max: i64,
    pub web_stat_max: i64,
    pub web_display_settings: bool,
}

impl MainView {
    pub fn load(store: &dyn SettingsStore, auth: bool) -> AppResult<Self> {
        Ok(Self {
            auth,
            web_images: store.get("web_images")?.bool_value(),
            web_accounts: store.get("web_accounts")?.bool_value(),
            web_stats: store.get("web_stats")?.bool_value(),
            web_image_delay: store.get("web_image_delay")?.int_or_default(),
            web_account_delay: store.get("web_account_delay")?.int_or_default(),
            web_stat_delay: store.get("web_stat_delay")?.int_or_default(),
            web_image_max: store.get("web_image_max")?.int_or_default(),
            web_account_max: store.get("web_account_max")?.int_or_default(),
            web_stat_max: store.get("web_stat_max")?.int_or_default(),
            web_display_settings: store.get("web_display_settings")?.bool_value(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApiView {
    pub auth: bool,
    pub api_debug: i64,
    pub api_port: String,
    pub api_host: String,
    pub api_app_server: String,
    pub cookie_key: String,
    pub database: Option<String>,
}

impl ApiView {
    pub fn load(store: &dyn SettingsStore, connection: &dyn ConnectionConfig, auth: bool) -> AppResult<Self> {
        let database = match connection.database() {
            Ok(database) => database,
            Err(error) => {
                tracing::warn!(error = %error, "cannot read database connection config");
                None
            }
        };
        Ok(Self {
            auth,
            api_debug: store.get("api_debug")?.int_or_default(),
            api_port: store.get("api_port")?.value().to_string(),
            api_host: store.get("api_host")?.value().to_string(),
            api_app_server: store.get("api_app_server")?.value().to_string(),
            cookie_key: store.get("cookie_key")?.value().to_string(),
            database,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerView {
    pub auth: bool,
    pub server_host: String,
    pub server_port: String,
    pub server_ssl: i64,
    pub server_anonymize: i64,
    pub server_username: String,
    pub server_password: Option<&'static str>,
}

impl ServerView {
    pub fn load(store: &dyn SettingsStore, auth: bool) -> AppResult<Self> {
        let password = store.get("server_password")?;
        Ok(Self {
            auth,
            server_host: store.get("server_host")?.value().to_string(),
            server_port: store.get("server_port")?.value().to_string(),
            server_ssl: store.get("server_ssl")?.int_or_default(),
            server_anonymize: store.get("server_anonymize")?.int_or_default(),
            server_username: store.get("server_username")?.value().to_string(),
            server_password: (!password.value().is_empty()).then_some(PASSWORD_PLACEHOLDER),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoggingView {
    pub auth: bool,
    pub log_console: i64,
    pub log_console_level: String,
    pub log_file: i64,
    pub log_file_level: String,
    pub log_file_path: String,
}

impl LoggingView {
    pub fn load(store: &dyn SettingsStore, auth: bool) -> AppResult<Self> {
        Ok(Self {
            auth,
            log_console: store.get("log_console")?.int_or_default(),
            log_console_level: store.get("log_console_level")?.value().to_string(),
            log_file: store.get("log_file")?.int_or_default(),
            log_file_level: store.get("log_file_level")?.value().to_string(),
            log_file_path: store.get("log_file_path")?.value().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WebUiView {
    pub auth: bool,
    pub web_images: bool,
    pub web_accounts: bool,
    pub web_stats: i64,
    pub web_image_delay: String,
    pub web_account_delay: String,
    pub web_stat_delay: String,
    pub web_stat_max: i64,
    pub web_display_settings: bool,
}

impl WebUiView {
    pub fn load(store: &dyn SettingsStore, auth: bool) -> AppResult<Self> {
        Ok(Self {
            auth,
            web_images: store.get("web_images")?.bool_value(),
            web_accounts: store.get("web_accounts")?.bool_value(),
            web_stats: store.get("web_stats")?.int_or_default(),
            web_image_delay: store.get("web_image_delay")?.value().to_string(),
            web_account_delay: store.get("web_account_delay")?.value().to_string(),
            web_stat_delay: store.get("web_stat_delay")?.value().to_string(),
            web_stat_max: store.get("web_stat_max")?.int_or_default(),
            web_display_settings: store.get("web_display_settings")?.bool_value(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParserSettings {
    pub enabled: bool,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ParsersView {
    pub auth: bool,
    pub parsers: BTreeMap<String, ParserSettings>,
    pub autostart: bool,
    pub listen_interface: String,
}

impl ParsersView {
    pub fn load<'a>(
        store: &dyn SettingsStore,
        parsers: impl IntoIterator<Item = &'a str>,
        auth: bool,
    ) -> AppResult<Self> {
        let mut rows = BTreeMap::new();
        for parser in parsers {
            rows.insert(
                parser.to_string(),
                ParserSettings {
                    enabled: store.get(&enabled_key(parser))?.bool_value(),
                    command: store.get(&command_key(parser))?.value().to_string(),
                },
            );
        }
        Ok(Self {
            auth,
            parsers: rows,
            autostart: store.get("autostart")?.bool_value(),
            listen_interface: store.get("listen_interface")?.value().to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServicesView {
    pub auth: bool,
    pub parsers: BTreeMap<String, WorkerStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UsersView {
    pub auth: bool,
    pub users: Vec<UserRecord>,
}
