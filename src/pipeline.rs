use crate::connection::{ConnectionConfig, DATABASE_KEY};
use crate::errors::AppResult;
use crate::logging::{LogSettings, LogSinks};
use crate::models::ApplyReport;
use crate::settings::SettingsStore;
use crate::supervisor::Supervisor;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PASSWORD_PLACEHOLDER: &str = "1234567890";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Forward,
    Drop,
    Persist,
}

pub struct UpdateRule {
    pub key: &'static str,
    pub decide: fn(&str) -> Disposition,
}

fn forward_database(_value: &str) -> Disposition {
    Disposition::Forward
}

fn skip_password_placeholder(value: &str) -> Disposition {
    if value == PASSWORD_PLACEHOLDER {
        Disposition::Drop
    } else {
        Disposition::Persist
    }
}

pub const UPDATE_RULES: &[UpdateRule] = &[
    UpdateRule {
        key: DATABASE_KEY,
        decide: forward_database,
    },
    UpdateRule {
        key: "server_password",
        decide: skip_password_placeholder,
    },
];

pub fn disposition(key: &str, value: &str) -> Disposition {
    UPDATE_RULES
        .iter()
        .find(|rule| rule.key == key)
        .map_or(Disposition::Persist, |rule| (rule.decide)(value))
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub persist: BTreeMap<String, String>,
    pub dropped: Vec<String>,
    pub database: Option<String>,
}

pub fn partition(raw: &BTreeMap<String, String>) -> Partition {
    let mut result = Partition::default();
    for (key, value) in raw {
        match disposition(key, value) {
            Disposition::Forward => result.database = Some(value.clone()),
            Disposition::Drop => result.dropped.push(key.clone()),
            Disposition::Persist => {
                result.persist.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

pub struct SettingsPipeline {
    store: Arc<dyn SettingsStore>,
    connection: Arc<dyn ConnectionConfig>,
    logs: Arc<LogSinks>,
    supervisor: Arc<Supervisor>,
}

impl SettingsPipeline {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        connection: Arc<dyn ConnectionConfig>,
        logs: Arc<LogSinks>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self {
            store,
            connection,
            logs,
            supervisor,
        }
    }

    pub async fn apply(&self, raw: &BTreeMap<String, String>) -> AppResult<ApplyReport> {
        let Partition {
            persist,
            dropped,
            database,
        } = partition(raw);

        self.store.write_batch(&persist)?;
        tracing::info!(keys = persist.len(), dropped = dropped.len(), "settings batch persisted");

        let mut database_forwarded = false;
        let mut database_error = None;
        if let Some(database) = database {
            match self.connection.update(&database) {
                Ok(()) => database_forwarded = true,
                Err(error) => {
                    tracing::warn!(error = %error, "database connection not updated");
                    database_error = Some(error.to_string());
                }
            }
        }

        self.refresh_logging();
        let autostart = self.supervisor.autostart().await;

        Ok(ApplyReport {
            persisted: persist.into_keys().collect(),
            dropped,
            database_forwarded,
            database_error,
            autostart,
        })
    }

    pub fn refresh_logging(&self) {
        let settings = match LogSettings::from_store(self.store.as_ref()) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "cannot read logging settings");
                return;
            }
        };
        if let Err(error) = self.logs.reconfigure(&settings) {
            tracing::warn!(error = %error, "log sinks only partially reconfigured");
        }
    }
}
