use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("SETTINGS_PERSIST: {0}")]
    SettingsPersist(String),
    #[error("INVALID_SETTING_TYPE: {name} = {value:?} is not an integer")]
    InvalidSettingType { name: String, value: String },
    #[error("PROCESS_LAUNCH: {name}: {reason}")]
    ProcessLaunch { name: String, reason: String },
    #[error("PROCESS_STOP: {name}: {reason}")]
    ProcessStop { name: String, reason: String },
    #[error("UNKNOWN_WORKER: {0}")]
    UnknownWorker(String),
    #[error("DUPLICATE_USER: {0}")]
    DuplicateUser(String),
    #[error("USER_NOT_FOUND: {0}")]
    UserNotFound(String),
    #[error("PROTECTED_USER: {0} cannot be removed")]
    ProtectedUser(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn launch(name: &str, reason: impl Into<String>) -> Self {
        Self::ProcessLaunch {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
