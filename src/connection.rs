use crate::errors::{AppError, AppResult};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DATABASE_KEY: &str = "database";

pub trait ConnectionConfig: Send + Sync {
    fn update(&self, database: &str) -> AppResult<()>;
    fn database(&self) -> AppResult<Option<String>>;
}

#[derive(Debug)]
pub struct FileConnectionConfig {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConnectionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_mapping(&self) -> AppResult<Mapping> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Mapping::new()),
            Err(err) => return Err(AppError::Io(err.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(Mapping::new());
        }
        match serde_yaml::from_str::<Value>(&raw)? {
            Value::Mapping(mapping) => Ok(mapping),
            Value::Null => Ok(Mapping::new()),
            _ => Err(AppError::Config(format!(
                "{} must contain a mapping",
                self.path.display()
            ))),
        }
    }
}

impl ConnectionConfig for FileConnectionConfig {
    fn update(&self, database: &str) -> AppResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Internal("connection config mutex poisoned".to_string()))?;

        let mut mapping = self.read_mapping()?;
        mapping.insert(
            Value::String(DATABASE_KEY.to_string()),
            Value::String(database.to_string()),
        );
        let rendered = serde_yaml::to_string(&Value::Mapping(mapping))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("yaml.tmp");
        std::fs::write(&staging, rendered)?;
        std::fs::rename(&staging, &self.path)?;

        tracing::info!(path = %self.path.display(), "database connection updated; takes effect on restart");
        Ok(())
    }

    fn database(&self) -> AppResult<Option<String>> {
        let mapping = self.read_mapping()?;
        Ok(mapping
            .get(DATABASE_KEY)
            .and_then(Value::as_str)
            .map(ToString::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionConfig, FileConnectionConfig};
    use crate::config::ConsoleConfig;

    #[test]
    fn update_preserves_other_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("console.yaml");
        std::fs::write(&path, "parsers: [tshark]\nstop_grace_ms: 250\n").expect("write");

        let connection = FileConnectionConfig::new(&path);
        assert!(connection.database().expect("read").is_none());
        connection.update("/srv/dofler/alt.sqlite").expect("update");

        assert_eq!(
            connection.database().expect("read").as_deref(),
            Some("/srv/dofler/alt.sqlite")
        );
        let config = ConsoleConfig::load(&path).expect("reload");
        assert_eq!(config.parsers, vec!["tshark".to_string()]);
        assert_eq!(config.stop_grace_ms, 250);
        assert_eq!(config.database.to_string_lossy(), "/srv/dofler/alt.sqlite");
    }

    #[test]
    fn update_creates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connection = FileConnectionConfig::new(dir.path().join("etc/console.yaml"));
        connection.update("db.sqlite").expect("update");
        assert_eq!(connection.database().expect("read").as_deref(), Some("db.sqlite"));
    }
}
