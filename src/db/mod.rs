use crate::errors::{AppError, AppResult};
use crate::models::UserRecord;
use crate::settings::{command_key, enabled_key, Setting, SettingsStore, KNOWN_SETTINGS};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn setting(&self, name: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM settings WHERE name = ?1", [name], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn write_settings(&self, pairs: &BTreeMap<String, String>) -> AppResult<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| AppError::SettingsPersist("database mutex poisoned".to_string()))?;
        let now = Utc::now().to_rfc3339();
        let persist = |err: rusqlite::Error| AppError::SettingsPersist(err.to_string());

        // Dropping the transaction without commit rolls every statement back.
        let tx = conn.transaction().map_err(persist)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                )
                .map_err(persist)?;
            for (name, value) in pairs {
                stmt.execute(params![name, value, now]).map_err(persist)?;
            }
        }
        tx.commit().map_err(persist)?;
        Ok(())
    }

    pub fn ensure_parser_settings(&self, parsers: &[String]) -> AppResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        for parser in parsers {
            for (name, value) in [(enabled_key(parser), "0"), (command_key(parser), "")] {
                conn.execute(
                    "INSERT OR IGNORE INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)",
                    params![name, value, now],
                )?;
            }
        }
        Ok(())
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        for (name, value) in KNOWN_SETTINGS {
            if value.is_empty() {
                continue;
            }
            conn.execute(
                "INSERT OR IGNORE INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)",
                params![name, value, now],
            )?;
        }
        conn.execute(
            "INSERT OR IGNORE INTO settings (name, value, updated_at) VALUES ('cookie_key', ?1, ?2)",
            params![Uuid::new_v4().simple().to_string(), now],
        )?;
        Ok(())
    }

    pub fn insert_user(&self, name: &str, password_hash: &str) -> AppResult<UserRecord> {
        let conn = self.lock()?;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (name, password_hash, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![name, password_hash, now.to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(AppError::DuplicateUser(name.to_string()));
        }
        Ok(UserRecord {
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_user_password(&self, name: &str, password_hash: &str) -> AppResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE name = ?3",
            params![password_hash, Utc::now().to_rfc3339(), name],
        )?;
        if updated == 0 {
            return Err(AppError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn delete_user(&self, name: &str) -> AppResult<()> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM users WHERE name = ?1", [name])?;
        if deleted == 0 {
            return Err(AppError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn user_password_hash(&self, name: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let hash = conn
            .query_row("SELECT password_hash FROM users WHERE name = ?1", [name], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(hash)
    }

    pub fn count_users(&self) -> AppResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(1) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn list_users(&self) -> AppResult<Vec<UserRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name, created_at, updated_at FROM users ORDER BY name")?;
        let rows = stmt.query_map([], parse_user_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

impl SettingsStore for Database {
    fn get(&self, name: &str) -> AppResult<Setting> {
        Ok(Setting::new(name, self.setting(name)?))
    }

    fn write_batch(&self, pairs: &BTreeMap<String, String>) -> AppResult<()> {
        self.write_settings(pairs)
    }
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        name: row.get(0)?,
        created_at: parse_time(&row.get::<_, String>(1)?)?,
        updated_at: parse_time(&row.get::<_, String>(2)?)?,
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
}
