use std::fmt::Display;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use backbar_core::{BackbarError, KeyValueStore};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS kv_entries (
  key TEXT PRIMARY KEY CHECK (length(key) > 0),
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

/// [`KeyValueStore`] backed by a single `SQLite` table.
#[derive(Debug)]
pub struct SqliteKvStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub entry_count: u64,
    pub schema_status: SchemaStatus,
}

impl SqliteKvStore {
    /// Open a SQLite-backed key/value store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn })
    }

    /// Open `path` and bring it to the latest schema.
    ///
    /// # Errors
    /// Returns an error when opening or migrating fails.
    pub fn open_migrated(path: &Path) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the database was
    /// written by a newer schema.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            if table_exists(&self.conn, "kv_entries")? {
                tracing::warn!("kv_entries exists without a migration record; recording version 1");
                record_schema_version(&self.conn, 1)?;
            } else {
                apply_migration_1(&mut self.conn)?;
            }
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the parent directory cannot be created or the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))?;
        tracing::info!(path = %out_file.display(), "database backup written");
        Ok(())
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        let entry_count = if table_exists(&self.conn, "kv_entries")? {
            let count = self
                .conn
                .query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get::<_, i64>(0))
                .context("failed to count kv_entries")?;
            u64::try_from(count).context("kv_entries count is negative")?
        } else {
            0
        };

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            entry_count,
            schema_status,
        })
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackbarError> {
        self.conn
            .query_row("SELECT value FROM kv_entries WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|err| storage_error(format!("failed to read {key}"), err))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackbarError> {
        let now = now_rfc3339().map_err(|err| storage_error("failed to stamp entry", err))?;
        self.conn
            .execute(
                "INSERT INTO kv_entries(key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(|err| storage_error(format!("failed to write {key}"), err))?;
        tracing::trace!(key, bytes = value.len(), "kv entry written");
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), BackbarError> {
        self.conn
            .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .map_err(|err| storage_error(format!("failed to delete {key}"), err))?;
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, BackbarError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv_entries ORDER BY key ASC")
            .map_err(|err| storage_error("failed to prepare key listing", err))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|err| storage_error("failed to list keys", err))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|err| storage_error("failed to read key row", err))?);
        }
        Ok(keys)
    }
}

fn storage_error(context: impl Display, err: impl Display) -> BackbarError {
    BackbarError::Storage(format!("{context}: {err}"))
}

fn apply_migration_1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction().context("failed to begin migration 1")?;
    tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
    record_schema_version(&tx, 1)?;
    tx.commit().context("failed to commit migration 1")?;
    tracing::info!(version = 1, "applied schema migration");
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
