// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database handle: PRAGMA setup, migrations and shutdown.
//!
//! All statements run on tokio-rusqlite's single background thread, which
//! serializes writes.

use std::path::Path;

use capstan_config::model::StorageConfig;
use capstan_core::CapstanError;
use tracing::{debug, info};

use crate::migrations;

/// Handle to the Capstan SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database described by `config`.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, CapstanError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    /// Opens a file database in WAL mode.
    pub async fn open(path: &str) -> Result<Self, CapstanError> {
        Self::open_with(path, true).await
    }

    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, CapstanError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(CapstanError::storage)?;
        }
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(CapstanError::storage)?;
        let db = Self::initialize(conn, wal_mode).await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// A private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, CapstanError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(CapstanError::storage)?;
        Self::initialize(conn, false).await
    }

    async fn initialize(
        conn: tokio_rusqlite::Connection,
        wal_mode: bool,
    ) -> Result<Self, CapstanError> {
        conn.call(move |conn| -> Result<(), CapstanError> {
            let journal = if wal_mode { "WAL" } else { "DELETE" };
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = {journal};
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;"
            ))
            .map_err(CapstanError::storage)?;
            migrations::run_migrations(conn)
        })
        .await
        .map_err(|e| match e {
            tokio_rusqlite::Error::Error(inner) => inner,
            other => CapstanError::storage(other),
        })?;
        debug!("migrations applied");
        Ok(Self { conn })
    }

    /// The underlying connection, for query modules.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoints the WAL so the database file is self-contained.
    pub async fn close(&self) -> Result<(), CapstanError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Maps a tokio-rusqlite error into [`CapstanError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> CapstanError {
    CapstanError::Storage {
        source: Box::new(e),
    }
}

/// Reads a JSON text column into `T`.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Reads a nullable JSON text column into `Option<T>`.
pub(crate) fn json_column_opt<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Reads a text column holding a strum-parsed enum.
pub(crate) fn enum_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Serializes a value for a JSON text column.
pub(crate) fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, CapstanError> {
    serde_json::to_string(value).map_err(|e| CapstanError::Internal(e.to_string()))
}
