// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite connection management for the local cache.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread. `Database` wraps the one connection; do not open a second one for
//! writes.

use std::fmt::Display;
use std::path::Path;

use fairway_core::FairwayError;
use tracing::debug;

use crate::migrations;

pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) a database file, enable WAL and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FairwayError> {
        let path = path.as_ref();
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| FairwayError::store(format!("open {}: {e}", path.display())))?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await
        .map_err(map_call_err)?;
        let db = Self { conn };
        db.migrate().await?;
        debug!(path = %path.display(), "local cache opened");
        Ok(db)
    }

    /// Private in-memory database, gone when dropped.
    pub async fn open_in_memory() -> Result<Self, FairwayError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| FairwayError::store(format!("open in-memory cache: {e}")))?;
        let db = Self { conn };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), FairwayError> {
        self.conn
            .call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(map_call_err)
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL and close the connection.
    pub async fn close(self) -> Result<(), FairwayError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            })
            .await
            .map_err(map_call_err)?;
        self.conn
            .close()
            .await
            .map_err(|e| FairwayError::store(format!("close local cache: {e}")))
    }
}

/// Map a tokio-rusqlite call error into the engine error type.
pub(crate) fn map_call_err<E: Display>(err: tokio_rusqlite::Error<E>) -> FairwayError {
    match err {
        tokio_rusqlite::Error::Error(inner) => FairwayError::store(format!("local cache: {inner}")),
        other => FairwayError::store(format!("local cache: {other}")),
    }
}
