// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded schema migrations (refinery).
//!
//! SQL files under `migrations/` are compiled in with `embed_migrations!`;
//! applied versions are tracked in `refinery_schema_history`.

use fairway_core::FairwayError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), FairwayError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| FairwayError::store(format!("migration failed: {e}")))?;
    for migration in report.applied_migrations() {
        tracing::debug!(version = migration.version(), name = migration.name(), "applied migration");
    }
    Ok(())
}
