// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store backends for the Fairway sync engine.
//!
//! - [`MemoryStore`]: a [`MessageStore`](fairway_core::MessageStore) held in
//!   memory, with working push channels.
//! - [`LocalCache`]: SQLite-backed device cache for read cursors and
//!   backfill watermarks, with embedded migrations and a single-writer
//!   connection via `tokio-rusqlite`.

pub mod database;
pub mod local;
pub mod memory;
pub mod migrations;

pub use database::Database;
pub use local::LocalCache;
pub use memory::MemoryStore;
