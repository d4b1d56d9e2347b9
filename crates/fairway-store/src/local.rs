// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device-local persistence for read cursors and backfill watermarks.
//!
//! Both tables only ever move forward: an upsert keeps the larger of the
//! stored and offered timestamp and returns the value that won.

use std::collections::HashMap;
use std::path::Path;

use chrono::DateTime;
use fairway_core::{ConversationId, FairwayError, Timestamp, UserId};
use rusqlite::params;
use tracing::warn;

use crate::database::{Database, map_call_err};

pub struct LocalCache {
    db: Database,
}

impl LocalCache {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FairwayError> {
        Ok(Self {
            db: Database::open(path).await?,
        })
    }

    pub async fn open_in_memory() -> Result<Self, FairwayError> {
        Ok(Self {
            db: Database::open_in_memory().await?,
        })
    }

    pub async fn load_cursors(
        &self,
        user: &UserId,
    ) -> Result<HashMap<ConversationId, Timestamp>, FairwayError> {
        let user = user.to_string();
        let rows = self
            .db
            .connection()
            .call(move |conn| -> Result<Vec<(String, i64)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT conversation_id, last_read_us FROM read_cursors WHERE user_id = ?1",
                )?;
                let rows = stmt.query_map(params![user], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await
            .map_err(map_call_err)?;
        Ok(decode(rows))
    }

    /// Persist a cursor. Returns the stored value, which is never older than before.
    pub async fn save_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<Timestamp, FairwayError> {
        let user = user.to_string();
        let conversation = conversation.to_string();
        let micros = at.timestamp_micros();
        let stored = self
            .db
            .connection()
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "INSERT INTO read_cursors (user_id, conversation_id, last_read_us)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (user_id, conversation_id) DO UPDATE SET
                         last_read_us = MAX(last_read_us, excluded.last_read_us),
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     RETURNING last_read_us",
                    params![user, conversation, micros],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_call_err)?;
        Ok(DateTime::from_timestamp_micros(stored).unwrap_or(at))
    }

    pub async fn load_watermarks(&self) -> Result<HashMap<ConversationId, Timestamp>, FairwayError> {
        let rows = self
            .db
            .connection()
            .call(|conn| -> Result<Vec<(String, i64)>, rusqlite::Error> {
                let mut stmt =
                    conn.prepare("SELECT conversation_id, newest_seen_us FROM watermarks")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await
            .map_err(map_call_err)?;
        Ok(decode(rows))
    }

    pub async fn save_watermark(
        &self,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), FairwayError> {
        let conversation = conversation.to_string();
        let micros = at.timestamp_micros();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO watermarks (conversation_id, newest_seen_us) VALUES (?1, ?2)
                     ON CONFLICT (conversation_id) DO UPDATE SET
                         newest_seen_us = MAX(newest_seen_us, excluded.newest_seen_us)",
                    params![conversation, micros],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
    }

    /// Drop everything stored for a conversation the user left.
    pub async fn forget(&self, conversation: &ConversationId) -> Result<(), FairwayError> {
        let conversation = conversation.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM read_cursors WHERE conversation_id = ?1",
                    params![conversation],
                )?;
                tx.execute(
                    "DELETE FROM watermarks WHERE conversation_id = ?1",
                    params![conversation],
                )?;
                tx.commit()
            })
            .await
            .map_err(map_call_err)
    }

    pub async fn close(self) -> Result<(), FairwayError> {
        self.db.close().await
    }
}

fn decode(rows: Vec<(String, i64)>) -> HashMap<ConversationId, Timestamp> {
    rows.into_iter()
        .filter_map(|(id, micros)| match DateTime::from_timestamp_micros(micros) {
            Some(at) => Some((ConversationId::from(id), at)),
            None => {
                warn!(conversation = %id, micros, "skipping out-of-range timestamp");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn cursors_never_move_backwards() {
        let cache = LocalCache::open_in_memory().await.unwrap();
        let user = UserId::from("alice");
        let room = ConversationId::from("room-1");

        assert_eq!(cache.save_cursor(&user, &room, ts(20)).await.unwrap(), ts(20));
        assert_eq!(cache.save_cursor(&user, &room, ts(10)).await.unwrap(), ts(20));
        assert_eq!(cache.save_cursor(&user, &room, ts(30)).await.unwrap(), ts(30));

        let cursors = cache.load_cursors(&user).await.unwrap();
        assert_eq!(cursors.get(&room), Some(&ts(30)));
        assert!(cache.load_cursors(&UserId::from("bob")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watermarks_keep_the_newest() {
        let cache = LocalCache::open_in_memory().await.unwrap();
        let room = ConversationId::from("room-1");
        cache.save_watermark(&room, ts(50)).await.unwrap();
        cache.save_watermark(&room, ts(40)).await.unwrap();
        assert_eq!(cache.load_watermarks().await.unwrap().get(&room), Some(&ts(50)));

        cache.forget(&room).await.unwrap();
        assert!(cache.load_watermarks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fairway-cache.db");
        let user = UserId::from("alice");
        let room = ConversationId::from("room-1");

        let cache = LocalCache::open(&path).await.unwrap();
        cache.save_cursor(&user, &room, ts(99)).await.unwrap();
        cache.close().await.unwrap();

        let reopened = LocalCache::open(&path).await.unwrap();
        assert_eq!(
            reopened.load_cursors(&user).await.unwrap().get(&room),
            Some(&ts(99))
        );
    }
}
