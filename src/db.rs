//! Database operations for the raw staging tables
//!
//! Messages are keyed by (channel_name, message_id) and inserted with
//! `ON CONFLICT DO NOTHING`, so replaying a batch never duplicates rows.
//! Detections have no key and are appended on every load.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::records::{DetectionRecord, MessageRecord};

/// Database handle for SQLite operations
pub struct Database {
    conn: Connection,
}

/// Rows written by one batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchInsert {
    pub attempted: usize,
    pub inserted: usize,
}

impl Database {
    /// Create new database connection
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the staging tables if they do not exist yet
    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS telegram_messages (
                channel_name    TEXT NOT NULL,
                message_id      INTEGER NOT NULL,
                message_date    TEXT NOT NULL,       -- ISO-8601, UTC
                message_text    TEXT,
                has_media       BOOLEAN,
                image_path      TEXT,                -- Set only when the photo was downloaded
                views           INTEGER,
                forwards        INTEGER,
                loaded_at       DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (channel_name, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_date ON telegram_messages(message_date);

            -- Append-only, reloading the same file duplicates rows
            CREATE TABLE IF NOT EXISTS yolo_detections (
                image_path      TEXT,
                channel_name    TEXT,
                message_id      INTEGER,
                category        TEXT,
                max_confidence  REAL,
                detections      TEXT,
                processed_at    TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_detections_message
                ON yolo_detections(channel_name, message_id);
            "#,
        )?;

        Ok(())
    }

    /// Insert one batch of messages in a single transaction.
    ///
    /// Rows whose key already exists are skipped. Any error rolls the whole
    /// batch back.
    pub fn insert_message_batch(&self, batch: &[MessageRecord]) -> Result<BatchInsert> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO telegram_messages (
                    channel_name, message_id, message_date, message_text,
                    has_media, image_path, views, forwards
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (channel_name, message_id) DO NOTHING
                "#,
            )?;

            for msg in batch {
                inserted += stmt.execute(params![
                    msg.channel_name,
                    msg.message_id,
                    msg.message_date,
                    msg.message_text,
                    msg.has_media,
                    msg.image_path,
                    msg.views,
                    msg.forwards,
                ])?;
            }
        }

        tx.commit()?;

        Ok(BatchInsert {
            attempted: batch.len(),
            inserted,
        })
    }

    /// Append detection rows in a single transaction.
    pub fn insert_detection_batch(&self, batch: &[DetectionRecord]) -> Result<BatchInsert> {
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO yolo_detections (
                    image_path, channel_name, message_id, category,
                    max_confidence, detections, processed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for det in batch {
                stmt.execute(params![
                    det.image_path,
                    det.channel_name,
                    det.message_id,
                    det.category,
                    det.max_confidence,
                    det.detections,
                    det.processed_at,
                ])?;
            }
        }

        tx.commit()?;

        Ok(BatchInsert {
            attempted: batch.len(),
            inserted: batch.len(),
        })
    }

    pub fn count_messages(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM telegram_messages", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_detections(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM yolo_detections", [], |row| row.get(0))?;
        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn message_exists(&self, channel: &str, message_id: i64) -> Result<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM telegram_messages WHERE channel_name = ?1 AND message_id = ?2",
            params![channel, message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_message(&self, channel: &str, message_id: i64) -> Result<Option<MessageRecord>> {
        let result = self.conn.query_row(
            "SELECT channel_name, message_id, message_date, message_text,
                    has_media, image_path, views, forwards
             FROM telegram_messages WHERE channel_name = ?1 AND message_id = ?2",
            params![channel, message_id],
            |row| {
                Ok(MessageRecord {
                    channel_name: row.get(0)?,
                    message_id: row.get(1)?,
                    message_date: row.get(2)?,
                    message_text: row.get(3)?,
                    has_media: row.get(4)?,
                    image_path: row.get(5)?,
                    views: row.get(6)?,
                    forwards: row.get(7)?,
                })
            },
        );

        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // === Coverage Analysis ===

    /// Per-channel load coverage
    pub fn coverage_by_channel(&self) -> Result<Vec<ChannelCoverage>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                channel_name,
                COUNT(*) as message_count,
                COUNT(CASE WHEN has_media THEN 1 END) as with_media,
                COUNT(CASE WHEN image_path IS NOT NULL THEN 1 END) as with_images,
                MIN(message_date) as oldest,
                MAX(message_date) as newest
            FROM telegram_messages
            GROUP BY channel_name
            ORDER BY channel_name
            "#,
        )?;

        let results = stmt.query_map([], |row| {
            Ok(ChannelCoverage {
                channel_name: row.get(0)?,
                message_count: row.get(1)?,
                with_media: row.get(2)?,
                with_images: row.get(3)?,
                oldest: row.get(4)?,
                newest: row.get(5)?,
            })
        })?;

        results.collect::<std::result::Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// Detection row counts per category
    pub fn detections_by_category(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM yolo_detections GROUP BY category ORDER BY category",
        )?;

        let results = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        results.collect::<std::result::Result<Vec<_>, _>>().map_err(|e| e.into())
    }
}

/// Coverage statistics for one channel
#[derive(Debug, Clone)]
pub struct ChannelCoverage {
    pub channel_name: String,
    pub message_count: i64,
    pub with_media: i64,
    pub with_images: i64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        db.run_migrations().unwrap();
        db
    }

    fn message(channel: &str, id: i64) -> MessageRecord {
        MessageRecord {
            channel_name: channel.to_string(),
            message_id: id,
            message_date: Utc.with_ymd_and_hms(2025, 1, 14, 9, 0, 0).unwrap(),
            message_text: Some(format!("post {}", id)),
            has_media: id % 2 == 0,
            image_path: None,
            views: Some(100),
            forwards: Some(1),
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = db();
        db.run_migrations().unwrap();
        assert_eq!(db.count_messages().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_keys_are_skipped() {
        let db = db();
        let batch: Vec<_> = (1..=5).map(|id| message("Y", id)).collect();

        let first = db.insert_message_batch(&batch).unwrap();
        assert_eq!(first, BatchInsert { attempted: 5, inserted: 5 });

        let second = db.insert_message_batch(&batch).unwrap();
        assert_eq!(second, BatchInsert { attempted: 5, inserted: 0 });
        assert_eq!(db.count_messages().unwrap(), 5);
    }

    #[test]
    fn test_existing_row_is_not_overwritten() {
        let db = db();
        db.insert_message_batch(&[message("Y", 1)]).unwrap();

        let mut revised = message("Y", 1);
        revised.views = Some(9999);
        revised.message_text = Some("edited".to_string());
        db.insert_message_batch(&[revised]).unwrap();

        let stored = db.get_message("Y", 1).unwrap().unwrap();
        assert_eq!(stored, message("Y", 1));
    }

    #[test]
    fn test_same_id_in_other_channel_is_distinct() {
        let db = db();
        db.insert_message_batch(&[message("Y", 1), message("Z", 1)]).unwrap();
        assert_eq!(db.count_messages().unwrap(), 2);
        assert!(db.message_exists("Z", 1).unwrap());
        assert!(!db.message_exists("Z", 2).unwrap());
    }

    #[test]
    fn test_detections_append() {
        let db = db();
        let det = DetectionRecord {
            image_path: "data/raw/images/Y/1.jpg".to_string(),
            channel_name: "Y".to_string(),
            message_id: 1,
            category: "lifestyle".to_string(),
            max_confidence: 0.8,
            detections: Some("person:0.80".to_string()),
            processed_at: Utc::now(),
        };

        db.insert_detection_batch(&[det.clone()]).unwrap();
        db.insert_detection_batch(&[det]).unwrap();
        assert_eq!(db.count_detections().unwrap(), 2);
        assert_eq!(
            db.detections_by_category().unwrap(),
            vec![("lifestyle".to_string(), 2)]
        );
    }

    #[test]
    fn test_coverage_by_channel() {
        let db = db();
        let mut with_image = message("Y", 2);
        with_image.image_path = Some("data/raw/images/Y/2.jpg".to_string());
        db.insert_message_batch(&[message("Y", 1), with_image, message("Z", 3)])
            .unwrap();

        let coverage = db.coverage_by_channel().unwrap();
        assert_eq!(coverage.len(), 2);
        assert_eq!(coverage[0].channel_name, "Y");
        assert_eq!(coverage[0].message_count, 2);
        assert_eq!(coverage[0].with_media, 1);
        assert_eq!(coverage[0].with_images, 1);
        assert_eq!(coverage[1].message_count, 1);
    }
}
