use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

const SECONDS_PER_HOUR: i64 = 3600;

// `url` is the only unique column, so REPLACE overwrites a re-ingested episode.
const UPSERT_SQL: &str = "REPLACE INTO podcasts (podcast, title, ep_title, url, timestamp)
     VALUES (?1, ?2, ?3, ?4, ?5)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRecord {
    pub podcast: String,
    pub feed_title: String,
    pub episode_title: String,
    pub url: String,
    pub published_at: i64,
}

impl EpisodeRecord {
    /// Whole hours elapsed between publication and `now` (unix seconds).
    pub fn age_hours(&self, now: i64) -> i64 {
        (now - self.published_at) / SECONDS_PER_HOUR
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open catalog at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .with_context(|| format!("failed to enable WAL on catalog {}", path.display()))?;
        let db = Self { conn };
        db.migrate()
            .with_context(|| format!("failed to prepare catalog at {}", path.display()))?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                podcast TEXT NOT NULL,
                title TEXT NOT NULL,
                ep_title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_podcasts_recency ON podcasts(podcast, timestamp DESC);
            "#,
        )?;
        Ok(())
    }

    /// Writes the record, replacing any row that already holds the same url.
    pub fn upsert(&self, record: &EpisodeRecord) -> Result<()> {
        self.conn.execute(
            UPSERT_SQL,
            params![
                record.podcast,
                record.feed_title,
                record.episode_title,
                record.url,
                record.published_at
            ],
        )?;
        Ok(())
    }

    /// Upserts a batch inside one transaction so readers never see half a feed.
    pub fn upsert_all(&self, records: &[EpisodeRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for record in records {
            tx.execute(
                UPSERT_SQL,
                params![
                    record.podcast,
                    record.feed_title,
                    record.episode_title,
                    record.url,
                    record.published_at
                ],
            )?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Episode of `podcast` at rank `offset` counting back from the newest.
    pub fn latest(&self, podcast: &str, offset: u32) -> Result<Option<EpisodeRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT podcast, title, ep_title, url, timestamp FROM podcasts
                 WHERE podcast = ?1 ORDER BY timestamp DESC LIMIT 1 OFFSET ?2",
                params![podcast, offset],
                |row| {
                    Ok(EpisodeRecord {
                        podcast: row.get(0)?,
                        feed_title: row.get(1)?,
                        episode_title: row.get(2)?,
                        url: row.get(3)?,
                        published_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn episodes(&self, podcast: &str) -> Result<Vec<EpisodeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT podcast, title, ep_title, url, timestamp FROM podcasts
             WHERE podcast = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![podcast], |row| {
            Ok(EpisodeRecord {
                podcast: row.get(0)?,
                feed_title: row.get(1)?,
                episode_title: row.get(2)?,
                url: row.get(3)?,
                published_at: row.get(4)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM podcasts", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
