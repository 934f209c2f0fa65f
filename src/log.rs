use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// One persisted submission. Because the field schema is caller-defined, the
/// per-field data is stored as a JSON blob rather than as fixed columns;
/// consumers parse the blob to enumerate fields, labels, and exclusions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub date: DateTime<Utc>,
    pub form_id: String,
    pub blog_id: i64,
    pub post_id: i64,
    pub ip: String,
    pub user_agent: String,
    pub user_id: i64,
    pub mail_to: String,
    pub mail_from: String,
    pub mail_subject: String,
    pub mail_body: String,
    pub mail_headers: String,
    pub field_data: String,
}

/// Retention policy for administrative log clean-up. Exactly one policy is
/// applied per action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retention {
    /// Delete every entry.
    All,
    /// Delete all except the N most recent entries.
    KeepRecent(u64),
    /// Delete entries older than N days.
    MaxAgeDays(i64),
}

/// Append-only submission store. Concurrent writers only ever append, so no
/// locking discipline beyond the store's own is required.
#[async_trait]
pub trait SubmissionLog: Send + Sync {
    async fn append(&self, record: &SubmissionRecord) -> Result<()>;

    /// Apply a retention policy and return the number of entries deleted.
    async fn clean(&self, policy: Retention) -> Result<u64>;
}

/// SQLite-backed store.
pub struct SqliteLog {
    conn: Mutex<Connection>,
}

impl SqliteLog {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open submission log: {db_path}"))?;

        Self::init_database(&conn)?;

        Ok(SqliteLog {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_database(&conn)?;

        Ok(SqliteLog {
            conn: Mutex::new(conn),
        })
    }

    fn init_database(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS submission_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                form_id TEXT NOT NULL,
                blog_id INTEGER NOT NULL DEFAULT 0,
                post_id INTEGER NOT NULL DEFAULT 0,
                ip TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT '',
                user_id INTEGER NOT NULL DEFAULT 0,
                mail_to TEXT NOT NULL DEFAULT '',
                mail_from TEXT NOT NULL DEFAULT '',
                mail_subject TEXT NOT NULL DEFAULT '',
                mail_body TEXT NOT NULL DEFAULT '',
                mail_headers TEXT NOT NULL DEFAULT '',
                field_data TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM submission_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[async_trait]
impl SubmissionLog for SqliteLog {
    async fn append(&self, record: &SubmissionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO submission_log (
                date, form_id, blog_id, post_id, ip, user_agent, user_id,
                mail_to, mail_from, mail_subject, mail_body, mail_headers, field_data
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.date.to_rfc3339(),
                record.form_id,
                record.blog_id,
                record.post_id,
                record.ip,
                record.user_agent,
                record.user_id,
                record.mail_to,
                record.mail_from,
                record.mail_subject,
                record.mail_body,
                record.mail_headers,
                record.field_data,
            ],
        )?;

        Ok(())
    }

    async fn clean(&self, policy: Retention) -> Result<u64> {
        let conn = self.conn.lock().unwrap();

        let deleted = match policy {
            Retention::All => conn.execute("DELETE FROM submission_log", [])?,
            Retention::KeepRecent(limit) => conn.execute(
                "DELETE FROM submission_log
                 WHERE id NOT IN
                     (SELECT id FROM
                         (SELECT id FROM submission_log
                             ORDER BY date DESC
                             LIMIT ?1) x)",
                params![limit as i64],
            )?,
            Retention::MaxAgeDays(days) => {
                let cutoff = Utc::now() - Duration::days(days);
                conn.execute(
                    "DELETE FROM submission_log WHERE date < ?1",
                    params![cutoff.to_rfc3339()],
                )?
            }
        };

        Ok(deleted as u64)
    }
}

/// In-memory store, for tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryLog {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog::default()
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionLog for MemoryLog {
    async fn append(&self, record: &SubmissionRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn clean(&self, policy: Retention) -> Result<u64> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();

        match policy {
            Retention::All => records.clear(),
            Retention::KeepRecent(limit) => {
                records.sort_by_key(|record| record.date);
                let keep = records.len().saturating_sub(limit as usize);
                records.drain(..keep);
            }
            Retention::MaxAgeDays(days) => {
                let cutoff = Utc::now() - Duration::days(days);
                records.retain(|record| record.date >= cutoff);
            }
        }

        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(form_id: &str, age_days: i64) -> SubmissionRecord {
        SubmissionRecord {
            date: Utc::now() - Duration::days(age_days),
            form_id: form_id.to_string(),
            blog_id: 0,
            post_id: 0,
            ip: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            user_id: 0,
            mail_to: "admin@example.com".to_string(),
            mail_from: "no-reply@example.com".to_string(),
            mail_subject: "Enquiry".to_string(),
            mail_body: "message: hello".to_string(),
            mail_headers: String::new(),
            field_data: "[]".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_append_and_count() {
        let store = SqliteLog::open_in_memory().unwrap();
        store.append(&record("contact", 0)).await.unwrap();
        store.append(&record("contact", 1)).await.unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_retention_keep_recent() {
        let store = SqliteLog::open_in_memory().unwrap();
        for age in 0..5 {
            store.append(&record("contact", age)).await.unwrap();
        }

        let deleted = store.clean(Retention::KeepRecent(2)).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_retention_max_age() {
        let store = SqliteLog::open_in_memory().unwrap();
        store.append(&record("contact", 0)).await.unwrap();
        store.append(&record("contact", 40)).await.unwrap();
        store.append(&record("contact", 400)).await.unwrap();

        let deleted = store.clean(Retention::MaxAgeDays(30)).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_retention_delete_all() {
        let store = SqliteLog::open_in_memory().unwrap();
        store.append(&record("contact", 0)).await.unwrap();
        store.append(&record("other", 0)).await.unwrap();

        assert_eq!(store.clean(Retention::All).await.unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_retention_policies() {
        let store = MemoryLog::new();
        for age in 0..4 {
            store.append(&record("contact", age * 100)).await.unwrap();
        }

        assert_eq!(store.clean(Retention::MaxAgeDays(150)).await.unwrap(), 2);
        assert_eq!(store.clean(Retention::KeepRecent(1)).await.unwrap(), 1);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.clean(Retention::All).await.unwrap(), 1);
    }
}
