//! libSQL backend: async `StatusStore` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::StatusStore;
use crate::unsubscribe::types::{
    MessageMetadata, OutcomeRecord, UnsubscribeMethod, UnsubscribeStatus,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const OUTCOME_COLUMNS: &str = "message_id, status, method, url, error, completed_at, attempts, updated_at";

/// Map a libsql Row to an OutcomeRecord.
///
/// Column order matches OUTCOME_COLUMNS.
fn row_to_outcome(row: &libsql::Row) -> Result<OutcomeRecord, libsql::Error> {
    let status_str: String = row.get(1)?;
    let method_str: String = row.get(2)?;
    let completed_str: Option<String> = row.get(5).ok();
    let attempts: i64 = row.get(6).unwrap_or(0);
    let updated_str: String = row.get(7)?;

    Ok(OutcomeRecord {
        message_id: row.get(0)?,
        status: UnsubscribeStatus::parse(&status_str),
        method: UnsubscribeMethod::parse(&method_str),
        url: row.get(3).ok(),
        error: row.get(4).ok(),
        completed_at: parse_optional_datetime(&completed_str),
        attempts: u32::try_from(attempts).unwrap_or(0),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl StatusStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn upsert_message(
        &self,
        message_id: &str,
        metadata: &MessageMetadata,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO messages (id, list_unsubscribe, list_unsubscribe_post, html_body, received_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    list_unsubscribe = excluded.list_unsubscribe,
                    list_unsubscribe_post = excluded.list_unsubscribe_post,
                    html_body = excluded.html_body,
                    updated_at = excluded.updated_at",
                params![
                    message_id,
                    opt_text(metadata.list_unsubscribe.as_deref()),
                    opt_text(metadata.list_unsubscribe_post.as_deref()),
                    opt_text(metadata.html_body.as_deref()),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_message: {e}")))?;

        debug!(message_id, "Message metadata stored");
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<MessageMetadata>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT list_unsubscribe, list_unsubscribe_post, html_body FROM messages WHERE id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(MessageMetadata {
                list_unsubscribe: row.get(0).ok(),
                list_unsubscribe_post: row.get(1).ok(),
                html_body: row.get(2).ok(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    // ── Outcomes ────────────────────────────────────────────────────

    async fn get_outcome(&self, message_id: &str) -> Result<Option<OutcomeRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {OUTCOME_COLUMNS} FROM unsubscribe_outcomes WHERE message_id = ?1"),
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_outcome: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_outcome(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_outcome: {e}"))),
        }
    }

    async fn get_outcomes(&self, message_ids: &[String]) -> Result<Vec<OutcomeRecord>, DatabaseError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=message_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let values: Vec<libsql::Value> = message_ids
            .iter()
            .map(|id| libsql::Value::Text(id.clone()))
            .collect();

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {OUTCOME_COLUMNS} FROM unsubscribe_outcomes WHERE message_id IN ({placeholders}) ORDER BY updated_at DESC"
                ),
                values,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_outcomes: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_outcome(&row) {
                Ok(record) => records.push(record),
                Err(e) => debug!(error = %e, "Skipping unreadable outcome row"),
            }
        }
        Ok(records)
    }

    async fn save_outcome(&self, record: &OutcomeRecord) -> Result<(), DatabaseError> {
        let completed_at = record.completed_at.map(|t| t.to_rfc3339());
        self.conn()
            .execute(
                "INSERT INTO unsubscribe_outcomes (message_id, status, method, url, error, completed_at, attempts, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(message_id) DO UPDATE SET
                    status = excluded.status,
                    method = excluded.method,
                    url = excluded.url,
                    error = excluded.error,
                    completed_at = excluded.completed_at,
                    attempts = MAX(unsubscribe_outcomes.attempts, excluded.attempts),
                    updated_at = excluded.updated_at",
                params![
                    record.message_id.as_str(),
                    record.status.as_str(),
                    record.method.as_str(),
                    opt_text(record.url.as_deref()),
                    opt_text(record.error.as_deref()),
                    opt_text(completed_at.as_deref()),
                    i64::from(record.attempts),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_outcome: {e}")))?;

        debug!(
            message_id = %record.message_id,
            status = %record.status,
            method = %record.method,
            "Outcome saved"
        );
        Ok(())
    }

    async fn begin_attempt(&self, message_id: &str) -> Result<u32, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO unsubscribe_outcomes (message_id, status, method, url, error, completed_at, attempts, updated_at)
                 VALUES (?1, 'attempted', 'none', NULL, NULL, NULL, 1, ?2)
                 ON CONFLICT(message_id) DO UPDATE SET
                    status = 'attempted',
                    method = 'none',
                    url = NULL,
                    error = NULL,
                    completed_at = NULL,
                    attempts = unsubscribe_outcomes.attempts + 1,
                    updated_at = excluded.updated_at",
                params![message_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("begin_attempt: {e}")))?;

        let record = self.get_outcome(message_id).await?;
        Ok(record.map(|r| r.attempts).unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unsubscribe::types::Outcome;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn metadata() -> MessageMetadata {
        MessageMetadata {
            list_unsubscribe: Some("<https://x.example/u?id=1>".into()),
            list_unsubscribe_post: None,
            html_body: Some("<p>hi</p>".into()),
        }
    }

    #[tokio::test]
    async fn message_round_trip_and_overwrite() {
        let db = test_db().await;
        assert!(db.get_message("m1").await.unwrap().is_none());

        db.upsert_message("m1", &metadata()).await.unwrap();
        assert_eq!(db.get_message("m1").await.unwrap(), Some(metadata()));

        let updated = MessageMetadata {
            list_unsubscribe_post: Some("List-Unsubscribe=One-Click".into()),
            html_body: None,
            ..metadata()
        };
        db.upsert_message("m1", &updated).await.unwrap();
        assert_eq!(db.get_message("m1").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn outcome_missing_until_first_attempt() {
        let db = test_db().await;
        assert!(db.get_outcome("m1").await.unwrap().is_none());

        assert_eq!(db.begin_attempt("m1").await.unwrap(), 1);
        let rec = db.get_outcome("m1").await.unwrap().unwrap();
        assert_eq!(rec.status, UnsubscribeStatus::Attempted);
        assert_eq!(rec.method, UnsubscribeMethod::None);
        assert_eq!(rec.attempts, 1);
    }

    #[tokio::test]
    async fn save_outcome_overwrites_every_terminal_field() {
        let db = test_db().await;
        db.begin_attempt("m1").await.unwrap();

        let mut failed = OutcomeRecord::finished(
            "m1",
            &Outcome::Failed { error: "HTTP 500".into() },
            UnsubscribeMethod::HeaderLink,
            Some("https://x.example/u".into()),
        );
        failed.attempts = 1;
        db.save_outcome(&failed).await.unwrap();
        let stored = db.get_outcome("m1").await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("HTTP 500"));
        assert!(stored.completed_at.is_none());

        assert_eq!(db.begin_attempt("m1").await.unwrap(), 2);
        let reset = db.get_outcome("m1").await.unwrap().unwrap();
        assert!(reset.error.is_none());
        assert!(reset.url.is_none());

        let mut ok = OutcomeRecord::finished("m1", &Outcome::Success, UnsubscribeMethod::OneClick, None);
        ok.attempts = 2;
        db.save_outcome(&ok).await.unwrap();
        let stored = db.get_outcome("m1").await.unwrap().unwrap();
        assert_eq!(stored.status, UnsubscribeStatus::Success);
        assert_eq!(stored.method, UnsubscribeMethod::OneClick);
        assert!(stored.error.is_none());
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn get_outcomes_skips_unknown_ids() {
        let db = test_db().await;
        db.begin_attempt("a").await.unwrap();
        db.begin_attempt("b").await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "zzz".to_string()];
        let records = db.get_outcomes(&ids).await.unwrap();
        let mut found: Vec<&str> = records.iter().map(|r| r.message_id.as_str()).collect();
        found.sort();
        assert_eq!(found, vec!["a", "b"]);
        assert!(db.get_outcomes(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outcomes.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.begin_attempt("m1").await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let rec = db.get_outcome("m1").await.unwrap().unwrap();
        assert_eq!(rec.attempts, 1);
    }
}
