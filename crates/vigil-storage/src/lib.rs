//! Vigil Storage -- rusqlite wrapper around the token store.
//!
//! WAL mode + busy_timeout so the admin CLI and a running agent can share
//! the database file. The live protocol only reads tokens; create/revoke
//! go through the same trait from the administrative interface.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt scope list for token {token_id}")]
    CorruptScopes { token_id: String },
    #[error("lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored authentication token. `secret_hash` is a one-way hash; the
/// plaintext secret is never persisted. Timestamps are unix millis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub secret_hash: String,
    pub scopes: Vec<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked: bool,
}

/// Token persistence consumed by the token service and the admin CLI.
pub trait TokenStore: Send + Sync {
    fn get_by_token_id(&self, token_id: &str) -> Result<Option<TokenRecord>>;
    fn insert_token(&self, record: &TokenRecord) -> Result<()>;
    /// Conditional revoke: returns whether the row actually changed.
    /// Monotonic -- a revoked token never becomes valid again.
    fn mark_revoked(&self, token_id: &str) -> Result<bool>;
    /// Non-secret metadata for all tokens, newest first.
    fn list_tokens(&self) -> Result<Vec<TokenRecord>>;
}

/// SQLite-backed token store.
/// Connection wrapped in Mutex for Send + Sync (rusqlite Connection is !Sync).
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteTokenStore {
    fn db(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Open (or create) the database at `db_path` and ensure the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(include_str!("schema.sql"))?;

        tracing::debug!(db = %db_path.display(), "token store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TokenRecord, String)> {
        let scopes_raw: String = row.get(2)?;
        Ok((
            TokenRecord {
                token_id: row.get(0)?,
                secret_hash: row.get(1)?,
                scopes: Vec::new(),
                created_at: row.get(3)?,
                expires_at: row.get(4)?,
                revoked: row.get::<_, i64>(5)? != 0,
            },
            scopes_raw,
        ))
    }

    fn parse_scopes(record: TokenRecord, scopes_raw: &str) -> Result<TokenRecord> {
        let scopes: Vec<String> =
            serde_json::from_str(scopes_raw).map_err(|_| StorageError::CorruptScopes {
                token_id: record.token_id.clone(),
            })?;
        Ok(TokenRecord { scopes, ..record })
    }
}

impl TokenStore for SqliteTokenStore {
    fn get_by_token_id(&self, token_id: &str) -> Result<Option<TokenRecord>> {
        let conn = self.db()?;
        let row = conn
            .query_row(
                "SELECT token_id, secret_hash, scopes, created_at, expires_at, revoked
                 FROM tokens WHERE token_id = ?1",
                params![token_id],
                Self::row_to_record,
            )
            .optional()?;

        match row {
            Some((record, scopes_raw)) => Ok(Some(Self::parse_scopes(record, &scopes_raw)?)),
            None => Ok(None),
        }
    }

    fn insert_token(&self, record: &TokenRecord) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT INTO tokens (token_id, secret_hash, scopes, created_at, expires_at, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.token_id,
                record.secret_hash,
                serde_json::to_string(&record.scopes).unwrap_or_else(|_| "[]".into()),
                record.created_at,
                record.expires_at,
                record.revoked as i64,
            ],
        )?;
        Ok(())
    }

    fn mark_revoked(&self, token_id: &str) -> Result<bool> {
        let conn = self.db()?;
        let changed = conn.execute(
            "UPDATE tokens SET revoked = 1 WHERE token_id = ?1 AND revoked = 0",
            params![token_id],
        )?;
        Ok(changed > 0)
    }

    fn list_tokens(&self) -> Result<Vec<TokenRecord>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(
            "SELECT token_id, secret_hash, scopes, created_at, expires_at, revoked
             FROM tokens ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            let (record, scopes_raw) = row?;
            records.push(Self::parse_scopes(record, &scopes_raw)?);
        }
        Ok(records)
    }
}
