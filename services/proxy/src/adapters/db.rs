//! services/proxy/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the `IdentityResolver` and `SessionSink` ports from the `core` crate. It
//! reads and writes Booklore's MariaDB tables using `sqlx`.

use async_trait::async_trait;
use reading_session_core::domain::{BookIdentity, CompletedSession, SessionId, UserId};
use reading_session_core::ports::{IdentityResolver, PortError, PortResult, SessionSink};
use sqlx::{FromRow, MySqlPool};
use tracing::{debug, info};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the identity and storage ports.
#[derive(Clone)]
pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl MySqlAdapter {
    /// Creates a new `MySqlAdapter`.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Separates "database not reachable right now" from everything else.
fn map_db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
}

#[derive(FromRow)]
struct BookFileRecord {
    book_id: i64,
    book_type: String,
}
impl BookFileRecord {
    fn to_domain(self) -> BookIdentity {
        BookIdentity {
            book_id: self.book_id,
            book_type: self.book_type,
        }
    }
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl IdentityResolver for MySqlAdapter {
    async fn resolve_user(&self, username: &str) -> PortResult<Option<UserId>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT id FROM koreader_user WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(record.map(|r| r.id))
    }

    async fn resolve_book(&self, content_hash: &str) -> PortResult<Option<BookIdentity>> {
        let record = sqlx::query_as::<_, BookFileRecord>(
            "SELECT bf.book_id, bf.book_type FROM book_file bf \
             JOIN book b ON bf.book_id = b.id \
             WHERE bf.current_hash = ? AND bf.is_book = 1 AND b.deleted = 0",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        if record.is_none() {
            debug!(content_hash, "No book file matches hash");
        }
        Ok(record.map(BookFileRecord::to_domain))
    }
}

#[async_trait]
impl SessionSink for MySqlAdapter {
    async fn persist(&self, session: &CompletedSession) -> PortResult<SessionId> {
        let result = sqlx::query(
            "INSERT INTO reading_sessions \
             (user_id, book_id, book_type, start_time, end_time, duration_seconds, \
              start_progress, end_progress, progress_delta, start_location, end_location, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NOW())",
        )
        .bind(session.user_id)
        .bind(session.book_id)
        .bind(&session.book_type)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.duration_seconds)
        .bind(session.start_progress)
        .bind(session.end_progress)
        .bind(session.progress_delta)
        .bind(&session.start_location)
        .bind(&session.end_location)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        let session_id = result.last_insert_id();
        info!(
            session_id,
            user_id = session.user_id,
            book_id = session.book_id,
            duration_secs = session.duration_seconds,
            progress_delta = session.progress_delta,
            "Completed session inserted"
        );
        Ok(session_id)
    }
}
