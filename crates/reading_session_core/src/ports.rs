//! crates/reading_session_core/src/ports.rs
//!
//! Defines the service contracts (traits) the session tracker depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! tracker independent of the database that backs identities and sessions.

use async_trait::async_trait;

use crate::domain::{BookIdentity, CompletedSession, SessionId, UserId};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Maps external names onto stable internal identifiers.
///
/// An unknown user or book is `Ok(None)`, never an error.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_user(&self, username: &str) -> PortResult<Option<UserId>>;

    async fn resolve_book(&self, content_hash: &str) -> PortResult<Option<BookIdentity>>;
}

/// Durably appends completed sessions.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Writes one completed session and returns its identifier. Not retried.
    async fn persist(&self, session: &CompletedSession) -> PortResult<SessionId>;
}
