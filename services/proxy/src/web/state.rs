//! services/proxy/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::booklore::BookloreClient;
use reading_session_core::SessionTracker;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub booklore: BookloreClient,
    pub tracker: Arc<SessionTracker>,
}
