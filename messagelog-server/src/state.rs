//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use messagelog_core::LogManager;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// The running message log
    pub manager: Arc<LogManager>,
    /// Name of the record store backend, reported by /ready
    pub store_backend: &'static str,
}

impl AppState {
    pub fn new(manager: Arc<LogManager>, store_backend: &'static str) -> Self {
        Self {
            manager,
            store_backend,
        }
    }
}
