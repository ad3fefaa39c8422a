//! dumpvault daemon — thin axum façade over [`dumpvault_core::Engine`].
//!
//! Split as a library crate consumed by a binary shell, so handlers are
//! independently testable: translate HTTP requests into `Engine` entry
//! points, and `Engine` state changes into an SSE stream.

pub mod api;

use dumpvault_core::Engine;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to every axum handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}
