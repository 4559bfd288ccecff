//! HTTP surface: one catch-all handler for every method and path.

pub mod webhook;

use axum::Router;

use crate::SharedState;

pub use webhook::{HookJob, handle_hook};

/// Router with the webhook dispatcher installed as the sole handler.
pub fn router(state: SharedState) -> Router {
    Router::new().fallback(handle_hook).with_state(state)
}
