//! Middleware for the match service.
//!
//! # Components
//!
//! - `auth` - Bearer token validation for user and internal routes
//! - `http_metrics` - Request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, require_scope, AuthState};
pub use http_metrics::http_metrics_middleware;
