//! HTTP request handlers for the match service.

pub mod health;
pub mod internal;
pub mod matchmaking;
pub mod metrics;
pub mod transport;

pub use health::health_check;
pub use internal::{end_session, register_user};
pub use matchmaking::{match_status, start_match, stop_match};
pub use metrics::metrics_handler;
pub use transport::transport_token;
