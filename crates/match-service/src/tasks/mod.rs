//! Background tasks for the match service.
//!
//! # Tasks
//!
//! - `searching_expiry` - Drops abandoned searches from the pool (optional)

pub mod searching_expiry;

pub use searching_expiry::{start_searching_expiry, SearchingExpiryConfig};
