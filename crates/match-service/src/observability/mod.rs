//! Observability module for the match service.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
