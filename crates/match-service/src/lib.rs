//! Match Service Library
//!
//! Anonymous conversation-partner matchmaking: users ask to be paired, the
//! service pairs two waiting users, allocates a shared session on the
//! real-time transport provider and hands each participant a join
//! credential.
//!
//! # Architecture
//!
//! The service follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/matchmaker.rs -> repositories/*.rs
//!                                                          -> services/token_issuer.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - HS256 bearer token validation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Auth and HTTP metrics middleware
//! - `models` - Presence, session and API models
//! - `observability` - Prometheus metrics
//! - `repositories` - In-memory and PostgreSQL stores
//! - `routes` - Axum router setup
//! - `services` - Matchmaking coordinator and credential issuer
//! - `tasks` - Background tasks

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
