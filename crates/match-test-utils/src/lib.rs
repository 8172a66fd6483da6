//! # Match Test Utilities
//!
//! Shared test utilities for the match service.
//!
//! This crate provides:
//! - Server test harness (`TestMatchServer` for E2E tests)
//! - Bearer token minting for users and internal callers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use match_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestMatchServer::spawn().await?;
//!     server.register_user("u1", "Ana").await?;
//!
//!     let response = server
//!         .client()
//!         .post(format!("{}/api/v1/match/start", server.url()))
//!         .bearer_auth(server.user_token("u1"))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod server_harness;

pub use server_harness::*;
