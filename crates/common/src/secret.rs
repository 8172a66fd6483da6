//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for every sensitive value the services hold: the user-token signing
//! secret, the transport provider's API secret, database URLs with
//! credentials.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` over a secret gets safe logging behavior for free. Secrets are
//! zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct TransportKeys {
//!     api_key: String,
//!     api_secret: SecretString,
//! }
//!
//! let keys = TransportKeys {
//!     api_key: "APIabc".to_string(),
//!     api_secret: SecretString::from("shh"),
//! };
//!
//! assert!(!format!("{keys:?}").contains("shh"));
//! let secret: &str = keys.api_secret.expose_secret();
//! assert_eq!(secret, "shh");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
