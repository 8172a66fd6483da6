//! Common utilities and types shared across OpenTalk components.

#![warn(clippy::pedantic)]

/// Module for identifier types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT pre-validation utilities (size, header, iat)
pub mod jwt;
