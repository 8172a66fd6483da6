//! Service layer for the match service.
//!
//! # Components
//!
//! - `matchmaker` - Pairing, session lifecycle and credential hand-out
//! - `token_issuer` - Transport credential minting

pub mod matchmaker;
pub mod token_issuer;

pub use matchmaker::{MatchStatus, MatchedSession, Matchmaker, TransportCredential};
pub use token_issuer::{Credential, LiveKitTokenIssuer, TokenIssuer};
