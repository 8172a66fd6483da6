//! Bearer token authentication.
//!
//! User access tokens are minted by the external auth service and signed
//! HS256 with the shared `JWT_SECRET`. This service only verifies them.

pub mod claims;
pub mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;

/// Scope required to register or update user presence.
pub const SCOPE_PRESENCE_WRITE: &str = "presence:write";

/// Scope required to end a session on a transport disconnect signal.
pub const SCOPE_SESSION_END: &str = "session:end";
