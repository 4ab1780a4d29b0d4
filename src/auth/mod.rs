//! Identity is issued elsewhere; this module only verifies bearer tokens
//! and exposes the verified user to handlers.

pub mod jwt;
pub mod middleware;
