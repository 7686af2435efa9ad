//! OAuth 2.0 provider state library crate.
//!
//! Models users, client applications, authorization grants and tokens, and the
//! flows that move between them, over a pluggable async storage backend.

pub mod config;
pub mod errors;
pub mod janitor;
pub mod oauth;
pub mod storage;
