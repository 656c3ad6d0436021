//! docshelf HTTP server.
//!
//! Wires the identity and access crate to PostgreSQL-backed stores and
//! exposes login, logout, identity-provider callback and a small JSON API
//! for session and token holders.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod router;
