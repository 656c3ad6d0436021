//! Core domain types and utilities for docshelf.
//!
//! This crate provides the identifier types and error handling foundation
//! shared by the access-control library and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{GlobalAccessRuleId, GroupMappingId, ParseIdError, ProjectId, TokenId, UserId};
