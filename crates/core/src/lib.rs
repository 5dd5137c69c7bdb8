//! Content audit, relevance search, and recency tracking for the Castle
//! knowledge base.
//!
//! This crate has no database dependency. Persistence, search indexes,
//! permissions, and entity loading are reached through the capability
//! traits declared next to each component; `castle-db` provides the
//! PostgreSQL implementations and [`memory`] the in-process ones.

pub mod config;
pub mod content;
pub mod entity;
pub mod error;
pub mod memory;
pub mod preferences;
pub mod recency;
pub mod revision;
pub mod search;
pub mod types;
pub mod validation;
