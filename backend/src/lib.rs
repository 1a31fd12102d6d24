//! # Ferry Board
//!
//! Sailing truth-reconciliation engine for multi-operator ferry corridors.
//!
//! Produces one bidirectional "today" board per corridor by reconciling
//! static schedule templates, operator-published schedules and a persisted
//! status overlay. Cancellations are never under-reported: once a sailing is
//! recorded as canceled it stays canceled and stays visible.
//!
//! ## Architecture
//!
//! - [`models`]: identity keys, status vocabulary, corridor registry
//! - [`db`]: persisted store trait with Postgres and in-memory backends
//! - [`sources`]: schedule and forecast collaborators
//! - [`services`]: overlay reconciliation, authority, board composition, guards
//! - [`config`]: TOML configuration
//! - [`http`]: Axum REST surface (feature `http-server`)
//!

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod sources;

#[cfg(feature = "http-server")]
pub mod http;
