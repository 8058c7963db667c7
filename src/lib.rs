//! Personal knowledge graph store: named entities, typed directed relations,
//! and a derived adjacency index, kept mutually consistent over SQLite.
//!
//! Cairn stores three kinds of records in one database and guards their
//! relationships through a single coordinator:
//!
//! | Record | Owned by | Notes |
//! |--------|----------|-------|
//! | **Entity** | [`graph::entities`] | Unique name, free-form type, observation set |
//! | **Relation** | [`graph::relations`] | `(from, to, type)` unique, endpoints must exist |
//! | **Knowledge entry** | [`graph::index`] | Derived: incident relation ids per entity |
//!
//! Every mutation attempt is appended to the [`graph::log::OperationLog`].
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL), one transaction per store call
//! - **Consistency**: multi-store operations run as journaled sagas of
//!   idempotent steps; an interrupted cascade or a stale index is healed by
//!   [`graph::coordinator::Coordinator::repair`]
//! - **Transport**: MCP over stdio, or a JSON HTTP API ([`http`])
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, migrations, and health checks
//! - [`graph`] — Stores, coordinator, read paths, and consistency verification
//! - [`http`] — axum router over the coordinator

pub mod config;
pub mod db;
pub mod graph;
pub mod http;
