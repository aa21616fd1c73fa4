//! # d2d harness
//!
//! Deploy-to-develop matching: relate the files of a deployed artifact
//! (`to/`) to the development sources they were built from (`from/`).
//!
//! The matching engine lives in the `d2d-harness-core` crate and is free of
//! I/O. This crate is the native shell around it: configuration, SQLite
//! persistence, codebase ingestion, the PurlDB HTTP client and the `d2d`
//! command-line interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │   Inputs     │──▶│   Ingest     │──▶│     SQLite      │
//! │ from*/to*    │   │ extract+walk │   │ resources, rels │
//! └──────────────┘   └──────────────┘   └────────┬────────┘
//!                                                │
//!                     ┌──────────────────────────┤
//!                     ▼                          ▼
//!              ┌─────────────┐           ┌──────────────┐
//!              │  Pipelines  │◀─────────▶│    PurlDB    │
//!              │ (matchers)  │           │ (HTTP, opt.) │
//!              └─────────────┘           └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! d2d init
//! d2d project create acme --input from-src.zip --input to-app.war
//! d2d ingest acme
//! d2d run acme --group java --group javascript
//! d2d relations acme --map-type java_to_class
//! d2d export acme --output acme.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | `ResourceStore` over SQLite |
//! | [`project`] | Project records and work directories |
//! | [`inputs`] | Input resolution, copying and archive extraction |
//! | [`codebase`] | Codebase ingestion |
//! | [`purldb`] | PurlDB HTTP client |
//! | [`progress`] | Progress reporters |
//! | [`run_cmd`] | Pipeline runs and run records |
//! | [`query`] | Relation and resource listings |
//! | [`export`] | JSON export |

pub mod codebase;
pub mod config;
pub mod db;
pub mod export;
pub mod inputs;
pub mod migrate;
pub mod progress;
pub mod project;
pub mod purldb;
pub mod query;
pub mod run_cmd;
pub mod sqlite_store;
