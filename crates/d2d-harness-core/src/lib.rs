//! # d2d Harness Core
//!
//! Deploy-to-develop matching engine: data models, the reversed path index,
//! the matchers, pipeline registry and orchestrator, and the store
//! abstraction they run against.
//!
//! This crate does no filesystem, database or network I/O of its own.
//! Storage comes in through [`store::ResourceStore`], package lookups
//! through [`matching::purldb::PackageIdentityService`] and progress output
//! through [`progress::ProgressReporter`].

pub mod matching;
pub mod models;
pub mod pathmap;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod text;
