//! Deploy-to-develop matchers.
//!
//! Each matcher walks a filtered slice of a project's resources through a
//! [`MatchContext`] and records what it finds as relations or terminal
//! statuses. Matchers only consider resources without a status, so a
//! resource claimed by an earlier matcher is invisible to later ones.
//!
//! | Module | Step(s) | Map type / status |
//! |--------|---------|-------------------|
//! | [`checksum`] | `map_checksum` | `sha1`, `md5` |
//! | [`path`] | `map_path` | `path`, `too-many-maps` |
//! | [`jvm`] | `find_java_packages`, `map_java_to_class` | `java_to_class`, `no-java-source` |
//! | [`jar`] | `map_jar_to_source` | `jar_to_source` |
//! | [`js`] | `map_javascript` | `js_compiled`, `path` |
//! | [`purldb`] | `match_archives_to_purldb`, `match_resources_to_purldb` | `matched-to-purldb` |
//! | [`flag`] | flagging and final sweep | `ignored-*`, `mapped`, `not-analyzed`, … |

pub mod checksum;
pub mod flag;
pub mod jar;
pub mod js;
pub mod jvm;
pub mod path;
pub mod purldb;

use std::ops::AddAssign;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{ProjectId, Resource, ResourceId};
use crate::pathmap::PathIndex;
use crate::progress::{LoopProgress, ProgressEvent, ProgressReporter};
use crate::store::{read_text, Pager, ResourceFilter, ResourceStore};
use crate::text::quick_ratio;

/// Tunables shared by the matchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Minimum line similarity for a text-to-text path match.
    #[serde(default = "default_diff_ratio_threshold")]
    pub diff_ratio_threshold: f64,
    /// Resources fetched per store round trip.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Lines of a `.java` file scanned for its package declaration.
    #[serde(default = "default_java_package_scan_lines")]
    pub java_package_scan_lines: usize,
    /// Progress is reported every time this share of a step completes.
    #[serde(default = "default_progress_step_percent")]
    pub progress_step_percent: u8,
    /// Archive extensions sent to the package database before code matching.
    #[serde(default = "default_purldb_extensions")]
    pub purldb_extensions: Vec<String>,
    /// Checksums per package database request.
    #[serde(default = "default_purldb_batch_size")]
    pub purldb_batch_size: usize,
    /// Glob patterns flagged `ignored-pattern`, matched against the path
    /// below the codebase root.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_diff_ratio_threshold() -> f64 {
    0.7
}
fn default_chunk_size() -> usize {
    2000
}
fn default_java_package_scan_lines() -> usize {
    500
}
fn default_progress_step_percent() -> u8 {
    10
}
fn default_purldb_extensions() -> Vec<String> {
    [".jar", ".war", ".zip", ".ear", ".whl", ".tgz"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_purldb_batch_size() -> usize {
    1000
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            diff_ratio_threshold: default_diff_ratio_threshold(),
            chunk_size: default_chunk_size(),
            java_package_scan_lines: default_java_package_scan_lines(),
            progress_step_percent: default_progress_step_percent(),
            purldb_extensions: default_purldb_extensions(),
            purldb_batch_size: default_purldb_batch_size(),
            ignore_patterns: Vec::new(),
        }
    }
}

/// Everything a matcher needs to run against one project.
pub struct MatchContext<'a> {
    pub store: &'a dyn ResourceStore,
    pub project: ProjectId,
    pub options: &'a MatchOptions,
    pub reporter: &'a dyn ProgressReporter,
}

impl<'a> MatchContext<'a> {
    pub fn new(
        store: &'a dyn ResourceStore,
        project: ProjectId,
        options: &'a MatchOptions,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            store,
            project,
            options,
            reporter,
        }
    }

    /// Count `filter` and start a progress tracker for `step`.
    pub async fn progress(&self, step: &str, filter: &ResourceFilter) -> Result<LoopProgress<'a>> {
        let total = self.store.count_resources(self.project, filter).await?;
        Ok(LoopProgress::new(
            self.reporter,
            step,
            total,
            self.options.progress_step_percent,
        ))
    }

    pub fn pager(&self, filter: ResourceFilter) -> Pager {
        Pager::new(filter, self.options.chunk_size)
    }

    pub fn notice(&self, step: &str, message: impl Into<String>) {
        self.reporter.report(ProgressEvent::Notice {
            step: step.to_string(),
            message: message.into(),
        });
    }

    /// Collect `(id, path)` pairs of every resource matching `filter`.
    pub async fn id_paths(&self, filter: ResourceFilter) -> Result<Vec<(ResourceId, String)>> {
        let mut pairs = Vec::new();
        let mut pager = self.pager(filter);
        while let Some(batch) = pager.next_batch(self.store, self.project).await? {
            pairs.extend(batch.into_iter().map(|r| (r.id, r.path)));
        }
        Ok(pairs)
    }

    /// Build a [`PathIndex`] over the resources matching `filter`.
    pub async fn build_index(&self, filter: ResourceFilter, with_subpaths: bool) -> Result<PathIndex> {
        Ok(PathIndex::build(self.id_paths(filter).await?, with_subpaths))
    }
}

/// Counters returned by every step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    /// Resources the step looked at.
    pub processed: u64,
    pub relations_created: u64,
    pub statuses_set: u64,
}

impl MatchStats {
    pub fn relations(n: u64) -> Self {
        Self {
            relations_created: n,
            ..Default::default()
        }
    }

    pub fn statuses(n: u64) -> Self {
        Self {
            statuses_set: n,
            ..Default::default()
        }
    }
}

impl AddAssign for MatchStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.relations_created += other.relations_created;
        self.statuses_set += other.statuses_set;
    }
}

/// Outcome of comparing the text content of two resources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffRatio {
    /// At least one side is not text (or empty); nothing to verify.
    NotComparable,
    /// A text resource could not be read or decoded.
    Unreadable,
    Ratio(f64),
}

/// Line similarity between two resources when both are text.
pub async fn resource_diff_ratio(
    ctx: &MatchContext<'_>,
    a: &Resource,
    b: &Resource,
) -> DiffRatio {
    if !(a.is_text && b.is_text) {
        return DiffRatio::NotComparable;
    }
    let text_a = match read_text(ctx.store, ctx.project, a).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Cannot read {} for diff ratio: {:#}", a.path, e);
            return DiffRatio::Unreadable;
        }
    };
    let text_b = match read_text(ctx.store, ctx.project, b).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Cannot read {} for diff ratio: {:#}", b.path, e);
            return DiffRatio::Unreadable;
        }
    };
    match quick_ratio(&text_a, &text_b) {
        Some(ratio) => DiffRatio::Ratio(ratio),
        None => DiffRatio::NotComparable,
    }
}
