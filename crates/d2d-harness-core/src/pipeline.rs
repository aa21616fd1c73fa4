//! Pipelines, their registry, and the orchestrator that runs them.
//!
//! A [`Pipeline`] is a declarative list of [`Step`]s, each optionally tagged
//! with groups. Untagged steps always run; tagged steps run only when one of
//! their groups is selected for the run. The [`PipelineRegistry`] is built
//! once by the caller and handed to whatever starts runs.
//!
//! # Built-in pipelines
//!
//! | Name | Purpose |
//! |------|---------|
//! | `deploy_to_develop` | Full d2d matching: checksum, Java, JavaScript, package database, path |
//! | `map_checksum_and_path` | Checksum and path matching only |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::matching::checksum::map_checksum;
use crate::matching::flag::{
    flag_empty_files, flag_ignored_resources,
    flag_mapped_resources_archives_and_ignored_directories, flag_not_analyzed,
};
use crate::matching::jar::map_jar_to_source;
use crate::matching::js::map_javascript;
use crate::matching::jvm::{find_java_packages, map_java_to_class};
use crate::matching::path::map_path;
use crate::matching::purldb::{match_purldb, PackageIdentityService, PurlDbScope};
use crate::matching::{MatchContext, MatchOptions, MatchStats};
use crate::models::{ChecksumField, ProjectId, Status};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::store::{ResourceFilter, ResourceStore, StatusFilter};

/// One unit of work a pipeline can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    FlagEmptyFiles,
    FlagIgnoredResources,
    MapChecksum(ChecksumField),
    MatchArchivesToPurldb,
    FindJavaPackages,
    MapJavaToClass,
    MapJarToSource,
    MapJavascript,
    MatchResourcesToPurldb,
    MapPath,
    FlagMappedResourcesArchivesAndIgnoredDirectories,
    FlagNotAnalyzed,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::FlagEmptyFiles => "flag_empty_files",
            Step::FlagIgnoredResources => "flag_ignored_resources",
            Step::MapChecksum(ChecksumField::Sha1) => "map_sha1",
            Step::MapChecksum(ChecksumField::Md5) => "map_md5",
            Step::MatchArchivesToPurldb => PurlDbScope::Archives.step_name(),
            Step::FindJavaPackages => "find_java_packages",
            Step::MapJavaToClass => "map_java_to_class",
            Step::MapJarToSource => "map_jar_to_source",
            Step::MapJavascript => "map_javascript",
            Step::MatchResourcesToPurldb => PurlDbScope::Resources.step_name(),
            Step::MapPath => "map_path",
            Step::FlagMappedResourcesArchivesAndIgnoredDirectories => {
                "flag_mapped_resources_archives_and_ignored_directories"
            }
            Step::FlagNotAnalyzed => "flag_not_analyzed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A step and the groups that enable it. No groups means always enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub step: Step,
    pub groups: Vec<String>,
}

impl PipelineStep {
    fn always(step: Step) -> Self {
        Self {
            step,
            groups: Vec::new(),
        }
    }

    fn in_group(step: Step, group: &str) -> Self {
        Self {
            step,
            groups: vec![group.to_string()],
        }
    }

    pub fn is_selected(&self, groups: &BTreeSet<String>) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| groups.contains(g))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub name: String,
    pub description: String,
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// Every group tag used by this pipeline's steps.
    pub fn available_groups(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|s| s.groups.iter().cloned())
            .collect()
    }

    /// Steps that run for `groups`, in order. Unknown groups are an error.
    pub fn selected_steps(&self, groups: &[String]) -> Result<Vec<Step>> {
        let available = self.available_groups();
        for group in groups {
            if !available.contains(group) {
                let known: Vec<&str> = available.iter().map(String::as_str).collect();
                bail!(
                    "Unknown step group '{}' for pipeline '{}'. Available: {}",
                    group,
                    self.name,
                    if known.is_empty() { "none".to_string() } else { known.join(", ") }
                );
            }
        }
        let selected: BTreeSet<String> = groups.iter().cloned().collect();
        Ok(self
            .steps
            .iter()
            .filter(|s| s.is_selected(&selected))
            .map(|s| s.step)
            .collect())
    }
}

/// Named pipelines available to the caller.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Pipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in pipelines.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(deploy_to_develop());
        registry.register(map_checksum_and_path());
        registry
    }

    /// Add a pipeline, replacing any pipeline with the same name.
    pub fn register(&mut self, pipeline: Pipeline) {
        self.pipelines.insert(pipeline.name.clone(), pipeline);
    }

    pub fn get(&self, name: &str) -> Result<&Pipeline> {
        match self.pipelines.get(name) {
            Some(pipeline) => Ok(pipeline),
            None => {
                let known: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
                bail!("Unknown pipeline: '{}'. Available: {}", name, known.join(", "))
            }
        }
    }

    /// Pipelines sorted by name.
    pub fn list(&self) -> Vec<&Pipeline> {
        self.pipelines.values().collect()
    }
}

fn deploy_to_develop() -> Pipeline {
    use PipelineStep as S;
    Pipeline {
        name: "deploy_to_develop".to_string(),
        description: "Relate deployed files to their development sources".to_string(),
        steps: vec![
            S::always(Step::FlagEmptyFiles),
            S::always(Step::FlagIgnoredResources),
            S::always(Step::MapChecksum(ChecksumField::Sha1)),
            S::in_group(Step::MatchArchivesToPurldb, "purldb"),
            S::in_group(Step::FindJavaPackages, "java"),
            S::in_group(Step::MapJavaToClass, "java"),
            S::in_group(Step::MapJarToSource, "java"),
            S::in_group(Step::MapJavascript, "javascript"),
            S::in_group(Step::MatchResourcesToPurldb, "purldb"),
            S::always(Step::MapPath),
            S::always(Step::FlagMappedResourcesArchivesAndIgnoredDirectories),
            S::always(Step::FlagNotAnalyzed),
        ],
    }
}

fn map_checksum_and_path() -> Pipeline {
    use PipelineStep as S;
    Pipeline {
        name: "map_checksum_and_path".to_string(),
        description: "Relate files by checksum, then by path".to_string(),
        steps: vec![
            S::always(Step::FlagEmptyFiles),
            S::always(Step::MapChecksum(ChecksumField::Sha1)),
            S::always(Step::MapChecksum(ChecksumField::Md5)),
            S::always(Step::MapPath),
            S::always(Step::FlagMappedResourcesArchivesAndIgnoredDirectories),
            S::always(Step::FlagNotAnalyzed),
        ],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub stats: MatchStats,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub groups: Vec<String>,
    pub steps: Vec<StepSummary>,
    /// Resource count per status after the run, statuses with zero omitted.
    pub status_counts: BTreeMap<String, u64>,
    /// Resources left without a status.
    pub unmatched: u64,
    /// Human-readable run log.
    pub log: Vec<String>,
}

impl RunSummary {
    pub fn relations_created(&self) -> u64 {
        self.steps.iter().map(|s| s.stats.relations_created).sum()
    }
}

/// Error returned when a step fails; the run stops at that step.
#[derive(Debug)]
pub struct StepError {
    pub step: String,
    /// Run log up to and including the failure.
    pub log: Vec<String>,
    pub source: anyhow::Error,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step '{}' failed: {:#}", self.step, self.source)
    }
}

impl std::error::Error for StepError {}

/// Runs pipelines step by step against one store.
pub struct Orchestrator<'a> {
    store: &'a dyn ResourceStore,
    options: &'a MatchOptions,
    reporter: &'a dyn ProgressReporter,
    identity: Option<&'a dyn PackageIdentityService>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn ResourceStore,
        options: &'a MatchOptions,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            store,
            options,
            reporter,
            identity: None,
        }
    }

    /// Use `service` for the package database steps. Without one they are skipped.
    pub fn with_identity_service(mut self, service: &'a dyn PackageIdentityService) -> Self {
        self.identity = Some(service);
        self
    }

    /// Run `pipeline` on `project` with the steps enabled by `groups`.
    ///
    /// Steps run strictly in order. The first failing step stops the run
    /// and is returned as a [`StepError`] inside the `anyhow::Error`.
    pub async fn run(
        &self,
        project: ProjectId,
        pipeline: &Pipeline,
        groups: &[String],
    ) -> Result<RunSummary> {
        let steps = pipeline.selected_steps(groups)?;
        let ctx = MatchContext::new(self.store, project, self.options, self.reporter);
        let mut log = vec![format!(
            "Pipeline {} started with {} step(s)",
            pipeline.name,
            steps.len()
        )];
        let mut summaries = Vec::with_capacity(steps.len());
        tracing::info!("Running {} on project {}", pipeline.name, project);

        for step in steps {
            let name = step.name();
            self.reporter.report(ProgressEvent::StepStarted {
                step: name.to_string(),
            });
            let started = Instant::now();
            let stats = match self.run_step(&ctx, step).await {
                Ok(stats) => stats,
                Err(source) => {
                    tracing::warn!("Step {} failed: {:#}", name, source);
                    log.push(format!("Step {} failed: {:#}", name, source));
                    return Err(StepError {
                        step: name.to_string(),
                        log,
                        source,
                    }
                    .into());
                }
            };
            let elapsed = started.elapsed();
            self.reporter.report(ProgressEvent::StepCompleted {
                step: name.to_string(),
                elapsed,
            });
            log.push(format!(
                "Step {} completed in {:.2}s: {} processed, {} relation(s), {} status(es)",
                name,
                elapsed.as_secs_f64(),
                stats.processed,
                stats.relations_created,
                stats.statuses_set
            ));
            summaries.push(StepSummary {
                name: name.to_string(),
                stats,
                elapsed,
            });
        }

        let mut status_counts = BTreeMap::new();
        for status in Status::ALL {
            let filter = ResourceFilter::default().with_status(StatusFilter::Is(status));
            let count = self.store.count_resources(project, &filter).await?;
            if count > 0 {
                status_counts.insert(status.to_string(), count);
            }
        }
        let unmatched = self
            .store
            .count_resources(project, &ResourceFilter::default().with_status(StatusFilter::Empty))
            .await?;
        log.push(format!("Pipeline {} completed", pipeline.name));

        Ok(RunSummary {
            pipeline: pipeline.name.clone(),
            groups: groups.to_vec(),
            steps: summaries,
            status_counts,
            unmatched,
            log,
        })
    }

    async fn run_step(&self, ctx: &MatchContext<'_>, step: Step) -> Result<MatchStats> {
        match step {
            Step::FlagEmptyFiles => flag_empty_files(ctx).await,
            Step::FlagIgnoredResources => flag_ignored_resources(ctx).await,
            Step::MapChecksum(field) => map_checksum(ctx, field).await,
            Step::MatchArchivesToPurldb => self.run_purldb(ctx, PurlDbScope::Archives).await,
            Step::FindJavaPackages => find_java_packages(ctx).await,
            Step::MapJavaToClass => map_java_to_class(ctx).await,
            Step::MapJarToSource => map_jar_to_source(ctx).await,
            Step::MapJavascript => map_javascript(ctx).await,
            Step::MatchResourcesToPurldb => self.run_purldb(ctx, PurlDbScope::Resources).await,
            Step::MapPath => map_path(ctx).await,
            Step::FlagMappedResourcesArchivesAndIgnoredDirectories => {
                flag_mapped_resources_archives_and_ignored_directories(ctx).await
            }
            Step::FlagNotAnalyzed => flag_not_analyzed(ctx).await,
        }
    }

    async fn run_purldb(&self, ctx: &MatchContext<'_>, scope: PurlDbScope) -> Result<MatchStats> {
        match self.identity {
            Some(service) => match_purldb(ctx, service, scope).await,
            None => {
                tracing::warn!("No package database configured, skipping {}", scope.step_name());
                ctx.notice(scope.step_name(), "no package database configured, step skipped");
                Ok(MatchStats::default())
            }
        }
    }
}
