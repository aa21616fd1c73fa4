//! Status-only steps: early ignore flags and the final sweep.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::models::{CodebaseSide, Resource, Status, EXTRACT_SUFFIX};
use crate::store::{RelationFilter, ResourceFilter, StatusFilter};

use super::{MatchContext, MatchStats};

fn unmatched() -> ResourceFilter {
    ResourceFilter::default().with_status(StatusFilter::Empty)
}

/// Set `status` on every resource of `filter` accepted by `predicate`.
async fn flag_where<F>(
    ctx: &MatchContext<'_>,
    step: &str,
    filter: ResourceFilter,
    status: Status,
    predicate: F,
) -> Result<MatchStats>
where
    F: Fn(&Resource) -> bool,
{
    let mut progress = ctx.progress(step, &filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for resource in batch {
            progress.tick();
            if predicate(&resource) && ctx.store.set_status(ctx.project, resource.id, status).await? {
                stats.statuses_set += 1;
            }
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

/// Flag zero-byte files `ignored-empty-file`.
pub async fn flag_empty_files(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let filter = ResourceFilter {
        is_file: Some(true),
        ..unmatched()
    };
    flag_where(ctx, "flag_empty_files", filter, Status::IgnoredEmptyFile, |r| r.size == 0).await
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid ignore pattern: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Path below the `from/` or `to/` root, which ignore patterns apply to.
fn codebase_relative(path: &str) -> &str {
    match path.split_once('/') {
        Some((_, rest)) => rest,
        None => "",
    }
}

/// Flag resources matching one of the configured ignore globs
/// `ignored-pattern`.
pub async fn flag_ignored_resources(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    if ctx.options.ignore_patterns.is_empty() {
        return Ok(MatchStats::default());
    }
    let globs = build_globset(&ctx.options.ignore_patterns)?;
    flag_where(ctx, "flag_ignored_resources", unmatched(), Status::IgnoredPattern, |r| {
        globs.is_match(codebase_relative(&r.path))
    })
    .await
}

/// Final classification of everything the matchers left without a status:
/// related resources become `mapped`, extracted `to/` archives
/// `archive-processed` and directories `ignored-directory`.
pub async fn flag_mapped_resources_archives_and_ignored_directories(
    ctx: &MatchContext<'_>,
) -> Result<MatchStats> {
    let mut stats = flag_where(
        ctx,
        "flag_mapped_resources",
        unmatched().with_relation(RelationFilter::HasRelation),
        Status::Mapped,
        |_| true,
    )
    .await?;

    stats += flag_processed_archives(ctx).await?;

    let directories = ResourceFilter {
        is_file: Some(false),
        ..unmatched()
    };
    stats += flag_where(
        ctx,
        "flag_ignored_directories",
        directories,
        Status::IgnoredDirectory,
        |_| true,
    )
    .await?;
    Ok(stats)
}

async fn flag_processed_archives(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let extract_dirs = ResourceFilter {
        side: Some(CodebaseSide::To),
        is_file: Some(false),
        ..Default::default()
    };
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(extract_dirs);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for dir in batch {
            let Some(archive_path) = dir.path.strip_suffix(EXTRACT_SUFFIX) else {
                continue;
            };
            stats.processed += 1;
            let Some(archive) = ctx.store.get_resource_by_path(ctx.project, archive_path).await? else {
                continue;
            };
            if archive.is_file
                && archive.status.is_none()
                && ctx
                    .store
                    .set_status(ctx.project, archive.id, Status::ArchiveProcessed)
                    .await?
            {
                stats.statuses_set += 1;
            }
        }
    }
    Ok(stats)
}

/// Flag every resource still without a status `not-analyzed`.
pub async fn flag_not_analyzed(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    flag_where(ctx, "flag_not_analyzed", unmatched(), Status::NotAnalyzed, |_| true).await
}
