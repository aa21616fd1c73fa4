//! Exact content matching by checksum.

use anyhow::Result;

use crate::models::{ChecksumField, CodebaseSide, NewRelation, Resource};
use crate::pathmap::PathIndex;
use crate::store::{RelationFilter, ResourceFilter};

use super::{MatchContext, MatchStats};

/// Relate every unmatched `to/` file to the `from/` files sharing its
/// `field` checksum.
///
/// Only `to/` files without a status and without any relation are
/// considered, so running the step twice creates nothing new. Several
/// candidates with the same checksum are narrowed to those sharing the
/// longest path suffix with the `to/` file; if that still leaves more than
/// one, each of them gets a relation.
pub async fn map_checksum(ctx: &MatchContext<'_>, field: ChecksumField) -> Result<MatchStats> {
    let step = format!("map_{}", field.as_str());
    let to_filter = ResourceFilter::unmatched_files(CodebaseSide::To)
        .with_checksum(field)
        .with_relation(RelationFilter::HasNoRelation);

    let mut progress = ctx.progress(&step, &to_filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(to_filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for to_resource in batch {
            stats += map_checksum_resource(ctx, &to_resource, field).await?;
            progress.tick();
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

async fn map_checksum_resource(
    ctx: &MatchContext<'_>,
    to_resource: &Resource,
    field: ChecksumField,
) -> Result<MatchStats> {
    let Some(value) = to_resource.checksum(field) else {
        return Ok(MatchStats::default());
    };
    let from_filter =
        ResourceFilter::unmatched_files(CodebaseSide::From).with_checksum_eq(field, value);
    let candidates = ctx.store.list_resources(ctx.project, &from_filter).await?;

    let mut created = 0;
    for from_resource in narrow_by_path(&candidates, &to_resource.path) {
        let relation = NewRelation::new(from_resource.id, to_resource.id, field.map_type());
        if ctx.store.create_relation(ctx.project, &relation).await? {
            created += 1;
        }
    }
    Ok(MatchStats::relations(created))
}

/// Keep the candidates whose path shares the longest suffix with `to_path`.
/// All candidates are kept when none shares even the file name.
pub fn narrow_by_path<'r>(candidates: &'r [Resource], to_path: &str) -> Vec<&'r Resource> {
    if candidates.len() <= 1 {
        return candidates.iter().collect();
    }
    let index = PathIndex::build(
        candidates.iter().map(|r| (r.id, r.path.clone())),
        true,
    );
    match index.find_paths(to_path) {
        Some(found) => candidates
            .iter()
            .filter(|r| found.resource_ids.contains(&r.id))
            .collect(),
        None => candidates.iter().collect(),
    }
}
