//! JAR to source-tree matching.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::models::{CodebaseSide, MapType, NewRelation, Resource, Status};
use crate::store::{RelationFilter, ResourceFilter};

use super::{MatchContext, MatchStats};

/// Relate each unmatched `to/` `.jar` to the `from/` directory all of its
/// classes were compiled from.
///
/// A JAR is only related when every `.class` under its `-extract/` tree
/// has a `java_to_class` relation and they all agree on one source root.
pub async fn map_jar_to_source(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let jar_filter = ResourceFilter::unmatched_files(CodebaseSide::To)
        .with_extensions(&[".jar"])
        .with_relation(RelationFilter::HasNoRelation);
    let mut progress = ctx.progress("map_jar_to_source", &jar_filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(jar_filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for jar in batch {
            if let Some(relation) = jar_source_relation(ctx, &jar).await? {
                if ctx.store.create_relation(ctx.project, &relation).await? {
                    stats.relations_created += 1;
                }
            }
            progress.tick();
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

async fn jar_source_relation(ctx: &MatchContext<'_>, jar: &Resource) -> Result<Option<NewRelation>> {
    let class_filter = ResourceFilter::files(CodebaseSide::To)
        .with_extensions(&[".class"])
        .with_path_prefix(jar.extracted_path());
    let mut pager = ctx.pager(class_filter);
    let mut roots = BTreeSet::new();
    let mut has_classes = false;

    while let Some(classes) = pager.next_batch(ctx.store, ctx.project).await? {
        has_classes = true;
        if classes.iter().any(|c| c.status == Some(Status::NoJavaSource)) {
            tracing::debug!("{}: unresolved classes, not mapped", jar.path);
            return Ok(None);
        }

        let class_ids: Vec<_> = classes.iter().map(|c| c.id).collect();
        let relations = ctx
            .store
            .relations_to(ctx.project, &class_ids, Some(MapType::JavaToClass))
            .await?;
        for class in &classes {
            let mut class_roots = relations
                .iter()
                .filter(|r| r.to_id == class.id)
                .filter_map(|r| r.extra.from_source_root.clone())
                .peekable();
            if class_roots.peek().is_none() {
                return Ok(None);
            }
            roots.extend(class_roots);
        }
        if roots.len() > 1 {
            break;
        }
    }
    if !has_classes {
        return Ok(None);
    }
    if roots.len() != 1 {
        tracing::debug!("{}: {} distinct source roots, not mapped", jar.path, roots.len());
        return Ok(None);
    }

    let Some(root) = roots.into_iter().next() else {
        return Ok(None);
    };
    let root_path = root.trim_end_matches('/');
    match ctx.store.get_resource_by_path(ctx.project, root_path).await? {
        Some(source_dir)
            if source_dir.side() == Some(CodebaseSide::From) && !source_dir.is_file =>
        {
            Ok(Some(NewRelation::new(source_dir.id, jar.id, MapType::JarToSource)))
        }
        _ => {
            tracing::debug!("{}: source root {} not found", jar.path, root_path);
            Ok(None)
        }
    }
}
