//! Java source discovery and `.class` to `.java` matching.
//!
//! Compiled classes are laid out by fully-qualified name, sources by
//! whatever directory layout the project uses. The bridge is the `package`
//! declaration: each `.java` file is indexed under
//! `<package as path>/<file name>` and each `.class` path is normalized to
//! the `.java` name it was compiled from.

use anyhow::{bail, Result};
use regex::Regex;

use crate::models::{
    path_segments, CodebaseSide, MapType, NewRelation, RelationExtra, Resource, Status,
};
use crate::pathmap::PathIndex;
use crate::store::{read_text, RelationFilter, ResourceFilter};

use super::{MatchContext, MatchStats};

fn re_package() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*package\s+([\w.]+)\s*;").expect("package regex"))
}

/// Declared package of a Java source, from its first `max_lines` lines.
pub fn find_java_package<'t>(text: &'t str, max_lines: usize) -> Option<&'t str> {
    text.lines()
        .take(max_lines)
        .find_map(|line| re_package().captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Map a `.class` path to the `.java` path it was compiled from:
/// `foo/Bar$Inner.class` → `foo/Bar.java`.
pub fn normalized_java_path(class_path: &str) -> Result<String> {
    let Some(stem) = class_path.strip_suffix(".class") else {
        bail!("Not a .class path: {}", class_path);
    };
    let (parent, name) = match stem.rfind('/') {
        Some(pos) => (&stem[..=pos], &stem[pos + 1..]),
        None => ("", stem),
    };
    let outer = name.split('$').next().unwrap_or(name);
    if outer.is_empty() {
        bail!("Cannot derive a source name from {}", class_path);
    }
    Ok(format!("{}{}.java", parent, outer))
}

/// Record the declared package of every unmatched `from/` `.java` file.
pub async fn find_java_packages(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let filter = ResourceFilter::unmatched_files(CodebaseSide::From).with_extensions(&[".java"]);
    let mut progress = ctx.progress("find_java_packages", &filter).await?;
    let mut pager = ctx.pager(filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for resource in batch {
            progress.tick();
            let text = match read_text(ctx.store, ctx.project, &resource).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("Skipping {}: {:#}", resource.path, e);
                    continue;
                }
            };
            let Some(package) = find_java_package(&text, ctx.options.java_package_scan_lines)
            else {
                continue;
            };
            if resource.extra.java_package.as_deref() == Some(package) {
                continue;
            }
            let mut extra = resource.extra.clone();
            extra.java_package = Some(package.to_string());
            ctx.store.set_extra(ctx.project, resource.id, &extra).await?;
        }
    }
    let stats = MatchStats {
        processed: progress.processed(),
        ..Default::default()
    };
    progress.finish();
    Ok(stats)
}

/// Relate unmatched `to/` `.class` files to their `.java` sources.
///
/// Classes without a source are flagged `no-java-source`.
pub async fn map_java_to_class(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let java_filter =
        ResourceFilter::unmatched_files(CodebaseSide::From).with_extensions(&[".java"]);
    let mut qualified = Vec::new();
    let mut pager = ctx.pager(java_filter);
    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for resource in batch {
            if let Some(package) = resource.extra.java_package.as_deref() {
                qualified.push((resource.id, format!("{}/{}", package.replace('.', "/"), resource.name)));
            }
        }
    }
    let index = PathIndex::build(qualified, false);

    let class_filter = ResourceFilter::unmatched_files(CodebaseSide::To)
        .with_extensions(&[".class"])
        .with_relation(RelationFilter::HasNoRelation);
    let mut progress = ctx.progress("map_java_to_class", &class_filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(class_filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for to_resource in batch {
            stats += map_java_to_class_resource(ctx, &index, &to_resource).await?;
            progress.tick();
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

async fn map_java_to_class_resource(
    ctx: &MatchContext<'_>,
    index: &PathIndex,
    to_resource: &Resource,
) -> Result<MatchStats> {
    let found = match normalized_java_path(&to_resource.path) {
        Ok(java_path) => index.find_paths(&java_path),
        Err(e) => {
            tracing::debug!("{:#}", e);
            None
        }
    };
    let Some(found) = found else {
        let set = ctx
            .store
            .set_status(ctx.project, to_resource.id, Status::NoJavaSource)
            .await?;
        return Ok(MatchStats::statuses(set as u64));
    };

    let mut created = 0;
    for resource_id in &found.resource_ids {
        let Some(from_resource) = ctx.store.get_resource(ctx.project, *resource_id).await? else {
            continue;
        };
        let extra = RelationExtra {
            from_source_root: Some(source_root(&from_resource.path, found.matched_path_length)),
            ..Default::default()
        };
        let relation = NewRelation::new(from_resource.id, to_resource.id, MapType::JavaToClass)
            .with_extra(extra);
        if ctx.store.create_relation(ctx.project, &relation).await? {
            created += 1;
        }
    }
    Ok(MatchStats::relations(created))
}

/// `from_path` without its last `matched` segments, with a trailing `/`.
fn source_root(from_path: &str, matched: usize) -> String {
    let segments: Vec<&str> = path_segments(from_path).collect();
    let keep = segments.len().saturating_sub(matched);
    format!("{}/", segments[..keep].join("/"))
}
