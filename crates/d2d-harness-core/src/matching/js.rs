//! JavaScript, TypeScript and SCSS source to build-output matching.
//!
//! Unlike the other matchers this one walks the `from/` side: each source
//! looks for `to/` files named like its build outputs (`app.scss` →
//! `app.css`, `app.css.map`, …), trying the longest path suffix first.
//! A minified file and its source map are `js_compiled` when the minified
//! file points at the map and the map references the source; everything
//! else found this way is a plain `path` relation.

use std::collections::HashSet;

use anyhow::Result;
use serde::Deserialize;

use crate::models::{
    path_segments, ChecksumField, CodebaseSide, MapType, NewRelation, RelationExtra, Resource,
};
use crate::store::{read_text, ResourceFilter};
use crate::text::sha1_hex;

use super::{MatchContext, MatchStats};

/// Source extensions handled by [`map_javascript`].
pub const SOURCE_EXTENSIONS: [&str; 5] = [".scss", ".js", ".jsx", ".ts", ".d.ts"];

/// Lines at the end of a minified file searched for `sourceMappingURL`.
const SOURCE_MAPPING_TAIL_LINES: usize = 5;

/// Build-output suffixes a source with `extension` may produce.
pub fn related_suffixes(extension: &str) -> &'static [&'static str] {
    match extension {
        ".scss" => &[".css", ".css.map", "_rtl.css", ".scss.js", ".scss.js.map"],
        ".js" => &[".js", ".js.map", ".min.js", ".min.js.map", ".min.map"],
        ".jsx" => &[".js", ".js.map", ".min.js", ".min.js.map"],
        ".ts" => &[".js", ".js.map", ".min.js", ".min.js.map", ".d.ts"],
        ".d.ts" => &[".d.ts"],
        _ => &[],
    }
}

#[derive(Debug, Default, Deserialize)]
struct SourceMap {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default, rename = "sourcesContent")]
    sources_content: Vec<Option<String>>,
}

/// Relate `from/` JavaScript-family sources to their `to/` build outputs.
pub async fn map_javascript(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let filter = ResourceFilter::unmatched_files(CodebaseSide::From)
        .with_extensions(&SOURCE_EXTENSIONS)
        .without_dotfiles();
    let mut progress = ctx.progress("map_javascript", &filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for source in batch {
            stats += map_javascript_resource(ctx, &source).await?;
            progress.tick();
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

/// Candidates found at the deepest suffix that yields any.
struct SuffixMatch {
    /// `s(k+1)/…/sn`, without extension.
    suffix: String,
    suffix_segments: usize,
    candidates: Vec<Resource>,
}

async fn find_outputs(
    ctx: &MatchContext<'_>,
    segments: &[&str],
    related: &[&str],
) -> Result<Option<SuffixMatch>> {
    for k in 0..segments.len() {
        let suffix = segments[k..].join("/");
        let endings = related
            .iter()
            .map(|r| format!("/{}{}", suffix, r))
            .collect();
        let filter = ResourceFilter::unmatched_files(CodebaseSide::To).with_path_suffixes(endings);
        let candidates = ctx.store.list_resources(ctx.project, &filter).await?;
        if !candidates.is_empty() {
            return Ok(Some(SuffixMatch {
                suffix,
                suffix_segments: segments.len() - k,
                candidates,
            }));
        }
    }
    Ok(None)
}

async fn map_javascript_resource(ctx: &MatchContext<'_>, source: &Resource) -> Result<MatchStats> {
    let related = related_suffixes(&source.extension);
    let Some(relative) = source.path.strip_prefix(&CodebaseSide::From.prefix()) else {
        return Ok(MatchStats::default());
    };
    let stem = &relative[..relative.len().saturating_sub(source.extension.len())];
    let segments: Vec<&str> = path_segments(stem).collect();
    if segments.is_empty() || related.is_empty() {
        return Ok(MatchStats::default());
    }

    let Some(found) = find_outputs(ctx, &segments, related).await? else {
        return Ok(MatchStats::default());
    };
    if found.candidates.len() > found.suffix_segments + related.len() {
        tracing::debug!(
            "{}: {} outputs for suffix {}, too ambiguous",
            source.path,
            found.candidates.len(),
            found.suffix
        );
        return Ok(MatchStats::default());
    }

    let source_suffix = format!("{}{}", found.suffix, source.extension);
    let compiled = compiled_outputs(ctx, source, &source_suffix, &found.candidates).await;
    let path_score = format!("{}/{}", found.suffix_segments, segments.len());

    let mut created = 0;
    for candidate in &found.candidates {
        let map_type = if compiled.contains(&candidate.id) {
            MapType::JsCompiled
        } else {
            MapType::Path
        };
        let relation = NewRelation::new(source.id, candidate.id, map_type).with_extra(RelationExtra {
            path_score: Some(path_score.clone()),
            ..Default::default()
        });
        if ctx.store.create_relation(ctx.project, &relation).await? {
            created += 1;
        }
    }
    Ok(MatchStats::relations(created))
}

/// Ids of the minified/map pairs among `candidates` verified as built from `source`.
async fn compiled_outputs(
    ctx: &MatchContext<'_>,
    source: &Resource,
    source_suffix: &str,
    candidates: &[Resource],
) -> HashSet<i64> {
    let mut compiled = HashSet::new();
    for map in candidates.iter().filter(|c| c.path.ends_with(".map")) {
        let Some(minified) = minified_sibling(map, candidates) else {
            continue;
        };
        if !references_map(ctx, minified, &map.name).await {
            continue;
        }
        if map_references_source(ctx, map, source, source_suffix).await {
            compiled.insert(minified.id);
            compiled.insert(map.id);
        }
    }
    compiled
}

/// The minified file a map belongs to: `app.css.map` → `app.css`,
/// `app.min.map` → `app.min.js`.
fn minified_sibling<'c>(map: &Resource, candidates: &'c [Resource]) -> Option<&'c Resource> {
    let stem = map.path.strip_suffix(".map")?;
    let mut names = vec![stem.to_string()];
    if let Some(base) = stem.strip_suffix(".min") {
        names.push(format!("{}.min.js", base));
    }
    candidates.iter().find(|c| names.contains(&c.path))
}

async fn references_map(ctx: &MatchContext<'_>, minified: &Resource, map_name: &str) -> bool {
    let text = match read_text(ctx.store, ctx.project, minified).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Cannot read {}: {:#}", minified.path, e);
            return false;
        }
    };
    let needle = format!("sourceMappingURL={}", map_name);
    let lines: Vec<&str> = text.lines().collect();
    let tail = lines.len().saturating_sub(SOURCE_MAPPING_TAIL_LINES);
    lines[tail..].iter().any(|line| line.contains(&needle))
}

async fn map_references_source(
    ctx: &MatchContext<'_>,
    map: &Resource,
    source: &Resource,
    source_suffix: &str,
) -> bool {
    let text = match read_text(ctx.store, ctx.project, map).await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Cannot read {}: {:#}", map.path, e);
            return false;
        }
    };
    let source_map: SourceMap = match serde_json::from_str(&text) {
        Ok(source_map) => source_map,
        Err(e) => {
            tracing::debug!("Invalid source map {}: {}", map.path, e);
            return false;
        }
    };

    if let Some(source_sha1) = source.checksum(ChecksumField::Sha1) {
        let embedded = source_map
            .sources_content
            .iter()
            .flatten()
            .any(|content| sha1_hex(content.as_bytes()) == source_sha1);
        if embedded {
            return true;
        }
    }
    let segment_suffix = format!("/{}", source_suffix);
    source_map
        .sources
        .iter()
        .any(|entry| entry == source_suffix || entry.ends_with(&segment_suffix))
}
