//! Longest common path-suffix matching with a text similarity guard.

use anyhow::Result;

use crate::models::{CodebaseSide, MapType, NewRelation, RelationExtra, Resource, Status};
use crate::pathmap::{PathIndex, PathLookup};
use crate::store::{RelationFilter, ResourceFilter};
use crate::text::format_ratio;

use super::{resource_diff_ratio, DiffRatio, MatchContext, MatchStats};

const STEP: &str = "map_path";

/// Relate unmatched `to/` files to the `from/` files sharing the longest
/// path suffix.
///
/// When the best suffix yields more candidates than it has segments the
/// `to/` file is flagged `too-many-maps` instead. Text-to-text candidates
/// whose line similarity falls under the configured threshold are dropped.
pub async fn map_path(ctx: &MatchContext<'_>) -> Result<MatchStats> {
    let index = ctx
        .build_index(ResourceFilter::unmatched_files(CodebaseSide::From), true)
        .await?;

    let to_filter = ResourceFilter::unmatched_files(CodebaseSide::To)
        .with_relation(RelationFilter::HasNoRelation);
    let mut progress = ctx.progress(STEP, &to_filter).await?;
    let mut stats = MatchStats::default();
    let mut pager = ctx.pager(to_filter);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        for to_resource in batch {
            stats += map_path_resource(ctx, &index, &to_resource).await?;
            progress.tick();
        }
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

async fn map_path_resource(
    ctx: &MatchContext<'_>,
    index: &PathIndex,
    to_resource: &Resource,
) -> Result<MatchStats> {
    let found = match index.lookup(&to_resource.path) {
        PathLookup::NotFound => return Ok(MatchStats::default()),
        PathLookup::Ambiguous(_) => {
            let set = ctx
                .store
                .set_status(ctx.project, to_resource.id, Status::TooManyMaps)
                .await?;
            return Ok(MatchStats::statuses(set as u64));
        }
        PathLookup::Found(found) => found,
    };

    // The `to/` root segment can never match.
    let to_path_length = to_resource.segment_count().saturating_sub(1);
    let mut created = 0;

    for resource_id in &found.resource_ids {
        let Some(from_resource) = ctx.store.get_resource(ctx.project, *resource_id).await? else {
            continue;
        };

        let diff_ratio = match resource_diff_ratio(ctx, to_resource, &from_resource).await {
            DiffRatio::NotComparable => None,
            DiffRatio::Unreadable => continue,
            DiffRatio::Ratio(ratio) => Some(ratio),
        };
        if matches!(diff_ratio, Some(ratio) if ratio < ctx.options.diff_ratio_threshold) {
            continue;
        }

        let extra = RelationExtra {
            path_score: Some(format!("{}/{}", found.matched_path_length, to_path_length)),
            diff_ratio: diff_ratio.map(format_ratio),
            ..Default::default()
        };
        let relation =
            NewRelation::new(from_resource.id, to_resource.id, MapType::Path).with_extra(extra);
        if ctx.store.create_relation(ctx.project, &relation).await? {
            created += 1;
        }
    }
    Ok(MatchStats::relations(created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::test_support::{context, status_of, PROJECT};
    use crate::matching::MatchOptions;
    use crate::store::memory::InMemoryStore;
    use crate::store::ResourceStore;

    #[tokio::test]
    async fn relates_longest_suffix_with_score() {
        let store = InMemoryStore::new();
        store.add_file(PROJECT, "from/other/c.bin", b"\x00\x01");
        let from = store.add_file(PROJECT, "from/a/b/c.bin", b"\x00\x02");
        let to = store.add_file(PROJECT, "to/x/b/c.bin", b"\x00\x03");
        let options = MatchOptions::default();

        let stats = map_path(&context(&store, &options)).await.unwrap();
        assert_eq!(stats.relations_created, 1);
        let relations = store.relations_to(PROJECT, &[to], None).await.unwrap();
        assert_eq!(relations[0].from_id, from);
        assert_eq!(relations[0].map_type, MapType::Path);
        assert_eq!(relations[0].extra.path_score.as_deref(), Some("2/3"));
        assert_eq!(relations[0].extra.diff_ratio, None);
    }

    #[tokio::test]
    async fn too_many_candidates_flags_resource() {
        let store = InMemoryStore::new();
        store.add_file(PROJECT, "from/a/Util.bin", b"\x00a");
        store.add_file(PROJECT, "from/b/Util.bin", b"\x00b");
        store.add_file(PROJECT, "from/c/Util.bin", b"\x00c");
        let to = store.add_file(PROJECT, "to/z/Util.bin", b"\x00z");
        let options = MatchOptions::default();

        let stats = map_path(&context(&store, &options)).await.unwrap();
        assert_eq!(stats.relations_created, 0);
        assert_eq!(stats.statuses_set, 1);
        assert_eq!(status_of(&store, to).await, Some(Status::TooManyMaps));
        assert!(store.relations_to(PROJECT, &[to], None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dissimilar_text_is_rejected() {
        let store = InMemoryStore::new();
        store.add_file(PROJECT, "from/src/app.conf", b"alpha\nbeta\ngamma\ndelta\n");
        let to = store.add_file(PROJECT, "to/src/app.conf", b"one\ntwo\nthree\nfour\n");
        let options = MatchOptions::default();

        map_path(&context(&store, &options)).await.unwrap();
        assert!(store.relations_to(PROJECT, &[to], None).await.unwrap().is_empty());
        assert_eq!(status_of(&store, to).await, None);
    }

    #[tokio::test]
    async fn similar_text_records_diff_ratio() {
        let store = InMemoryStore::new();
        store.add_file(PROJECT, "from/src/app.conf", b"a\nb\nc\nd\n");
        let to = store.add_file(PROJECT, "to/src/app.conf", b"a\nb\nc\nX\n");
        let options = MatchOptions::default();

        map_path(&context(&store, &options)).await.unwrap();
        let relations = store.relations_to(PROJECT, &[to], None).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].extra.diff_ratio.as_deref(), Some("75.0%"));
        assert_eq!(relations[0].extra.path_score.as_deref(), Some("2/2"));
    }

    #[tokio::test]
    async fn already_related_resources_are_skipped() {
        let store = InMemoryStore::new();
        let from = store.add_file(PROJECT, "from/a.bin", b"\x00");
        let to = store.add_file(PROJECT, "to/a.bin", b"\x00");
        store
            .create_relation(PROJECT, &NewRelation::new(from, to, MapType::Sha1))
            .await
            .unwrap();
        let options = MatchOptions::default();

        let stats = map_path(&context(&store, &options)).await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(store.list_relations(PROJECT, Some(MapType::Path)).await.unwrap().len(), 0);
    }

    fn text_with_bad_tail(head: &str) -> Vec<u8> {
        let mut bytes = head.repeat(9 * 1024 / head.len() + 1).into_bytes();
        bytes.push(0xff);
        bytes
    }

    #[tokio::test]
    async fn undecodable_text_is_not_related() {
        let store = InMemoryStore::new();
        let from_content = text_with_bad_tail("line\n");
        let to_content = text_with_bad_tail("line\n");
        let from = store.add_file(PROJECT, "from/res/app.properties", &from_content);
        let to = store.add_file(PROJECT, "to/res/app.properties", &to_content);
        for id in [from, to] {
            assert!(store.get_resource(PROJECT, id).await.unwrap().unwrap().is_text);
        }
        let options = MatchOptions::default();

        let stats = map_path(&context(&store, &options)).await.unwrap();
        assert_eq!(stats.relations_created, 0);
        assert_eq!(stats.statuses_set, 0);
        assert!(store.relations_to(PROJECT, &[to], None).await.unwrap().is_empty());
        assert_eq!(status_of(&store, to).await, None);
    }
}
