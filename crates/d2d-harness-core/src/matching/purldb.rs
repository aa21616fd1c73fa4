//! Package identification through an external package database.
//!
//! The matcher sends SHA-1 checksums of unmatched `to/` files to a
//! [`PackageIdentityService`] and, for every known package, records the
//! package, links the file (and its extracted tree when it is an archive)
//! and flags those resources `matched-to-purldb`.
//!
//! | Scope | Step | Files considered |
//! |-------|------|------------------|
//! | [`PurlDbScope::Archives`] | `match_archives_to_purldb` | configured archive extensions |
//! | [`PurlDbScope::Resources`] | `match_resources_to_purldb` | any remaining file |

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{ChecksumField, CodebaseSide, Package, Resource, ResourceId, Status};
use crate::store::{RelationFilter, ResourceFilter, StatusFilter};

use super::{MatchContext, MatchStats};

/// Remote lookup of packages by file checksum.
#[async_trait]
pub trait PackageIdentityService: Send + Sync {
    /// Health check. Errors and timeouts count as unavailable.
    async fn is_available(&self) -> bool;

    /// Packages whose archive SHA-1 is one of `sha1s`.
    async fn match_sha1(&self, sha1s: &[String]) -> Result<Vec<PackageRecord>>;
}

/// Package qualifiers are sent either pre-rendered or as a key/value map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Qualifiers {
    Text(String),
    Map(BTreeMap<String, String>),
}

impl Qualifiers {
    fn render(&self) -> Option<String> {
        let rendered = match self {
            Qualifiers::Text(text) => text.clone(),
            Qualifiers::Map(map) => map
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&"),
        };
        (!rendered.is_empty()).then_some(rendered)
    }
}

/// Package metadata returned by the service.
///
/// Only fields meaningful outside the service are kept; identifiers such as
/// `uuid` or `resource_url` are dropped on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageRecord {
    #[serde(rename = "type")]
    pub package_type: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub qualifiers: Option<Qualifiers>,
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub declared_license_expression: Option<String>,
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PackageRecord {
    pub fn into_package(self) -> Package {
        Package {
            package_type: self.package_type,
            namespace: self.namespace,
            name: self.name,
            version: self.version,
            qualifiers: self.qualifiers.as_ref().and_then(Qualifiers::render),
            subpath: self.subpath,
            download_url: self.download_url,
            sha1: self.sha1,
            declared_license_expression: self.declared_license_expression,
            homepage_url: self.homepage_url,
            description: self.description,
        }
    }
}

/// Which unmatched `to/` files are sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurlDbScope {
    /// Archives only, before code matching.
    Archives,
    /// Every file still unmatched after code matching.
    Resources,
}

impl PurlDbScope {
    pub fn step_name(&self) -> &'static str {
        match self {
            PurlDbScope::Archives => "match_archives_to_purldb",
            PurlDbScope::Resources => "match_resources_to_purldb",
        }
    }

    fn filter(&self, ctx: &MatchContext<'_>) -> ResourceFilter {
        let filter = ResourceFilter::unmatched_files(CodebaseSide::To)
            .with_checksum(ChecksumField::Sha1)
            .with_relation(RelationFilter::HasNoRelation);
        match self {
            PurlDbScope::Archives => filter.with_extensions(&ctx.options.purldb_extensions),
            PurlDbScope::Resources => filter,
        }
    }
}

/// Look up unmatched `to/` files of `scope` in the package database.
///
/// An unavailable service skips the step with a warning. Lookup errors
/// after a successful health check fail the step.
pub async fn match_purldb(
    ctx: &MatchContext<'_>,
    service: &dyn PackageIdentityService,
    scope: PurlDbScope,
) -> Result<MatchStats> {
    let step = scope.step_name();
    if !service.is_available().await {
        tracing::warn!("Package database unavailable, skipping {}", step);
        ctx.notice(step, "package database unavailable, step skipped");
        return Ok(MatchStats::default());
    }

    let filter = scope.filter(ctx);
    let mut progress = ctx.progress(step, &filter).await?;
    let mut stats = MatchStats::default();
    let mut packages = 0u64;
    let mut pager = crate::store::Pager::new(filter, ctx.options.purldb_batch_size);

    while let Some(batch) = pager.next_batch(ctx.store, ctx.project).await? {
        let sha1s: Vec<String> = batch
            .iter()
            .filter_map(|r| r.checksum(ChecksumField::Sha1))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let records = service
            .match_sha1(&sha1s)
            .await
            .with_context(|| format!("Package lookup failed for {} checksums", sha1s.len()))?;

        for record in records {
            stats += record_package(ctx, record).await?;
            packages += 1;
        }
        for _ in &batch {
            progress.tick();
        }
    }

    if packages > 0 {
        tracing::info!("{}: {} package(s) identified", step, packages);
    }
    stats.processed = progress.processed();
    progress.finish();
    Ok(stats)
}

async fn record_package(ctx: &MatchContext<'_>, record: PackageRecord) -> Result<MatchStats> {
    let Some(sha1) = record.sha1.clone().filter(|s| !s.is_empty()) else {
        tracing::debug!("Ignoring package {} without sha1", record.name);
        return Ok(MatchStats::default());
    };
    let matched_filter = ResourceFilter::files(CodebaseSide::To)
        .with_status(StatusFilter::Empty)
        .with_checksum_eq(ChecksumField::Sha1, &sha1);
    let matched = ctx.store.list_resources(ctx.project, &matched_filter).await?;
    if matched.is_empty() {
        return Ok(MatchStats::default());
    }

    let package = record.into_package();
    let package_id = ctx.store.upsert_package(ctx.project, &package).await?;
    tracing::debug!("{} matched {} resource(s)", package.purl(), matched.len());

    let mut statuses = 0;
    for resource in &matched {
        let ids = with_extracted_tree(ctx, resource).await?;
        ctx.store.assign_package(ctx.project, package_id, &ids).await?;
        for id in ids {
            if ctx.store.set_status(ctx.project, id, Status::MatchedToPurldb).await? {
                statuses += 1;
            }
        }
    }
    Ok(MatchStats::statuses(statuses))
}

/// `resource` plus its `-extract` directory and everything below it.
async fn with_extracted_tree(ctx: &MatchContext<'_>, resource: &Resource) -> Result<Vec<ResourceId>> {
    let extracted = resource.extracted_path();
    let mut ids = vec![resource.id];
    if let Some(dir) = ctx
        .store
        .get_resource_by_path(ctx.project, extracted.trim_end_matches('/'))
        .await?
    {
        ids.push(dir.id);
    }
    let nested = ResourceFilter {
        side: Some(CodebaseSide::To),
        ..Default::default()
    }
    .with_path_prefix(extracted);
    ids.extend(
        ctx.store
            .list_resources(ctx.project, &nested)
            .await?
            .into_iter()
            .map(|r| r.id),
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::matching::test_support::{context, status_of, PROJECT};
    use crate::matching::MatchOptions;
    use crate::store::memory::InMemoryStore;
    use crate::store::ResourceStore;
    use crate::text::sha1_hex;

    struct FakeService {
        available: bool,
        records: Vec<PackageRecord>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeService {
        fn new(available: bool, records: Vec<PackageRecord>) -> Self {
            Self {
                available,
                records,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PackageIdentityService for FakeService {
        async fn is_available(&self) -> bool {
            self.available
        }

        async fn match_sha1(&self, sha1s: &[String]) -> Result<Vec<PackageRecord>> {
            self.calls.lock().unwrap().push(sha1s.to_vec());
            Ok(self
                .records
                .iter()
                .filter(|r| r.sha1.as_ref().is_some_and(|s| sha1s.contains(s)))
                .cloned()
                .collect())
        }
    }

    const JAR: &[u8] = b"PK\x03\x04jgroups";

    fn jgroups_record() -> PackageRecord {
        serde_json::from_value(serde_json::json!({
            "uuid": "2f5a7c1e-0000-4000-8000-000000000000",
            "resource_url": "https://purldb.example/api/packages/2f5a7c1e/",
            "type": "maven",
            "namespace": "org.jgroups",
            "name": "jgroups",
            "version": "5.2.0.Final",
            "qualifiers": {},
            "sha1": sha1_hex(JAR),
            "declared_license_expression": "apache-2.0",
            "dependencies": []
        }))
        .unwrap()
    }

    #[test]
    fn record_drops_service_identifiers() {
        let package = jgroups_record().into_package();
        assert_eq!(package.purl(), "pkg:maven/org.jgroups/jgroups@5.2.0.Final");
        assert_eq!(package.qualifiers, None);
        assert_eq!(package.declared_license_expression.as_deref(), Some("apache-2.0"));
    }

    #[test]
    fn qualifier_map_is_rendered() {
        let qualifiers = Qualifiers::Map(BTreeMap::from([
            ("classifier".to_string(), "sources".to_string()),
            ("type".to_string(), "jar".to_string()),
        ]));
        assert_eq!(qualifiers.render().as_deref(), Some("classifier=sources&type=jar"));
    }

    #[tokio::test]
    async fn unavailable_service_skips_step() {
        let store = InMemoryStore::new();
        let jar = store.add_file(PROJECT, "to/lib/jgroups.jar", JAR);
        let service = FakeService::new(false, vec![jgroups_record()]);
        let options = MatchOptions::default();

        let stats = match_purldb(&context(&store, &options), &service, PurlDbScope::Archives)
            .await
            .unwrap();
        assert_eq!(stats, MatchStats::default());
        assert!(service.calls.lock().unwrap().is_empty());
        assert_eq!(status_of(&store, jar).await, None);
    }

    #[tokio::test]
    async fn archive_and_extracted_tree_are_claimed() {
        let store = InMemoryStore::new();
        let jar = store.add_file(PROJECT, "to/lib/jgroups.jar", JAR);
        let dir = store.add_directory(PROJECT, "to/lib/jgroups.jar-extract");
        let class = store.add_file(PROJECT, "to/lib/jgroups.jar-extract/org/jgroups/JChannel.class", b"\xca\xfe");
        let other = store.add_file(PROJECT, "to/lib/other.jar", b"PK\x03\x04other");
        let service = FakeService::new(true, vec![jgroups_record()]);
        let options = MatchOptions::default();

        let stats = match_purldb(&context(&store, &options), &service, PurlDbScope::Archives)
            .await
            .unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.statuses_set, 3);
        for id in [jar, dir, class] {
            assert_eq!(status_of(&store, id).await, Some(Status::MatchedToPurldb));
            assert_eq!(store.packages_of(id).len(), 1);
        }
        assert_eq!(status_of(&store, other).await, None);
        assert_eq!(store.list_packages(PROJECT).await.unwrap().len(), 1);
        // Only archives are sent in this scope.
        assert_eq!(service.calls.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn resources_scope_sends_remaining_files_in_batches() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store.add_file(PROJECT, &format!("to/static/file{}.js", i), format!("f{}", i).as_bytes());
        }
        let service = FakeService::new(true, Vec::new());
        let options = MatchOptions {
            purldb_batch_size: 2,
            ..Default::default()
        };

        let stats = match_purldb(&context(&store, &options), &service, PurlDbScope::Resources)
            .await
            .unwrap();
        assert_eq!(stats.processed, 5);
        let sizes: Vec<usize> = service.calls.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
