use std::path::Path;

use d2d_harness::config::Config;
use d2d_harness::sqlite_store::SqliteStore;
use d2d_harness::{db, migrate};
use d2d_harness_core::models::{
    ChecksumField, CodebaseSide, MapType, NewRelation, NewResource, Package, RelationExtra,
    ResourceExtra, Status,
};
use d2d_harness_core::store::memory::InMemoryStore;
use d2d_harness_core::store::{
    Pager, RelationFilter, ResourceFilter, ResourceStore, StatusFilter,
};
use d2d_harness_core::text::sha1_hex;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let toml_str = format!(
        r#"
[db]
path = "{}/data/d2d.sqlite"

[workspace]
root = "{}/projects"
"#,
        tmp.path().display(),
        tmp.path().display()
    );
    toml::from_str(&toml_str).unwrap()
}

async fn setup(tmp: &TempDir) -> (SqliteStore, i64) {
    let config = test_config(tmp);
    let pool = db::connect(&config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();

    let work_dir = tmp.path().join("projects/acme");
    std::fs::create_dir_all(work_dir.join("codebase")).unwrap();
    let project: i64 = sqlx::query_scalar(
        "INSERT INTO projects (name, work_dir, created_at) VALUES ('acme', ?, 0) RETURNING id",
    )
    .bind(work_dir.to_string_lossy().to_string())
    .fetch_one(&pool)
    .await
    .unwrap();

    (SqliteStore::new(pool), project)
}

fn file(path: &str, content: &[u8]) -> NewResource {
    NewResource {
        path: path.to_string(),
        size: content.len() as u64,
        is_file: true,
        is_text: true,
        sha1: Some(sha1_hex(content)),
        md5: None,
    }
}

fn sample_resources() -> Vec<NewResource> {
    vec![
        NewResource::directory("from/src"),
        file("from/src/App.java", b"package a; class App {}"),
        file("from/src/util.js", b"export const x = 1;"),
        file("from/.eslintrc.js", b"module.exports = {};"),
        NewResource::directory("to/app.jar-extract"),
        file("to/app.jar", b"PK jar"),
        file("to/app.jar-extract/a/App.class", b"\xca\xfe"),
        file("to/dist/util.js", b"export const x = 1;"),
        file("to/dist/util.JS.map", b"{}"),
    ]
}

fn paths(resources: &[d2d_harness_core::models::Resource]) -> Vec<String> {
    resources.iter().map(|r| r.path.clone()).collect()
}

#[tokio::test]
async fn insert_and_lookup() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;

    let ids = store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();
    assert_eq!(ids.len(), 9);

    let class = store
        .get_resource_by_path(project, "/to/app.jar-extract/a/App.class")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(class.id, ids[6]);
    assert_eq!(class.name, "App.class");
    assert_eq!(class.extension, ".class");
    assert_eq!(class.side(), Some(CodebaseSide::To));
    assert!(class.status.is_none());

    let dir = store.get_resource(project, ids[0]).await.unwrap().unwrap();
    assert!(!dir.is_file);
    assert_eq!(dir.extension, "");

    assert!(store.get_resource(project + 1, ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn filters_agree_with_in_memory_store() {
    let tmp = TempDir::new().unwrap();
    let (sqlite, project) = setup(&tmp).await;
    let memory = InMemoryStore::new();

    let resources = sample_resources();
    let sqlite_ids = sqlite.insert_resources(project, &resources).await.unwrap();
    let memory_ids = memory.insert_resources(project, &resources).await.unwrap();

    for (store, ids) in [
        (&sqlite as &dyn ResourceStore, &sqlite_ids),
        (&memory as &dyn ResourceStore, &memory_ids),
    ] {
        store
            .set_status(project, ids[5], Status::MatchedToPurldb)
            .await
            .unwrap();
        store
            .create_relation(project, &NewRelation::new(ids[2], ids[7], MapType::Sha1))
            .await
            .unwrap();
    }

    let sha1 = sha1_hex(b"export const x = 1;");
    let filters = vec![
        ResourceFilter::files(CodebaseSide::From),
        ResourceFilter::unmatched_files(CodebaseSide::To),
        ResourceFilter::default().with_status(StatusFilter::NonEmpty),
        ResourceFilter::default().with_status(StatusFilter::Is(Status::MatchedToPurldb)),
        ResourceFilter::files(CodebaseSide::To).with_extensions(&[".class", ".map"]),
        ResourceFilter::files(CodebaseSide::From).without_dotfiles(),
        ResourceFilter::default().with_checksum_eq(ChecksumField::Sha1, &sha1),
        ResourceFilter::default().with_checksum(ChecksumField::Sha1),
        ResourceFilter::default().with_path_prefix("to/app.jar-extract/"),
        ResourceFilter::default().with_path_suffixes(vec!["/util.js".to_string()]),
        ResourceFilter::default().with_relation(RelationFilter::HasRelation),
        ResourceFilter::files(CodebaseSide::To).with_relation(RelationFilter::HasNoRelation),
        ResourceFilter {
            is_file: Some(false),
            ..Default::default()
        },
    ];

    for filter in &filters {
        let from_sqlite = sqlite.list_resources(project, filter).await.unwrap();
        let from_memory = memory.list_resources(project, filter).await.unwrap();
        assert_eq!(paths(&from_sqlite), paths(&from_memory), "filter {:?}", filter);
        assert_eq!(
            sqlite.count_resources(project, filter).await.unwrap(),
            from_memory.len() as u64
        );
    }
}

#[tokio::test]
async fn status_is_terminal_and_relations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;
    let ids = store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();

    assert!(store.set_status(project, ids[6], Status::Mapped).await.unwrap());
    assert!(!store
        .set_status(project, ids[6], Status::NoJavaSource)
        .await
        .unwrap());
    let class = store.get_resource(project, ids[6]).await.unwrap().unwrap();
    assert_eq!(class.status, Some(Status::Mapped));

    let relation = NewRelation::new(ids[1], ids[6], MapType::JavaToClass).with_extra(RelationExtra {
        from_source_root: Some("from/src/".to_string()),
        ..Default::default()
    });
    assert!(store.create_relation(project, &relation).await.unwrap());
    assert!(!store.create_relation(project, &relation).await.unwrap());
    assert!(store.has_relation(project, ids[1]).await.unwrap());
    assert!(!store.has_relation(project, ids[2]).await.unwrap());

    let found = store
        .relations_to(project, &[ids[6], ids[7]], Some(MapType::JavaToClass))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].extra.from_source_root.as_deref(), Some("from/src/"));
    assert!(store
        .relations_to(project, &[ids[6]], Some(MapType::Sha1))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(store.list_relations(project, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn extra_data_round_trips() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;
    let ids = store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();

    let extra = ResourceExtra {
        java_package: Some("a".to_string()),
    };
    store.set_extra(project, ids[1], &extra).await.unwrap();
    let java = store.get_resource(project, ids[1]).await.unwrap().unwrap();
    assert_eq!(java.extra, extra);
}

#[tokio::test]
async fn pager_walks_all_pages() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;
    store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();

    let mut pager = Pager::new(ResourceFilter::default(), 4);
    let mut sizes = Vec::new();
    while let Some(batch) = pager.next_batch(&store, project).await.unwrap() {
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![4, 4, 1]);
}

#[tokio::test]
async fn content_is_read_from_codebase() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;
    let codebase = tmp.path().join("projects/acme/codebase");
    write(&codebase, "from/src/util.js", b"export const x = 1;");

    store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();
    let js = store
        .get_resource_by_path(project, "from/src/util.js")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        store.read_content(project, &js).await.unwrap(),
        b"export const x = 1;"
    );

    let missing = store
        .get_resource_by_path(project, "to/dist/util.js")
        .await
        .unwrap()
        .unwrap();
    assert!(store.read_content(project, &missing).await.is_err());
}

fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn packages_upsert_by_purl() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;
    let ids = store
        .insert_resources(project, &sample_resources())
        .await
        .unwrap();

    let mut package = Package {
        package_type: "maven".to_string(),
        namespace: Some("org.acme".to_string()),
        name: "app".to_string(),
        version: Some("1.0".to_string()),
        ..Default::default()
    };
    let first = store.upsert_package(project, &package).await.unwrap();
    package.homepage_url = Some("https://acme.org".to_string());
    let second = store.upsert_package(project, &package).await.unwrap();
    assert_eq!(first, second);

    store
        .assign_package(project, first, &[ids[5], ids[6]])
        .await
        .unwrap();
    store.assign_package(project, first, &[ids[5]]).await.unwrap();

    let packages = store.list_packages(project).await.unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].1.purl(), "pkg:maven/org.acme/app@1.0");
    assert_eq!(packages[0].1.homepage_url.as_deref(), Some("https://acme.org"));

    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM package_resources WHERE package_id = ?")
        .bind(first)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(links, 2);
}

#[tokio::test]
async fn side_roots_belong_to_their_side() {
    let tmp = TempDir::new().unwrap();
    let (sqlite, project) = setup(&tmp).await;
    let memory = InMemoryStore::new();

    let resources = vec![
        NewResource::directory("from"),
        NewResource::directory("to"),
        NewResource::directory("from/src"),
        NewResource::directory("fromage"),
        file("to/app.js", b"x"),
    ];
    sqlite.insert_resources(project, &resources).await.unwrap();
    memory.insert_resources(project, &resources).await.unwrap();

    let directories = |side| ResourceFilter {
        side: Some(side),
        is_file: Some(false),
        ..Default::default()
    };
    for (side, expected) in [
        (CodebaseSide::From, vec!["from", "from/src"]),
        (CodebaseSide::To, vec!["to"]),
    ] {
        let from_sqlite = sqlite.list_resources(project, &directories(side)).await.unwrap();
        let from_memory = memory.list_resources(project, &directories(side)).await.unwrap();
        assert_eq!(paths(&from_sqlite), expected);
        assert_eq!(paths(&from_memory), expected);
    }
}

#[tokio::test]
async fn relations_to_handles_long_id_lists() {
    let tmp = TempDir::new().unwrap();
    let (store, project) = setup(&tmp).await;

    let mut resources = vec![file("from/App.java", b"class App {}")];
    for i in 0..1200 {
        resources.push(file(&format!("to/classes/C{}.class", i), format!("{}", i).as_bytes()));
    }
    let ids = store.insert_resources(project, &resources).await.unwrap();
    for to_id in &ids[1..] {
        store
            .create_relation(project, &NewRelation::new(ids[0], *to_id, MapType::JavaToClass))
            .await
            .unwrap();
    }

    let relations = store
        .relations_to(project, &ids[1..], Some(MapType::JavaToClass))
        .await
        .unwrap();
    assert_eq!(relations.len(), 1200);
    assert!(relations.windows(2).all(|w| w[0].id < w[1].id));
}
