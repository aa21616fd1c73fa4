//! Export a project's matching results as JSON.
//!
//! The document holds every resource, every relation with its endpoint
//! paths, and every discovered package with its Package URL and the paths
//! of the resources it was assigned to.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use d2d_harness_core::models::{Package, Resource};
use d2d_harness_core::store::{ResourceFilter, ResourceStore};

use crate::config::Config;
use crate::db;
use crate::project::{find_project, ProjectRecord};
use crate::query::{load_relations, RelationView};
use crate::sqlite_store::SqliteStore;

#[derive(Serialize)]
pub struct ExportData {
    pub project: String,
    pub exported_at: String,
    pub resources: Vec<Resource>,
    pub relations: Vec<RelationView>,
    pub packages: Vec<ExportPackage>,
}

#[derive(Serialize)]
pub struct ExportPackage {
    pub purl: String,
    #[serde(flatten)]
    pub package: Package,
    pub resources: Vec<String>,
}

async fn package_paths(pool: &SqlitePool, project_id: i64) -> Result<BTreeMap<i64, Vec<String>>> {
    let rows = sqlx::query(
        r#"
        SELECT pr.package_id, r.path
        FROM package_resources pr
        JOIN resources r ON r.id = pr.resource_id
        WHERE r.project_id = ?
        ORDER BY pr.package_id, r.path
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut paths: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for row in rows {
        paths
            .entry(row.get("package_id"))
            .or_default()
            .push(row.get("path"));
    }
    Ok(paths)
}

pub async fn build_export(store: &SqliteStore, project: &ProjectRecord) -> Result<ExportData> {
    let resources = store
        .list_resources(project.id, &ResourceFilter::default())
        .await?;
    let relations = load_relations(store.pool(), project.id, None).await?;
    let mut paths = package_paths(store.pool(), project.id).await?;
    let packages = store
        .list_packages(project.id)
        .await?
        .into_iter()
        .map(|(id, package)| ExportPackage {
            purl: package.purl(),
            package,
            resources: paths.remove(&id).unwrap_or_default(),
        })
        .collect();

    Ok(ExportData {
        project: project.name.clone(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        resources,
        relations,
        packages,
    })
}

/// Export a project as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, project_name: &str, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let project = find_project(&pool, project_name).await?;
    let store = SqliteStore::new(pool);
    let data = build_export(&store, &project).await?;
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} resources, {} relations, {} packages to {}",
                data.resources.len(),
                data.relations.len(),
                data.packages.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
