//! `d2d relations` and `d2d resources`: read-only views of a project.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use d2d_harness_core::models::{CodebaseSide, MapType, RelationExtra, Resource};
use d2d_harness_core::store::{ResourceFilter, ResourceStore, StatusFilter};

use crate::config::Config;
use crate::db;
use crate::project::find_project;
use crate::sqlite_store::SqliteStore;

/// A relation with both endpoint paths resolved.
#[derive(Debug, Clone, Serialize)]
pub struct RelationView {
    pub id: i64,
    pub map_type: MapType,
    pub from_path: String,
    pub to_path: String,
    #[serde(flatten)]
    pub extra: RelationExtra,
}

pub async fn load_relations(
    pool: &SqlitePool,
    project_id: i64,
    map_type: Option<MapType>,
) -> Result<Vec<RelationView>> {
    let rows = sqlx::query(
        r#"
        SELECT rel.id, rel.map_type, rel.extra_json, f.path AS from_path, t.path AS to_path
        FROM relations rel
        JOIN resources f ON f.id = rel.from_id
        JOIN resources t ON t.id = rel.to_id
        WHERE rel.project_id = ? AND (? IS NULL OR rel.map_type = ?)
        ORDER BY rel.id
        "#,
    )
    .bind(project_id)
    .bind(map_type.map(|m| m.as_str()))
    .bind(map_type.map(|m| m.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let map_type: String = row.get("map_type");
            let extra_json: String = row.get("extra_json");
            Ok(RelationView {
                id: row.get("id"),
                map_type: map_type.parse()?,
                from_path: row.get("from_path"),
                to_path: row.get("to_path"),
                extra: serde_json::from_str(&extra_json)?,
            })
        })
        .collect()
}

fn path_matcher(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    pattern
        .map(|p| {
            Glob::new(p)
                .map(|g| g.compile_matcher())
                .with_context(|| format!("Invalid path pattern: {}", p))
        })
        .transpose()
}

/// Keep relations where either endpoint matches `pattern`.
pub fn filter_by_path(
    relations: Vec<RelationView>,
    pattern: Option<&str>,
) -> Result<Vec<RelationView>> {
    let Some(matcher) = path_matcher(pattern)? else {
        return Ok(relations);
    };
    Ok(relations
        .into_iter()
        .filter(|r| matcher.is_match(&r.from_path) || matcher.is_match(&r.to_path))
        .collect())
}

fn describe_extra(extra: &RelationExtra) -> String {
    let mut parts = Vec::new();
    if let Some(score) = &extra.path_score {
        parts.push(format!("score={}", score));
    }
    if let Some(ratio) = &extra.diff_ratio {
        parts.push(format!("diff_ratio={}", ratio));
    }
    if let Some(root) = &extra.from_source_root {
        parts.push(format!("source_root={}", root));
    }
    parts.join(" ")
}

pub async fn run_relations(
    config: &Config,
    project_name: &str,
    map_type: Option<&str>,
    path: Option<&str>,
    json: bool,
) -> Result<()> {
    let map_type = map_type.map(|m| m.parse::<MapType>()).transpose()?;
    let pool = db::connect(config).await?;
    let project = find_project(&pool, project_name).await?;
    let relations = filter_by_path(load_relations(&pool, project.id, map_type).await?, path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&relations)?);
        return Ok(());
    }
    if relations.is_empty() {
        println!("No relations.");
        return Ok(());
    }
    for relation in &relations {
        let extra = describe_extra(&relation.extra);
        println!(
            "{:<14} {} -> {}{}{}",
            relation.map_type.as_str(),
            relation.from_path,
            relation.to_path,
            if extra.is_empty() { "" } else { "  " },
            extra
        );
    }
    println!("{} relation(s)", relations.len());
    Ok(())
}

/// `none` selects resources without a status.
pub fn parse_status_filter(status: Option<&str>) -> Result<StatusFilter> {
    match status {
        None => Ok(StatusFilter::Any),
        Some("none") | Some("unmatched") => Ok(StatusFilter::Empty),
        Some(s) => Ok(StatusFilter::Is(s.parse()?)),
    }
}

pub async fn list_project_resources(
    store: &SqliteStore,
    project_id: i64,
    status: StatusFilter,
    side: Option<CodebaseSide>,
) -> Result<Vec<Resource>> {
    let filter = ResourceFilter {
        side,
        ..Default::default()
    }
    .with_status(status);
    store.list_resources(project_id, &filter).await
}

pub async fn run_resources(
    config: &Config,
    project_name: &str,
    status: Option<&str>,
    side: Option<&str>,
    json: bool,
) -> Result<()> {
    let status = parse_status_filter(status)?;
    let side = side.map(|s| s.parse::<CodebaseSide>()).transpose()?;
    let pool = db::connect(config).await?;
    let project = find_project(&pool, project_name).await?;
    let store = SqliteStore::new(pool);
    let resources = list_project_resources(&store, project.id, status, side).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }
    for resource in &resources {
        let status = resource.status.map(|s| s.as_str()).unwrap_or("-");
        let kind = if resource.is_file { "file" } else { "dir" };
        println!(
            "{:<20} {:<4} {:>10}  {}",
            status, kind, resource.size, resource.path
        );
    }
    println!("{} resource(s)", resources.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(from: &str, to: &str) -> RelationView {
        RelationView {
            id: 1,
            map_type: MapType::Path,
            from_path: from.to_string(),
            to_path: to.to_string(),
            extra: RelationExtra::default(),
        }
    }

    #[test]
    fn path_filter_matches_either_endpoint() {
        let relations = vec![
            view("from/src/a.js", "to/dist/a.js"),
            view("from/lib/B.java", "to/app.jar-extract/B.class"),
        ];
        let kept = filter_by_path(relations.clone(), Some("**/*.class")).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].from_path, "from/lib/B.java");

        let kept = filter_by_path(relations.clone(), Some("from/src/**")).unwrap();
        assert_eq!(kept.len(), 1);

        assert_eq!(filter_by_path(relations, None).unwrap().len(), 2);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(filter_by_path(vec![], Some("a[")).is_err());
    }

    #[test]
    fn status_filters() {
        assert_eq!(parse_status_filter(None).unwrap(), StatusFilter::Any);
        assert_eq!(parse_status_filter(Some("none")).unwrap(), StatusFilter::Empty);
        assert_eq!(
            parse_status_filter(Some("mapped")).unwrap(),
            StatusFilter::Is(d2d_harness_core::models::Status::Mapped)
        );
        assert!(parse_status_filter(Some("bogus")).is_err());
    }

    #[test]
    fn extra_description() {
        let extra = RelationExtra {
            path_score: Some("2/3".to_string()),
            diff_ratio: Some("87.5%".to_string()),
            from_source_root: None,
        };
        assert_eq!(describe_extra(&extra), "score=2/3 diff_ratio=87.5%");
    }
}
