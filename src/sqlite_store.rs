//! SQLite-backed [`ResourceStore`] implementation.
//!
//! Resource filters are translated into a single `SELECT` built with
//! [`QueryBuilder`], so pagination, relation existence and checksum
//! conditions are all evaluated by SQLite. File contents are read from the
//! project's codebase directory on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use d2d_harness_core::models::{
    ChecksumField, NewRelation, NewResource, Package, ProjectId, Relation, Resource,
    ResourceExtra, ResourceId, Status, MapType,
};
use d2d_harness_core::store::{RelationFilter, ResourceFilter, ResourceStore, StatusFilter};

use crate::project::codebase_dir;

/// Ids bound per `IN (...)` list, well below SQLite's variable limit.
const MAX_BOUND_IDS: usize = 500;

const RESOURCE_COLUMNS: &str = "r.id, r.project_id, r.path, r.name, r.extension, r.size, \
     r.is_file, r.is_text, r.sha1, r.md5, r.status, r.extra_json";

/// SQLite implementation of the [`ResourceStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    codebases: Mutex<HashMap<ProjectId, PathBuf>>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            codebases: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Remove every resource of a project together with its relations and
    /// package links, in one transaction.
    pub async fn clear_resources(&self, project: ProjectId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM package_resources WHERE resource_id IN \
             (SELECT id FROM resources WHERE project_id = ?)",
        )
        .bind(project)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM relations WHERE project_id = ?")
            .bind(project)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM resources WHERE project_id = ?")
            .bind(project)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted)
    }

    async fn codebase(&self, project: ProjectId) -> Result<PathBuf> {
        if let Some(dir) = self.codebases.lock().ok().and_then(|c| c.get(&project).cloned()) {
            return Ok(dir);
        }
        let work_dir: Option<String> =
            sqlx::query_scalar("SELECT work_dir FROM projects WHERE id = ?")
                .bind(project)
                .fetch_optional(&self.pool)
                .await?;
        let Some(work_dir) = work_dir else {
            anyhow::bail!("Project {} does not exist", project);
        };
        let dir = codebase_dir(&PathBuf::from(work_dir));
        if let Ok(mut cache) = self.codebases.lock() {
            cache.insert(project, dir.clone());
        }
        Ok(dir)
    }
}

fn checksum_column(field: ChecksumField) -> &'static str {
    match field {
        ChecksumField::Sha1 => "r.sha1",
        ChecksumField::Md5 => "r.md5",
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, project: ProjectId, filter: &ResourceFilter) {
    qb.push(" WHERE r.project_id = ").push_bind(project);

    if let Some(side) = filter.side {
        let prefix = side.prefix();
        qb.push(" AND (r.path = ")
            .push_bind(side.root())
            .push(" OR substr(r.path, 1, length(")
            .push_bind(prefix.clone())
            .push(")) = ")
            .push_bind(prefix)
            .push(")");
    }
    if let Some(prefix) = &filter.path_prefix {
        qb.push(" AND substr(r.path, 1, length(")
            .push_bind(prefix.clone())
            .push(")) = ")
            .push_bind(prefix.clone());
    }

    if let Some(is_file) = filter.is_file {
        qb.push(" AND r.is_file = ").push_bind(is_file);
    }
    match filter.status {
        StatusFilter::Any => {}
        StatusFilter::Empty => {
            qb.push(" AND r.status IS NULL");
        }
        StatusFilter::NonEmpty => {
            qb.push(" AND r.status IS NOT NULL");
        }
        StatusFilter::Is(status) => {
            qb.push(" AND r.status = ").push_bind(status.as_str());
        }
    }

    let related = "EXISTS (SELECT 1 FROM relations rel WHERE rel.project_id = r.project_id \
                   AND (rel.from_id = r.id OR rel.to_id = r.id))";
    match filter.relation {
        RelationFilter::Any => {}
        RelationFilter::HasRelation => {
            qb.push(" AND ").push(related);
        }
        RelationFilter::HasNoRelation => {
            qb.push(" AND NOT ").push(related);
        }
    }

    if !filter.extensions.is_empty() {
        qb.push(" AND r.extension IN (");
        let mut separated = qb.separated(", ");
        for ext in &filter.extensions {
            separated.push_bind(ext.clone());
        }
        separated.push_unseparated(")");
    }
    if let Some(field) = filter.has_checksum {
        let column = checksum_column(field);
        qb.push(format!(" AND {} IS NOT NULL AND {} != ''", column, column));
    }
    if let Some((field, value)) = &filter.checksum_eq {
        qb.push(format!(" AND {} = ", checksum_column(*field)))
            .push_bind(value.clone());
    }
    if !filter.path_suffixes.is_empty() {
        qb.push(" AND (");
        for (i, suffix) in filter.path_suffixes.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("substr(r.path, -length(")
                .push_bind(suffix.clone())
                .push(")) = ")
                .push_bind(suffix.clone());
        }
        qb.push(")");
    }
    if filter.exclude_dotfiles {
        qb.push(" AND r.name NOT LIKE '.%'");
    }
    if let Some(after) = filter.after_id {
        qb.push(" AND r.id > ").push_bind(after);
    }
}

fn row_to_resource(row: &SqliteRow) -> Result<Resource> {
    let status: Option<String> = row.get("status");
    let extra_json: String = row.get("extra_json");
    let size: i64 = row.get("size");
    Ok(Resource {
        id: row.get("id"),
        project_id: row.get("project_id"),
        path: row.get("path"),
        name: row.get("name"),
        extension: row.get("extension"),
        size: size.max(0) as u64,
        is_file: row.get("is_file"),
        is_text: row.get("is_text"),
        sha1: row.get("sha1"),
        md5: row.get("md5"),
        status: status.map(|s| s.parse::<Status>()).transpose()?,
        extra: serde_json::from_str(&extra_json)
            .with_context(|| format!("Invalid extra data on resource {}", row.get::<i64, _>("id")))?,
    })
}

fn row_to_relation(row: &SqliteRow) -> Result<Relation> {
    let map_type: String = row.get("map_type");
    let extra_json: String = row.get("extra_json");
    Ok(Relation {
        id: row.get("id"),
        project_id: row.get("project_id"),
        from_id: row.get("from_id"),
        to_id: row.get("to_id"),
        map_type: map_type.parse()?,
        extra: serde_json::from_str(&extra_json)?,
    })
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn insert_resources(
        &self,
        project: ProjectId,
        resources: &[NewResource],
    ) -> Result<Vec<ResourceId>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(resources.len());

        for resource in resources {
            let result = sqlx::query(
                r#"
                INSERT INTO resources (project_id, path, name, extension, size, is_file,
                                       is_text, sha1, md5)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(project)
            .bind(resource.path.trim_matches('/'))
            .bind(resource.name())
            .bind(resource.extension())
            .bind(resource.size as i64)
            .bind(resource.is_file)
            .bind(resource.is_text)
            .bind(&resource.sha1)
            .bind(&resource.md5)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert resource {}", resource.path))?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn list_resources(
        &self,
        project: ProjectId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM resources r", RESOURCE_COLUMNS));
        push_filter(&mut qb, project, filter);
        qb.push(" ORDER BY r.id");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_resource).collect()
    }

    async fn count_resources(&self, project: ProjectId, filter: &ResourceFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM resources r");
        push_filter(&mut qb, project, filter);
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn get_resource(&self, project: ProjectId, id: ResourceId) -> Result<Option<Resource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM resources r WHERE r.project_id = ? AND r.id = ?",
            RESOURCE_COLUMNS
        ))
        .bind(project)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn get_resource_by_path(
        &self,
        project: ProjectId,
        path: &str,
    ) -> Result<Option<Resource>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM resources r WHERE r.project_id = ? AND r.path = ?",
            RESOURCE_COLUMNS
        ))
        .bind(project)
        .bind(path.trim_matches('/'))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn set_status(
        &self,
        project: ProjectId,
        id: ResourceId,
        status: Status,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE resources SET status = ? WHERE project_id = ? AND id = ? AND status IS NULL",
        )
        .bind(status.as_str())
        .bind(project)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_extra(
        &self,
        project: ProjectId,
        id: ResourceId,
        extra: &ResourceExtra,
    ) -> Result<()> {
        sqlx::query("UPDATE resources SET extra_json = ? WHERE project_id = ? AND id = ?")
            .bind(serde_json::to_string(extra)?)
            .bind(project)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_relation(&self, project: ProjectId, relation: &NewRelation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO relations (project_id, from_id, to_id, map_type, extra_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(project)
        .bind(relation.from_id)
        .bind(relation.to_id)
        .bind(relation.map_type.as_str())
        .bind(serde_json::to_string(&relation.extra)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn has_relation(&self, project: ProjectId, id: ResourceId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM relations WHERE project_id = ? AND (from_id = ? OR to_id = ?))",
        )
        .bind(project)
        .bind(id)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn relations_to(
        &self,
        project: ProjectId,
        to_ids: &[ResourceId],
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>> {
        let mut relations = Vec::new();
        for ids in to_ids.chunks(MAX_BOUND_IDS) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT id, project_id, from_id, to_id, map_type, extra_json FROM relations WHERE project_id = ",
            );
            qb.push_bind(project);
            if let Some(map_type) = map_type {
                qb.push(" AND map_type = ").push_bind(map_type.as_str());
            }
            qb.push(" AND to_id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                relations.push(row_to_relation(row)?);
            }
        }
        relations.sort_by_key(|r| r.id);
        Ok(relations)
    }

    async fn list_relations(
        &self,
        project: ProjectId,
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, project_id, from_id, to_id, map_type, extra_json FROM relations WHERE project_id = ",
        );
        qb.push_bind(project);
        if let Some(map_type) = map_type {
            qb.push(" AND map_type = ").push_bind(map_type.as_str());
        }
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_relation).collect()
    }

    async fn read_content(&self, project: ProjectId, resource: &Resource) -> Result<Vec<u8>> {
        let path = self.codebase(project).await?.join(&resource.path);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn upsert_package(&self, project: ProjectId, package: &Package) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO packages (project_id, purl, data_json)
            VALUES (?, ?, ?)
            ON CONFLICT(project_id, purl) DO UPDATE SET data_json = excluded.data_json
            RETURNING id
            "#,
        )
        .bind(project)
        .bind(package.purl())
        .bind(serde_json::to_string(package)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn assign_package(
        &self,
        _project: ProjectId,
        package_id: i64,
        resource_ids: &[ResourceId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in resource_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO package_resources (package_id, resource_id) VALUES (?, ?)",
            )
            .bind(package_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_packages(&self, project: ProjectId) -> Result<Vec<(i64, Package)>> {
        let rows = sqlx::query("SELECT id, data_json FROM packages WHERE project_id = ? ORDER BY id")
            .bind(project)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let data_json: String = row.get("data_json");
                Ok((row.get("id"), serde_json::from_str(&data_json)?))
            })
            .collect()
    }
}
