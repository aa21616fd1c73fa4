use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        work_dir TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        path TEXT NOT NULL,
        name TEXT NOT NULL,
        extension TEXT NOT NULL DEFAULT '',
        size INTEGER NOT NULL DEFAULT 0,
        is_file INTEGER NOT NULL,
        is_text INTEGER NOT NULL DEFAULT 0,
        sha1 TEXT,
        md5 TEXT,
        status TEXT,
        extra_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(project_id, path),
        FOREIGN KEY (project_id) REFERENCES projects(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        from_id INTEGER NOT NULL,
        to_id INTEGER NOT NULL,
        map_type TEXT NOT NULL,
        extra_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(project_id, from_id, to_id, map_type),
        FOREIGN KEY (from_id) REFERENCES resources(id),
        FOREIGN KEY (to_id) REFERENCES resources(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS packages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        purl TEXT NOT NULL,
        data_json TEXT NOT NULL,
        UNIQUE(project_id, purl),
        FOREIGN KEY (project_id) REFERENCES projects(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS package_resources (
        package_id INTEGER NOT NULL,
        resource_id INTEGER NOT NULL,
        PRIMARY KEY (package_id, resource_id),
        FOREIGN KEY (package_id) REFERENCES packages(id),
        FOREIGN KEY (resource_id) REFERENCES resources(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        pipeline TEXT NOT NULL,
        groups_json TEXT NOT NULL DEFAULT '[]',
        started_at INTEGER NOT NULL,
        ended_at INTEGER,
        status TEXT NOT NULL,
        failed_step TEXT,
        log TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (project_id) REFERENCES projects(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_resources_status ON resources(project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_resources_sha1 ON resources(project_id, sha1)",
    "CREATE INDEX IF NOT EXISTS idx_resources_md5 ON resources(project_id, md5)",
    "CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(project_id, from_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(project_id, to_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_project ON runs(project_id, started_at DESC)",
];

/// Apply the schema to an open pool. Every statement is idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}
