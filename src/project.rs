//! Projects: named work directories holding the uploaded inputs and the
//! extracted codebase.
//!
//! ```text
//! <workspace.root>/<name>/
//!     input/       files passed to `d2d project create`
//!     codebase/
//!         from/    development side, populated by `d2d ingest`
//!         to/      deployment side
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::inputs::copy_input;

pub const INPUT_DIR: &str = "input";
pub const CODEBASE_DIR: &str = "codebase";

pub fn input_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(INPUT_DIR)
}

pub fn codebase_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(CODEBASE_DIR)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub name: String,
    pub work_dir: PathBuf,
    pub created_at: i64,
}

impl ProjectRecord {
    pub fn input_dir(&self) -> PathBuf {
        input_dir(&self.work_dir)
    }

    pub fn codebase_dir(&self) -> PathBuf {
        codebase_dir(&self.work_dir)
    }
}

/// Project names become directory names: ASCII letters, digits, `-`, `_`
/// and `.`, not starting with `.`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Project name must not be empty");
    }
    if name.starts_with('.') {
        bail!("Project name must not start with '.': '{}'", name);
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        bail!("Invalid character '{}' in project name '{}'", c, name);
    }
    Ok(())
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> ProjectRecord {
    let work_dir: String = row.get("work_dir");
    ProjectRecord {
        id: row.get("id"),
        name: row.get("name"),
        work_dir: PathBuf::from(work_dir),
        created_at: row.get("created_at"),
    }
}

pub async fn find_project(pool: &SqlitePool, name: &str) -> Result<ProjectRecord> {
    let row = sqlx::query("SELECT id, name, work_dir, created_at FROM projects WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(row_to_project(&row)),
        None => bail!("Project not found: '{}'. Create it with `d2d project create`.", name),
    }
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<ProjectRecord>> {
    let rows = sqlx::query("SELECT id, name, work_dir, created_at FROM projects ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_project).collect())
}

/// Register a project and copy `inputs` into its `input/` directory.
pub async fn create_project(
    pool: &SqlitePool,
    config: &Config,
    name: &str,
    inputs: &[PathBuf],
) -> Result<ProjectRecord> {
    validate_name(name)?;
    if inputs.is_empty() {
        bail!("At least one --input is required");
    }
    for input in inputs {
        if !input.exists() {
            bail!("Input does not exist: {}", input.display());
        }
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE name = ?)")
        .bind(name)
        .fetch_one(pool)
        .await?;
    if exists {
        bail!("Project already exists: '{}'", name);
    }

    let work_dir = config.project_dir(name);
    if work_dir.exists() {
        bail!("Work directory already exists: {}", work_dir.display());
    }
    let input_dir = input_dir(&work_dir);
    std::fs::create_dir_all(&input_dir)
        .with_context(|| format!("Failed to create {}", input_dir.display()))?;
    for input in inputs {
        copy_input(input, &input_dir)?;
    }

    let work_dir = std::fs::canonicalize(&work_dir).unwrap_or(work_dir);
    let created_at = chrono::Utc::now().timestamp();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO projects (name, work_dir, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(work_dir.to_string_lossy().to_string())
    .bind(created_at)
    .fetch_one(pool)
    .await?;

    tracing::info!("Created project {} in {}", name, work_dir.display());
    Ok(ProjectRecord {
        id,
        name: name.to_string(),
        work_dir,
        created_at,
    })
}

pub async fn run_project_create(config: &Config, name: &str, inputs: &[PathBuf]) -> Result<()> {
    let pool = db::connect(config).await?;
    let project = create_project(&pool, config, name, inputs).await?;
    println!("Created project {} (id {})", project.name, project.id);
    println!("  work dir: {}", project.work_dir.display());
    println!("  inputs: {}", inputs.len());
    Ok(())
}

pub async fn run_project_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let projects = list_projects(&pool).await?;
    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    println!("{:<24} {:>8}  {:<20}  WORK DIR", "NAME", "FILES", "CREATED");
    for project in projects {
        let files: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resources WHERE project_id = ? AND is_file = 1",
        )
        .bind(project.id)
        .fetch_one(&pool)
        .await?;
        let created = chrono::DateTime::from_timestamp(project.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{:<24} {:>8}  {:<20}  {}",
            project.name,
            files,
            created,
            project.work_dir.display()
        );
    }
    Ok(())
}
