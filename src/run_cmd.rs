//! `d2d run` and `d2d pipelines`.
//!
//! A run is recorded in the `runs` table before the first step starts and
//! closed with `success` or `failure`. On failure the failing step and the
//! run log up to that point are kept with the record.

use anyhow::Result;
use sqlx::SqlitePool;

use d2d_harness_core::pipeline::{Orchestrator, PipelineRegistry, RunSummary, StepError};
use d2d_harness_core::progress::ProgressReporter;

use crate::config::Config;
use crate::db;
use crate::project::find_project;
use crate::purldb::PurlDbClient;
use crate::sqlite_store::SqliteStore;

pub const DEFAULT_PIPELINE: &str = "deploy_to_develop";

async fn start_run(
    pool: &SqlitePool,
    project_id: i64,
    pipeline: &str,
    groups: &[String],
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO runs (project_id, pipeline, groups_json, started_at, status)
        VALUES (?, ?, ?, ?, 'running')
        RETURNING id
        "#,
    )
    .bind(project_id)
    .bind(pipeline)
    .bind(serde_json::to_string(groups)?)
    .bind(chrono::Utc::now().timestamp())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn finish_run(
    pool: &SqlitePool,
    run_id: i64,
    status: &str,
    failed_step: Option<&str>,
    log: &[String],
) -> Result<()> {
    sqlx::query("UPDATE runs SET ended_at = ?, status = ?, failed_step = ?, log = ? WHERE id = ?")
        .bind(chrono::Utc::now().timestamp())
        .bind(status)
        .bind(failed_step)
        .bind(log.join("\n"))
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn run_pipeline(
    config: &Config,
    project_name: &str,
    pipeline_name: &str,
    groups: &[String],
    reporter: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let registry = PipelineRegistry::builtin();
    let pipeline = registry.get(pipeline_name)?;

    let pool = db::connect(config).await?;
    let project = find_project(&pool, project_name).await?;
    let store = SqliteStore::new(pool.clone());
    let options = config.match_options();
    let client = PurlDbClient::from_config(&config.purldb)?;

    let mut orchestrator = Orchestrator::new(&store, &options, reporter);
    if let Some(client) = &client {
        orchestrator = orchestrator.with_identity_service(client);
    }

    let run_id = start_run(&pool, project.id, &pipeline.name, groups).await?;
    match orchestrator.run(project.id, pipeline, groups).await {
        Ok(summary) => {
            finish_run(&pool, run_id, "success", None, &summary.log).await?;
            Ok(summary)
        }
        Err(err) => {
            match err.downcast_ref::<StepError>() {
                Some(step_err) => {
                    finish_run(&pool, run_id, "failure", Some(&step_err.step), &step_err.log)
                        .await?
                }
                None => finish_run(&pool, run_id, "failure", None, &[format!("{:#}", err)]).await?,
            }
            Err(err)
        }
    }
}

fn print_summary(project: &str, summary: &RunSummary) {
    println!("run {} on {} ok", summary.pipeline, project);
    if !summary.groups.is_empty() {
        println!("  groups: {}", summary.groups.join(", "));
    }
    for step in &summary.steps {
        println!(
            "  {:<56} {:>8} processed {:>8} relations {:>8} statuses {:>8.2}s",
            step.name,
            step.stats.processed,
            step.stats.relations_created,
            step.stats.statuses_set,
            step.elapsed.as_secs_f64()
        );
    }
    println!("  relations created: {}", summary.relations_created());
    for (status, count) in &summary.status_counts {
        println!("  {}: {}", status, count);
    }
    println!("  unmatched: {}", summary.unmatched);
}

pub async fn run_run(
    config: &Config,
    project_name: &str,
    pipeline_name: &str,
    groups: &[String],
    json: bool,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let summary = run_pipeline(config, project_name, pipeline_name, groups, reporter).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(project_name, &summary);
    }
    Ok(())
}

pub fn run_list_pipelines() -> Result<()> {
    let registry = PipelineRegistry::builtin();
    for pipeline in registry.list() {
        println!("{}", pipeline.name);
        println!("  {}", pipeline.description);
        for step in &pipeline.steps {
            if step.groups.is_empty() {
                println!("    {}", step.step.name());
            } else {
                println!("    {} [{}]", step.step.name(), step.groups.join(", "));
            }
        }
    }
    Ok(())
}
