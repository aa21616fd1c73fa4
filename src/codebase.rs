//! Codebase ingestion (`d2d ingest`).
//!
//! Materializes a project's inputs as `codebase/from/` and `codebase/to/`,
//! unpacks nested archives, then walks both trees and records every file
//! and directory as a resource with its checksums, size and text flag.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use md5::{Digest, Md5};
use walkdir::WalkDir;

use d2d_harness_core::models::{NewResource, ProjectId, FROM_ROOT, TO_ROOT};
use d2d_harness_core::progress::{LoopProgress, ProgressReporter};
use d2d_harness_core::store::{ResourceFilter, ResourceStore};
use d2d_harness_core::text::{is_text_content, sha1_hex};

use crate::config::Config;
use crate::db;
use crate::inputs::{extract_nested_archives, resolve_inputs, stage_input};
use crate::project::{find_project, ProjectRecord};
use crate::sqlite_store::SqliteStore;

const INGEST_STEP: &str = "ingest";

/// Counts reported by [`ingest_project`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: u64,
    pub directories: u64,
    pub archives_extracted: usize,
}

/// Describe one filesystem entry. `relative` is the `/`-separated path
/// below the codebase directory.
pub fn describe_entry(path: &Path, relative: &str, is_dir: bool) -> Result<NewResource> {
    if is_dir {
        return Ok(NewResource::directory(relative));
    }
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(NewResource {
        path: relative.to_string(),
        size: bytes.len() as u64,
        is_file: true,
        is_text: is_text_content(&bytes),
        sha1: Some(sha1_hex(&bytes)),
        md5: Some(hex::encode(Md5::digest(&bytes))),
    })
}

/// Paths of every file and directory under `codebase/from` and
/// `codebase/to`, side roots included, in file-name order. Entries whose
/// name is not valid UTF-8 are skipped with a warning.
pub fn walk_codebase(codebase: &Path) -> Result<Vec<(PathBuf, String, bool)>> {
    let mut entries = Vec::new();
    for root in [FROM_ROOT, TO_ROOT] {
        for entry in WalkDir::new(codebase.join(root)).sort_by_file_name() {
            let entry = entry?;
            let file_type = entry.file_type();
            if !(file_type.is_file() || file_type.is_dir()) {
                continue;
            }
            let Some(relative) = relative_path(codebase, entry.path())? else {
                tracing::warn!("Skipping non UTF-8 path {}", entry.path().display());
                continue;
            };
            entries.push((entry.path().to_path_buf(), relative, file_type.is_dir()));
        }
    }
    Ok(entries)
}

fn relative_path(codebase: &Path, path: &Path) -> Result<Option<String>> {
    let relative = path.strip_prefix(codebase)?;
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Ok(segments.map(|segments| segments.join("/")))
}

/// Insert `entries` as resources in batches of `chunk_size`.
///
/// On failure every resource of the project is removed again, so an ingest
/// is either complete or leaves nothing behind.
pub async fn record_entries(
    store: &SqliteStore,
    project: ProjectId,
    entries: &[(PathBuf, String, bool)],
    chunk_size: usize,
    progress: &mut LoopProgress<'_>,
) -> Result<IngestSummary> {
    match insert_entries(store, project, entries, chunk_size, progress).await {
        Ok(summary) => Ok(summary),
        Err(err) => {
            let removed = store.clear_resources(project).await?;
            tracing::warn!("Ingest failed, removed {} partial resource(s)", removed);
            Err(err)
        }
    }
}

async fn insert_entries(
    store: &SqliteStore,
    project: ProjectId,
    entries: &[(PathBuf, String, bool)],
    chunk_size: usize,
    progress: &mut LoopProgress<'_>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let mut batch = Vec::with_capacity(chunk_size);
    for (path, relative, is_dir) in entries {
        let resource = describe_entry(path, relative, *is_dir)?;
        if resource.is_file {
            summary.files += 1;
        } else {
            summary.directories += 1;
        }
        batch.push(resource);
        if batch.len() >= chunk_size.max(1) {
            store.insert_resources(project, &batch).await?;
            batch.clear();
        }
        progress.tick();
    }
    if !batch.is_empty() {
        store.insert_resources(project, &batch).await?;
    }
    Ok(summary)
}

pub async fn ingest_project(
    config: &Config,
    store: &SqliteStore,
    project: &ProjectRecord,
    reporter: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let existing = store
        .count_resources(project.id, &ResourceFilter::default())
        .await?;
    if existing > 0 {
        bail!(
            "Project '{}' is already ingested ({} resources)",
            project.name,
            existing
        );
    }

    let inputs = resolve_inputs(&project.input_dir())?;
    let codebase = project.codebase_dir();
    if codebase.exists() {
        std::fs::remove_dir_all(&codebase)
            .with_context(|| format!("Failed to clear {}", codebase.display()))?;
    }

    let archive_extensions = &config.ingest.archive_extensions;
    for (side, side_inputs) in [(FROM_ROOT, &inputs.from), (TO_ROOT, &inputs.to)] {
        let side_dir = codebase.join(side);
        for input in side_inputs {
            stage_input(input, &side_dir, archive_extensions)?;
        }
    }

    let mut archives_extracted = 0;
    if config.ingest.extract_archives {
        archives_extracted = extract_nested_archives(
            &codebase,
            archive_extensions,
            config.ingest.max_extract_depth,
        )?;
    }

    let entries = walk_codebase(&codebase)?;
    let mut progress = LoopProgress::new(
        reporter,
        INGEST_STEP,
        entries.len() as u64,
        config.matching.progress_step_percent,
    );
    let mut summary = record_entries(
        store,
        project.id,
        &entries,
        config.matching.chunk_size,
        &mut progress,
    )
    .await?;
    summary.archives_extracted = archives_extracted;
    progress.finish();

    tracing::info!(
        "Ingested {} file(s) and {} director(ies) into {}",
        summary.files,
        summary.directories,
        project.name
    );
    Ok(summary)
}

pub async fn run_ingest(
    config: &Config,
    project_name: &str,
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let project = find_project(&pool, project_name).await?;
    let store = SqliteStore::new(pool);
    let summary = ingest_project(config, &store, &project, reporter).await?;

    println!("ingest {} ok", project.name);
    println!("  files: {}", summary.files);
    println!("  directories: {}", summary.directories);
    println!("  archives extracted: {}", summary.archives_extracted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn describes_files_with_checksums() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let resource = describe_entry(&path, "from/a.txt", false).unwrap();
        assert_eq!(resource.size, 3);
        assert!(resource.is_text);
        assert_eq!(
            resource.sha1.as_deref(),
            Some("a9993e364706816aba3e25717850c26c9cd0d89d")
        );
        assert_eq!(
            resource.md5.as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn walk_lists_both_sides_with_posix_paths() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("from/src")).unwrap();
        std::fs::create_dir_all(tmp.path().join("to")).unwrap();
        std::fs::write(tmp.path().join("from/src/Foo.java"), b"class Foo {}").unwrap();
        std::fs::write(tmp.path().join("to/Foo.class"), b"\xca\xfe\x00").unwrap();

        let paths: Vec<(String, bool)> = walk_codebase(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(_, relative, is_dir)| (relative, is_dir))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("from".to_string(), true),
                ("from/src".to_string(), true),
                ("from/src/Foo.java".to_string(), false),
                ("to".to_string(), true),
                ("to/Foo.class".to_string(), false),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn walk_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("from")).unwrap();
        std::fs::create_dir_all(tmp.path().join("to")).unwrap();
        std::fs::write(tmp.path().join("to/a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join("to").join(OsStr::from_bytes(b"z\xff")), b"1").unwrap();
        std::fs::write(tmp.path().join("to").join(OsStr::from_bytes(b"z\xfe")), b"2").unwrap();

        let paths: Vec<String> = walk_codebase(tmp.path())
            .unwrap()
            .into_iter()
            .map(|(_, relative, _)| relative)
            .collect();
        assert_eq!(paths, vec!["from", "to", "to/a.txt"]);
    }

    async fn sqlite_store(tmp: &TempDir) -> (SqliteStore, ProjectId) {
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}/d2d.sqlite\"\n",
            tmp.path().display()
        ))
        .unwrap();
        let pool = db::connect(&config).await.unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let project: i64 = sqlx::query_scalar(
            "INSERT INTO projects (name, work_dir, created_at) VALUES ('acme', ?, 0) RETURNING id",
        )
        .bind(tmp.path().to_string_lossy().to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        (SqliteStore::new(pool), project)
    }

    #[tokio::test]
    async fn failed_ingest_leaves_no_resources() {
        let tmp = TempDir::new().unwrap();
        let (store, project) = sqlite_store(&tmp).await;
        let present = tmp.path().join("a.txt");
        std::fs::write(&present, b"abc").unwrap();
        let entries = vec![
            (tmp.path().join("from"), "from".to_string(), true),
            (present, "from/a.txt".to_string(), false),
            (tmp.path().join("gone.txt"), "from/gone.txt".to_string(), false),
        ];

        let reporter = d2d_harness_core::progress::NoProgress;
        let mut progress = LoopProgress::new(&reporter, INGEST_STEP, 3, 10);
        let err = record_entries(&store, project, &entries, 1, &mut progress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone.txt"), "{}", err);
        assert_eq!(
            store
                .count_resources(project, &ResourceFilter::default())
                .await
                .unwrap(),
            0
        );

        let mut progress = LoopProgress::new(&reporter, INGEST_STEP, 2, 10);
        let summary = record_entries(&store, project, &entries[..2], 1, &mut progress)
            .await
            .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.directories, 1);
    }
}
