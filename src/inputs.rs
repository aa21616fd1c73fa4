//! Project inputs: resolving the `from*`/`to*` uploads and materializing
//! them as the two codebase trees, including archive extraction.
//!
//! Only zip-format archives (`.jar`, `.war`, `.zip`, ...) are unpacked.
//! Entries are written through [`zip::read::ZipFile::enclosed_name`], so
//! paths escaping the target directory are skipped.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use d2d_harness_core::models::{EXTRACT_SUFFIX, FROM_ROOT, TO_ROOT};

/// Inputs of a project split by codebase side, sorted by file name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInputs {
    pub from: Vec<PathBuf>,
    pub to: Vec<PathBuf>,
}

/// Split the entries of `input_dir` into development (`from*`) and
/// deployment (`to*`) inputs. Both sides must have at least one.
pub fn resolve_inputs(input_dir: &Path) -> Result<ResolvedInputs> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read inputs in {}", input_dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    let mut resolved = ResolvedInputs {
        from: Vec::new(),
        to: Vec::new(),
    };
    for path in entries {
        let name = file_name(&path);
        if name.starts_with(FROM_ROOT) {
            resolved.from.push(path);
        } else if name.starts_with(TO_ROOT) {
            resolved.to.push(path);
        } else {
            tracing::warn!("Ignoring input {}: name must start with from or to", name);
        }
    }

    if resolved.from.is_empty() {
        bail!("No development input: at least one input named from* is required");
    }
    if resolved.to.is_empty() {
        bail!("No deployment input: at least one input named to* is required");
    }
    Ok(resolved)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn is_archive(path: &Path, extensions: &[String]) -> bool {
    let name = file_name(path).to_lowercase();
    extensions.iter().any(|ext| name.ends_with(ext.as_str()))
}

/// `<archive>-extract`, next to the archive.
pub fn extract_dir_for(archive: &Path) -> PathBuf {
    let mut path: OsString = archive.as_os_str().to_owned();
    path.push(EXTRACT_SUFFIX);
    PathBuf::from(path)
}

/// Copy a file or directory into `dest_dir`, keeping its name.
pub fn copy_input(input: &Path, dest_dir: &Path) -> Result<()> {
    let target = dest_dir.join(file_name(input));
    if input.is_dir() {
        copy_tree(input, &target)
    } else {
        std::fs::copy(input, &target).with_context(|| {
            format!("Failed to copy {} to {}", input.display(), target.display())
        })?;
        Ok(())
    }
}

/// Recursively copy the contents of `src` into `dest`. Symlinks are skipped.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Place one input into a codebase side directory: archives are unpacked
/// into it, plain files copied, directories merged.
pub fn stage_input(input: &Path, side_dir: &Path, archive_extensions: &[String]) -> Result<()> {
    std::fs::create_dir_all(side_dir)
        .with_context(|| format!("Failed to create {}", side_dir.display()))?;
    if input.is_dir() {
        return copy_tree(input, side_dir);
    }
    if is_archive(input, archive_extensions) {
        let files = extract_zip(input, side_dir)
            .with_context(|| format!("Failed to extract input {}", input.display()))?;
        tracing::info!("Extracted {} file(s) from {}", files, input.display());
        return Ok(());
    }
    copy_input(input, side_dir)
}

/// Unpack a zip archive into `dest`. Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a zip archive: {}", archive.display()))?;
    std::fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe entry {} in {}", entry.name(), archive.display());
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

/// Extract archives found under `root` to `<archive>-extract/`, repeating
/// for archives uncovered by the previous level, up to `max_depth` levels.
/// Archives that fail to extract are logged and left as plain files.
pub fn extract_nested_archives(
    root: &Path,
    archive_extensions: &[String],
    max_depth: usize,
) -> Result<usize> {
    let mut extracted = 0;
    let mut failed: HashSet<PathBuf> = HashSet::new();

    for level in 0..max_depth {
        let mut pending = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file()
                && is_archive(path, archive_extensions)
                && !extract_dir_for(path).exists()
                && !failed.contains(path)
            {
                pending.push(path.to_path_buf());
            }
        }
        if pending.is_empty() {
            break;
        }
        tracing::debug!("Extraction level {}: {} archive(s)", level + 1, pending.len());

        for archive in pending {
            let target = extract_dir_for(&archive);
            match extract_zip(&archive, &target) {
                Ok(files) => {
                    tracing::debug!("Extracted {} file(s) from {}", files, archive.display());
                    extracted += 1;
                }
                Err(e) => {
                    tracing::warn!("Could not extract {}: {:#}", archive.display(), e);
                    if target.exists() {
                        std::fs::remove_dir_all(&target)?;
                    }
                    failed.insert(archive);
                }
            }
        }
    }
    Ok(extracted)
}
