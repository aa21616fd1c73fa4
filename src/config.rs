use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use d2d_harness_core::matching::MatchOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub purldb: PurlDbConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Parent of the per-project work directories.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./data/projects")
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_diff_ratio_threshold")]
    pub diff_ratio_threshold: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_java_package_scan_lines")]
    pub java_package_scan_lines: usize,
    #[serde(default = "default_progress_step_percent")]
    pub progress_step_percent: u8,
    #[serde(default = "default_purldb_extensions")]
    pub purldb_extensions: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            diff_ratio_threshold: default_diff_ratio_threshold(),
            chunk_size: default_chunk_size(),
            java_package_scan_lines: default_java_package_scan_lines(),
            progress_step_percent: default_progress_step_percent(),
            purldb_extensions: default_purldb_extensions(),
        }
    }
}

fn default_diff_ratio_threshold() -> f64 {
    0.7
}
fn default_chunk_size() -> usize {
    2000
}
fn default_java_package_scan_lines() -> usize {
    500
}
fn default_progress_step_percent() -> u8 {
    10
}
fn default_purldb_extensions() -> Vec<String> {
    MatchOptions::default().purldb_extensions
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Flagged `ignored-pattern` by the pipelines, relative to `from/`/`to/`.
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
    /// Zip-format archives unpacked to `<archive>-extract/` during ingest.
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,
    #[serde(default = "default_extract_archives")]
    pub extract_archives: bool,
    /// Nesting levels of archives-in-archives to unpack.
    #[serde(default = "default_max_extract_depth")]
    pub max_extract_depth: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ignore_globs: default_ignore_globs(),
            archive_extensions: default_archive_extensions(),
            extract_archives: default_extract_archives(),
            max_extract_depth: default_max_extract_depth(),
        }
    }
}

fn default_ignore_globs() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/__MACOSX/**".to_string(),
        "**/.DS_Store".to_string(),
    ]
}
fn default_archive_extensions() -> Vec<String> {
    [".jar", ".war", ".ear", ".zip", ".aar"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_extract_archives() -> bool {
    true
}
fn default_max_extract_depth() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct PurlDbConfig {
    /// API root, e.g. `https://public.purldb.io/api/`. Unset disables the
    /// package database steps.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding an API token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_purldb_batch_size")]
    pub batch_size: usize,
    /// Retries on 429 and 5xx responses or network errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PurlDbConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            api_key_env: None,
            batch_size: default_purldb_batch_size(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_purldb_batch_size() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    2
}

impl Config {
    /// Matcher options assembled from `[matching]`, `[ingest]` and `[purldb]`.
    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            diff_ratio_threshold: self.matching.diff_ratio_threshold,
            chunk_size: self.matching.chunk_size,
            java_package_scan_lines: self.matching.java_package_scan_lines,
            progress_step_percent: self.matching.progress_step_percent,
            purldb_extensions: self.matching.purldb_extensions.clone(),
            purldb_batch_size: self.purldb.batch_size,
            ignore_patterns: self.ingest.ignore_globs.clone(),
        }
    }

    /// Work directory of a project.
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.workspace.root.join(name)
    }
}

fn check_extensions(field: &str, extensions: &[String]) -> Result<()> {
    for ext in extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            bail!("{} entries must start with '.', got '{}'", field, ext);
        }
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.matching.diff_ratio_threshold) {
        bail!("matching.diff_ratio_threshold must be in [0.0, 1.0]");
    }
    if config.matching.chunk_size == 0 {
        bail!("matching.chunk_size must be > 0");
    }
    if config.matching.java_package_scan_lines == 0 {
        bail!("matching.java_package_scan_lines must be > 0");
    }
    if !(1..=100).contains(&config.matching.progress_step_percent) {
        bail!("matching.progress_step_percent must be in [1, 100]");
    }
    check_extensions("matching.purldb_extensions", &config.matching.purldb_extensions)?;
    check_extensions("ingest.archive_extensions", &config.ingest.archive_extensions)?;

    if config.purldb.timeout_secs == 0 {
        bail!("purldb.timeout_secs must be > 0");
    }
    if config.purldb.batch_size == 0 {
        bail!("purldb.batch_size must be > 0");
    }
    if let Some(url) = &config.purldb.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("purldb.url must be an http(s) URL, got '{}'", url);
        }
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Config {
        toml::from_str(&format!("[db]\npath = \"/tmp/d2d.sqlite\"\n{}", extra)).unwrap()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("");
        assert!(validate(&config).is_ok());
        let options = config.match_options();
        assert_eq!(options.diff_ratio_threshold, 0.7);
        assert_eq!(options.chunk_size, 2000);
        assert_eq!(options.purldb_batch_size, 1000);
        assert!(options.ignore_patterns.contains(&"**/.git/**".to_string()));
        assert!(config.purldb.url.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            ("[matching]\ndiff_ratio_threshold = 1.5", "diff_ratio_threshold"),
            ("[matching]\nchunk_size = 0", "chunk_size"),
            ("[matching]\nprogress_step_percent = 0", "progress_step_percent"),
            ("[matching]\npurldb_extensions = [\"jar\"]", "purldb_extensions"),
            ("[purldb]\ntimeout_secs = 0", "timeout_secs"),
            ("[purldb]\nurl = \"ftp://example.org\"", "purldb.url"),
        ];
        for (toml, field) in cases {
            let err = validate(&parse(toml)).unwrap_err();
            assert!(err.to_string().contains(field), "{}: {}", field, err);
        }
    }

    #[test]
    fn project_dir_is_under_workspace() {
        let config = parse("[workspace]\nroot = \"/srv/d2d\"");
        assert_eq!(config.project_dir("acme"), PathBuf::from("/srv/d2d/acme"));
    }
}
