//! Core data models shared by the matchers, the stores and the CLI.
//!
//! A project holds two codebases rooted at `from/` (development side) and
//! `to/` (deployment side). Every [`Resource`] lives under exactly one of
//! them; matchers connect `to/` resources to `from/` resources with
//! [`Relation`]s and classify resources through their terminal [`Status`].

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Identifier of a project. Every store operation is scoped by it.
pub type ProjectId = i64;

/// Identifier of a resource within the store.
pub type ResourceId = i64;

/// Root directory name of the development codebase.
pub const FROM_ROOT: &str = "from";
/// Root directory name of the deployment codebase.
pub const TO_ROOT: &str = "to";
/// Suffix appended to an archive path to name its extraction directory.
pub const EXTRACT_SUFFIX: &str = "-extract";

/// Which of the two codebases a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodebaseSide {
    From,
    To,
}

impl CodebaseSide {
    pub fn root(&self) -> &'static str {
        match self {
            CodebaseSide::From => FROM_ROOT,
            CodebaseSide::To => TO_ROOT,
        }
    }

    /// Path prefix (root plus separator) shared by every resource on this side.
    pub fn prefix(&self) -> String {
        format!("{}/", self.root())
    }

    /// Derive the side from a codebase-relative path.
    pub fn of_path(path: &str) -> Option<Self> {
        match path.trim_start_matches('/').split('/').next() {
            Some(FROM_ROOT) => Some(CodebaseSide::From),
            Some(TO_ROOT) => Some(CodebaseSide::To),
            _ => None,
        }
    }
}

impl fmt::Display for CodebaseSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root())
    }
}

impl FromStr for CodebaseSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            FROM_ROOT => Ok(CodebaseSide::From),
            TO_ROOT => Ok(CodebaseSide::To),
            other => bail!("Unknown codebase side: '{}'. Must be from or to.", other),
        }
    }
}

/// Terminal classification of a resource.
///
/// A resource without a status is "unmatched" and still eligible for the
/// matchers. Once a status is set it is never replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    TooManyMaps,
    NoJavaSource,
    MatchedToPurldb,
    Mapped,
    ArchiveProcessed,
    IgnoredDirectory,
    IgnoredEmptyFile,
    IgnoredPattern,
    NotAnalyzed,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::TooManyMaps,
        Status::NoJavaSource,
        Status::MatchedToPurldb,
        Status::Mapped,
        Status::ArchiveProcessed,
        Status::IgnoredDirectory,
        Status::IgnoredEmptyFile,
        Status::IgnoredPattern,
        Status::NotAnalyzed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::TooManyMaps => "too-many-maps",
            Status::NoJavaSource => "no-java-source",
            Status::MatchedToPurldb => "matched-to-purldb",
            Status::Mapped => "mapped",
            Status::ArchiveProcessed => "archive-processed",
            Status::IgnoredDirectory => "ignored-directory",
            Status::IgnoredEmptyFile => "ignored-empty-file",
            Status::IgnoredPattern => "ignored-pattern",
            Status::NotAnalyzed => "not-analyzed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Status::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown resource status: '{}'", s))
    }
}

/// Tag identifying the matcher that produced a [`Relation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapType {
    Sha1,
    Md5,
    Path,
    JavaToClass,
    JarToSource,
    JsCompiled,
}

impl MapType {
    pub const ALL: [MapType; 6] = [
        MapType::Sha1,
        MapType::Md5,
        MapType::Path,
        MapType::JavaToClass,
        MapType::JarToSource,
        MapType::JsCompiled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MapType::Sha1 => "sha1",
            MapType::Md5 => "md5",
            MapType::Path => "path",
            MapType::JavaToClass => "java_to_class",
            MapType::JarToSource => "jar_to_source",
            MapType::JsCompiled => "js_compiled",
        }
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MapType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        MapType::ALL
            .iter()
            .find(|map_type| map_type.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown map type: '{}'", s))
    }
}

/// Content checksum a resource may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumField {
    Sha1,
    Md5,
}

impl ChecksumField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumField::Sha1 => "sha1",
            ChecksumField::Md5 => "md5",
        }
    }

    pub fn map_type(&self) -> MapType {
        match self {
            ChecksumField::Sha1 => MapType::Sha1,
            ChecksumField::Md5 => MapType::Md5,
        }
    }
}

/// Matcher-discovered facts about a resource.
///
/// Each matcher that records something owns a named field here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceExtra {
    /// Package declared by a `.java` source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_package: Option<String>,
}

/// A file or directory inside the `from/` or `to/` codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub project_id: ProjectId,
    /// POSIX path relative to the codebase directory, starting with `from/` or `to/`.
    pub path: String,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub is_file: bool,
    pub is_text: bool,
    pub sha1: Option<String>,
    pub md5: Option<String>,
    pub status: Option<Status>,
    #[serde(default)]
    pub extra: ResourceExtra,
}

impl Resource {
    pub fn side(&self) -> Option<CodebaseSide> {
        CodebaseSide::of_path(&self.path)
    }

    pub fn checksum(&self, field: ChecksumField) -> Option<&str> {
        let value = match field {
            ChecksumField::Sha1 => self.sha1.as_deref(),
            ChecksumField::Md5 => self.md5.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Number of `/`-separated segments in the path.
    pub fn segment_count(&self) -> usize {
        path_segments(&self.path).count()
    }

    /// Path of the directory an archive at this path is extracted to.
    pub fn extracted_path(&self) -> String {
        format!("{}{}/", self.path.trim_end_matches('/'), EXTRACT_SUFFIX)
    }
}

/// Description of a resource to insert; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub path: String,
    pub size: u64,
    pub is_file: bool,
    pub is_text: bool,
    pub sha1: Option<String>,
    pub md5: Option<String>,
}

impl NewResource {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            is_file: false,
            is_text: false,
            sha1: None,
            md5: None,
        }
    }

    pub fn name(&self) -> String {
        resource_name(&self.path)
    }

    pub fn extension(&self) -> String {
        if self.is_file {
            resource_extension(&self.path)
        } else {
            String::new()
        }
    }
}

/// Matcher-specific metadata attached to a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationExtra {
    /// `"<matched segments>/<candidate segments>"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_score: Option<String>,
    /// Line similarity formatted as a percentage, e.g. `"87.5%"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_ratio: Option<String>,
    /// Source root of a `java_to_class` match, with a trailing `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_source_root: Option<String>,
}

/// A directed edge from a `from/` resource to a `to/` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub project_id: ProjectId,
    pub from_id: ResourceId,
    pub to_id: ResourceId,
    pub map_type: MapType,
    #[serde(default)]
    pub extra: RelationExtra,
}

/// A relation to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    pub from_id: ResourceId,
    pub to_id: ResourceId,
    pub map_type: MapType,
    pub extra: RelationExtra,
}

impl NewRelation {
    pub fn new(from_id: ResourceId, to_id: ResourceId, map_type: MapType) -> Self {
        Self {
            from_id,
            to_id,
            map_type,
            extra: RelationExtra::default(),
        }
    }

    pub fn with_extra(mut self, extra: RelationExtra) -> Self {
        self.extra = extra;
        self
    }
}

/// A package discovered for a project, identified by its Package URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "type")]
    pub package_type: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub qualifiers: Option<String>,
    #[serde(default)]
    pub subpath: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub declared_license_expression: Option<String>,
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Package {
    /// Render the Package URL: `pkg:type/namespace/name@version?qualifiers#subpath`.
    pub fn purl(&self) -> String {
        let mut purl = format!("pkg:{}/", self.package_type.to_lowercase());
        if let Some(namespace) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            let encoded: Vec<String> = namespace.split('/').map(purl_encode).collect();
            purl.push_str(&encoded.join("/"));
            purl.push('/');
        }
        purl.push_str(&purl_encode(&self.name));
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            purl.push('@');
            purl.push_str(&purl_encode(version));
        }
        if let Some(qualifiers) = self.qualifiers.as_deref().filter(|q| !q.is_empty()) {
            purl.push('?');
            purl.push_str(qualifiers);
        }
        if let Some(subpath) = self.subpath.as_deref().filter(|s| !s.is_empty()) {
            purl.push('#');
            purl.push_str(subpath.trim_matches('/'));
        }
        purl
    }
}

fn purl_encode(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '@' => out.push_str("%40"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            ' ' => out.push_str("%20"),
            '%' => out.push_str("%25"),
            _ => out.push(c),
        }
    }
    out
}

/// Iterate the non-empty `/`-separated segments of a path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Last path segment.
pub fn resource_name(path: &str) -> String {
    path_segments(path).last().unwrap_or_default().to_string()
}

/// Lowercased extension including the leading dot. `.d.ts` is kept whole.
pub fn resource_extension(path: &str) -> String {
    let name = resource_name(path).to_lowercase();
    if name.ends_with(".d.ts") && name.len() > ".d.ts".len() {
        return ".d.ts".to_string();
    }
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(pos) => name[pos..].to_string(),
    }
}
