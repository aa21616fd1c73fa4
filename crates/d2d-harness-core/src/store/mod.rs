//! Storage abstraction for projects, resources, relations and packages.
//!
//! The [`ResourceStore`] trait is the only way matchers touch persistent
//! state. Implementations must scope every operation by project id so that
//! several projects can be processed side by side.
//!
//! Listing is filter-driven ([`ResourceFilter`]) and paginated by id so that
//! callers can walk arbitrarily large codebases in bounded batches with
//! [`Pager`].

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChecksumField, CodebaseSide, NewRelation, NewResource, Package, ProjectId, Relation,
    Resource, ResourceExtra, ResourceId, Status, MapType,
};

/// Status condition of a [`ResourceFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    Any,
    /// No status yet ("unmatched").
    Empty,
    /// Any status set.
    NonEmpty,
    Is(Status),
}

/// Relation condition of a [`ResourceFilter`]. A resource "has a relation"
/// when it is either endpoint of one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationFilter {
    #[default]
    Any,
    HasRelation,
    HasNoRelation,
}

/// Conjunction of conditions applied to a project's resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub side: Option<CodebaseSide>,
    /// `Some(true)` files only, `Some(false)` directories only.
    pub is_file: Option<bool>,
    pub status: StatusFilter,
    pub relation: RelationFilter,
    /// Lowercased extensions including the dot; empty means any.
    pub extensions: Vec<String>,
    /// Resource must carry a non-empty value for this checksum.
    pub has_checksum: Option<ChecksumField>,
    /// Resource checksum must equal the given value.
    pub checksum_eq: Option<(ChecksumField, String)>,
    pub path_prefix: Option<String>,
    /// Path must end with one of these; empty means any.
    pub path_suffixes: Vec<String>,
    /// Exclude resources whose name starts with `.`.
    pub exclude_dotfiles: bool,
    /// Only ids strictly greater than this (keyset pagination).
    pub after_id: Option<ResourceId>,
    pub limit: Option<usize>,
}

impl ResourceFilter {
    pub fn files(side: CodebaseSide) -> Self {
        Self {
            side: Some(side),
            is_file: Some(true),
            ..Default::default()
        }
    }

    pub fn unmatched_files(side: CodebaseSide) -> Self {
        Self {
            status: StatusFilter::Empty,
            ..Self::files(side)
        }
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_relation(mut self, relation: RelationFilter) -> Self {
        self.relation = relation;
        self
    }

    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = extensions
            .iter()
            .map(|e| e.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn with_checksum(mut self, field: ChecksumField) -> Self {
        self.has_checksum = Some(field);
        self
    }

    pub fn with_checksum_eq(mut self, field: ChecksumField, value: &str) -> Self {
        self.checksum_eq = Some((field, value.to_string()));
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_path_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.path_suffixes = suffixes;
        self
    }

    pub fn without_dotfiles(mut self) -> Self {
        self.exclude_dotfiles = true;
        self
    }

    /// Evaluate every condition except pagination and relation existence,
    /// which need store state.
    pub fn matches_fields(&self, resource: &Resource) -> bool {
        if let Some(side) = self.side {
            if resource.side() != Some(side) {
                return false;
            }
        }
        if let Some(is_file) = self.is_file {
            if resource.is_file != is_file {
                return false;
            }
        }
        let status_ok = match self.status {
            StatusFilter::Any => true,
            StatusFilter::Empty => resource.status.is_none(),
            StatusFilter::NonEmpty => resource.status.is_some(),
            StatusFilter::Is(status) => resource.status == Some(status),
        };
        if !status_ok {
            return false;
        }
        if !self.extensions.is_empty() && !self.extensions.contains(&resource.extension) {
            return false;
        }
        if let Some(field) = self.has_checksum {
            if resource.checksum(field).is_none() {
                return false;
            }
        }
        if let Some((field, value)) = &self.checksum_eq {
            if resource.checksum(*field) != Some(value.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !resource.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.path_suffixes.is_empty()
            && !self.path_suffixes.iter().any(|s| resource.path.ends_with(s.as_str()))
        {
            return false;
        }
        if self.exclude_dotfiles && resource.name.starts_with('.') {
            return false;
        }
        if let Some(after) = self.after_id {
            if resource.id <= after {
                return false;
            }
        }
        true
    }
}

/// Abstract storage backend for the matching engine.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_resources`](ResourceStore::list_resources) | Filtered, id-ordered listing |
/// | [`count_resources`](ResourceStore::count_resources) | Count for progress totals |
/// | [`set_status`](ResourceStore::set_status) | Set a terminal status once |
/// | [`create_relation`](ResourceStore::create_relation) | Idempotent relation insert |
/// | [`read_content`](ResourceStore::read_content) | Raw bytes of a file resource |
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert resources for a project, returning their ids in input order.
    async fn insert_resources(
        &self,
        project: ProjectId,
        resources: &[NewResource],
    ) -> Result<Vec<ResourceId>>;

    /// Resources matching `filter`, ordered by ascending id.
    async fn list_resources(
        &self,
        project: ProjectId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>>;

    async fn count_resources(&self, project: ProjectId, filter: &ResourceFilter) -> Result<u64>;

    async fn get_resource(&self, project: ProjectId, id: ResourceId) -> Result<Option<Resource>>;

    async fn get_resource_by_path(
        &self,
        project: ProjectId,
        path: &str,
    ) -> Result<Option<Resource>>;

    /// Set `status` on a resource that has none. Returns `false` when the
    /// resource already carried a status (the existing one is kept).
    async fn set_status(&self, project: ProjectId, id: ResourceId, status: Status)
        -> Result<bool>;

    async fn set_extra(
        &self,
        project: ProjectId,
        id: ResourceId,
        extra: &ResourceExtra,
    ) -> Result<()>;

    /// Create a relation unless one with the same `(from, to, map_type)`
    /// exists. Returns `true` when a row was inserted.
    async fn create_relation(&self, project: ProjectId, relation: &NewRelation) -> Result<bool>;

    async fn has_relation(&self, project: ProjectId, id: ResourceId) -> Result<bool>;

    /// Relations whose `to` endpoint is one of `to_ids`, optionally of one map type.
    async fn relations_to(
        &self,
        project: ProjectId,
        to_ids: &[ResourceId],
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>>;

    /// All relations of a project, optionally of one map type, ordered by id.
    async fn list_relations(
        &self,
        project: ProjectId,
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>>;

    /// Raw content of a file resource.
    async fn read_content(&self, project: ProjectId, resource: &Resource) -> Result<Vec<u8>>;

    /// Insert or update a package by purl. Returns the package id.
    async fn upsert_package(&self, project: ProjectId, package: &Package) -> Result<i64>;

    async fn assign_package(
        &self,
        project: ProjectId,
        package_id: i64,
        resource_ids: &[ResourceId],
    ) -> Result<()>;

    async fn list_packages(&self, project: ProjectId) -> Result<Vec<(i64, Package)>>;
}

/// Read a file resource as UTF-8 text.
pub async fn read_text(
    store: &dyn ResourceStore,
    project: ProjectId,
    resource: &Resource,
) -> Result<String> {
    let bytes = store.read_content(project, resource).await?;
    Ok(String::from_utf8(bytes)?)
}

/// Keyset paginator over a filtered resource listing.
///
/// ```rust,ignore
/// let mut pager = Pager::new(filter, 2000);
/// while let Some(batch) = pager.next_batch(store, project).await? {
///     for resource in batch { /* ... */ }
/// }
/// ```
pub struct Pager {
    filter: ResourceFilter,
    chunk_size: usize,
    done: bool,
}

impl Pager {
    pub fn new(filter: ResourceFilter, chunk_size: usize) -> Self {
        Self {
            filter,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    pub async fn next_batch(
        &mut self,
        store: &dyn ResourceStore,
        project: ProjectId,
    ) -> Result<Option<Vec<Resource>>> {
        if self.done {
            return Ok(None);
        }
        let mut page = self.filter.clone();
        page.limit = Some(self.chunk_size);
        let batch = store.list_resources(project, &page).await?;
        if batch.len() < self.chunk_size {
            self.done = true;
        }
        match batch.last() {
            Some(last) => {
                self.filter.after_id = Some(last.id);
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }
}
