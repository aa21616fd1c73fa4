//! In-memory [`ResourceStore`] implementation for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. File contents are
//! kept alongside the resources, keyed by project and path.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    resource_extension, resource_name, MapType, NewRelation, NewResource, Package, ProjectId,
    Relation, Resource, ResourceExtra, ResourceId, Status,
};
use crate::text::{is_text_content, sha1_hex};

use super::{RelationFilter, ResourceFilter, ResourceStore};

struct StoredPackage {
    id: i64,
    project_id: ProjectId,
    purl: String,
    package: Package,
}

/// In-memory store.
pub struct InMemoryStore {
    resources: RwLock<Vec<Resource>>,
    relations: RwLock<Vec<Relation>>,
    contents: RwLock<HashMap<(ProjectId, String), Vec<u8>>>,
    packages: RwLock<Vec<StoredPackage>>,
    package_resources: RwLock<Vec<(i64, ResourceId)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(Vec::new()),
            relations: RwLock::new(Vec::new()),
            contents: RwLock::new(HashMap::new()),
            packages: RwLock::new(Vec::new()),
            package_resources: RwLock::new(Vec::new()),
        }
    }

    /// Add a file with content; checksum, size and text flag are derived.
    pub fn add_file(&self, project: ProjectId, path: &str, content: &[u8]) -> ResourceId {
        let new = NewResource {
            path: path.to_string(),
            size: content.len() as u64,
            is_file: true,
            is_text: is_text_content(content),
            sha1: Some(sha1_hex(content)),
            md5: None,
        };
        self.contents
            .write()
            .unwrap()
            .insert((project, path.to_string()), content.to_vec());
        self.insert_one(project, &new)
    }

    pub fn add_directory(&self, project: ProjectId, path: &str) -> ResourceId {
        self.insert_one(project, &NewResource::directory(path))
    }

    /// Package ids linked to a resource.
    pub fn packages_of(&self, resource: ResourceId) -> Vec<i64> {
        self.package_resources
            .read()
            .unwrap()
            .iter()
            .filter(|(_, r)| *r == resource)
            .map(|(p, _)| *p)
            .collect()
    }

    fn insert_one(&self, project: ProjectId, new: &NewResource) -> ResourceId {
        let mut resources = self.resources.write().unwrap();
        let id = resources.len() as ResourceId + 1;
        resources.push(Resource {
            id,
            project_id: project,
            path: new.path.trim_matches('/').to_string(),
            name: resource_name(&new.path),
            extension: if new.is_file {
                resource_extension(&new.path)
            } else {
                String::new()
            },
            size: new.size,
            is_file: new.is_file,
            is_text: new.is_text,
            sha1: new.sha1.clone(),
            md5: new.md5.clone(),
            status: None,
            extra: ResourceExtra::default(),
        });
        id
    }

    fn related_ids(&self, project: ProjectId) -> std::collections::HashSet<ResourceId> {
        let relations = self.relations.read().unwrap();
        relations
            .iter()
            .filter(|r| r.project_id == project)
            .flat_map(|r| [r.from_id, r.to_id])
            .collect()
    }

    fn select(&self, project: ProjectId, filter: &ResourceFilter) -> Vec<Resource> {
        let related = match filter.relation {
            RelationFilter::Any => None,
            _ => Some(self.related_ids(project)),
        };
        let resources = self.resources.read().unwrap();
        let mut selected: Vec<Resource> = resources
            .iter()
            .filter(|r| r.project_id == project && filter.matches_fields(r))
            .filter(|r| match (&filter.relation, &related) {
                (RelationFilter::HasRelation, Some(ids)) => ids.contains(&r.id),
                (RelationFilter::HasNoRelation, Some(ids)) => !ids.contains(&r.id),
                _ => true,
            })
            .cloned()
            .collect();
        selected.sort_by_key(|r| r.id);
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }
        selected
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn insert_resources(
        &self,
        project: ProjectId,
        resources: &[NewResource],
    ) -> Result<Vec<ResourceId>> {
        Ok(resources
            .iter()
            .map(|new| self.insert_one(project, new))
            .collect())
    }

    async fn list_resources(
        &self,
        project: ProjectId,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        Ok(self.select(project, filter))
    }

    async fn count_resources(&self, project: ProjectId, filter: &ResourceFilter) -> Result<u64> {
        let mut unlimited = filter.clone();
        unlimited.limit = None;
        Ok(self.select(project, &unlimited).len() as u64)
    }

    async fn get_resource(&self, project: ProjectId, id: ResourceId) -> Result<Option<Resource>> {
        let resources = self.resources.read().unwrap();
        Ok(resources
            .iter()
            .find(|r| r.project_id == project && r.id == id)
            .cloned())
    }

    async fn get_resource_by_path(
        &self,
        project: ProjectId,
        path: &str,
    ) -> Result<Option<Resource>> {
        let path = path.trim_matches('/');
        let resources = self.resources.read().unwrap();
        Ok(resources
            .iter()
            .find(|r| r.project_id == project && r.path == path)
            .cloned())
    }

    async fn set_status(
        &self,
        project: ProjectId,
        id: ResourceId,
        status: Status,
    ) -> Result<bool> {
        let mut resources = self.resources.write().unwrap();
        match resources
            .iter_mut()
            .find(|r| r.project_id == project && r.id == id)
        {
            Some(resource) if resource.status.is_none() => {
                resource.status = Some(status);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => anyhow::bail!("Resource {} not found in project {}", id, project),
        }
    }

    async fn set_extra(
        &self,
        project: ProjectId,
        id: ResourceId,
        extra: &ResourceExtra,
    ) -> Result<()> {
        let mut resources = self.resources.write().unwrap();
        let resource = resources
            .iter_mut()
            .find(|r| r.project_id == project && r.id == id)
            .ok_or_else(|| anyhow::anyhow!("Resource {} not found in project {}", id, project))?;
        resource.extra = extra.clone();
        Ok(())
    }

    async fn create_relation(&self, project: ProjectId, relation: &NewRelation) -> Result<bool> {
        let mut relations = self.relations.write().unwrap();
        let exists = relations.iter().any(|r| {
            r.project_id == project
                && r.from_id == relation.from_id
                && r.to_id == relation.to_id
                && r.map_type == relation.map_type
        });
        if exists {
            return Ok(false);
        }
        let id = relations.len() as i64 + 1;
        relations.push(Relation {
            id,
            project_id: project,
            from_id: relation.from_id,
            to_id: relation.to_id,
            map_type: relation.map_type,
            extra: relation.extra.clone(),
        });
        Ok(true)
    }

    async fn has_relation(&self, project: ProjectId, id: ResourceId) -> Result<bool> {
        let relations = self.relations.read().unwrap();
        Ok(relations
            .iter()
            .any(|r| r.project_id == project && (r.from_id == id || r.to_id == id)))
    }

    async fn relations_to(
        &self,
        project: ProjectId,
        to_ids: &[ResourceId],
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>> {
        let relations = self.relations.read().unwrap();
        Ok(relations
            .iter()
            .filter(|r| r.project_id == project && to_ids.contains(&r.to_id))
            .filter(|r| map_type.map_or(true, |m| r.map_type == m))
            .cloned()
            .collect())
    }

    async fn list_relations(
        &self,
        project: ProjectId,
        map_type: Option<MapType>,
    ) -> Result<Vec<Relation>> {
        let relations = self.relations.read().unwrap();
        Ok(relations
            .iter()
            .filter(|r| r.project_id == project)
            .filter(|r| map_type.map_or(true, |m| r.map_type == m))
            .cloned()
            .collect())
    }

    async fn read_content(&self, project: ProjectId, resource: &Resource) -> Result<Vec<u8>> {
        let contents = self.contents.read().unwrap();
        contents
            .get(&(project, resource.path.clone()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No content stored for {}", resource.path))
    }

    async fn upsert_package(&self, project: ProjectId, package: &Package) -> Result<i64> {
        let purl = package.purl();
        let mut packages = self.packages.write().unwrap();
        if let Some(stored) = packages
            .iter_mut()
            .find(|p| p.project_id == project && p.purl == purl)
        {
            stored.package = package.clone();
            return Ok(stored.id);
        }
        let id = packages.len() as i64 + 1;
        packages.push(StoredPackage {
            id,
            project_id: project,
            purl,
            package: package.clone(),
        });
        Ok(id)
    }

    async fn assign_package(
        &self,
        _project: ProjectId,
        package_id: i64,
        resource_ids: &[ResourceId],
    ) -> Result<()> {
        let mut links = self.package_resources.write().unwrap();
        for id in resource_ids {
            if !links.contains(&(package_id, *id)) {
                links.push((package_id, *id));
            }
        }
        Ok(())
    }

    async fn list_packages(&self, project: ProjectId) -> Result<Vec<(i64, Package)>> {
        let packages = self.packages.read().unwrap();
        Ok(packages
            .iter()
            .filter(|p| p.project_id == project)
            .map(|p| (p.id, p.package.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodebaseSide, ChecksumField};
    use crate::store::{Pager, StatusFilter};

    #[tokio::test]
    async fn filters_by_side_status_and_relation() {
        let store = InMemoryStore::new();
        let a = store.add_file(1, "from/a.txt", b"a");
        let b = store.add_file(1, "to/a.txt", b"a");
        let c = store.add_file(1, "to/b.txt", b"b");
        store.add_file(2, "to/a.txt", b"a");

        let to_files = store
            .list_resources(1, &ResourceFilter::files(CodebaseSide::To))
            .await
            .unwrap();
        assert_eq!(to_files.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b, c]);

        store
            .create_relation(1, &NewRelation::new(a, b, MapType::Sha1))
            .await
            .unwrap();
        store.set_status(1, c, Status::NotAnalyzed).await.unwrap();

        let unrelated = ResourceFilter::files(CodebaseSide::To)
            .with_relation(RelationFilter::HasNoRelation);
        assert_eq!(store.count_resources(1, &unrelated).await.unwrap(), 1);

        let unmatched = ResourceFilter::unmatched_files(CodebaseSide::To);
        assert_eq!(store.count_resources(1, &unmatched).await.unwrap(), 1);

        let flagged = ResourceFilter::files(CodebaseSide::To)
            .with_status(StatusFilter::Is(Status::NotAnalyzed));
        assert_eq!(store.list_resources(1, &flagged).await.unwrap()[0].id, c);

        let by_sha1 = ResourceFilter::files(CodebaseSide::From)
            .with_checksum_eq(ChecksumField::Sha1, &sha1_hex(b"a"));
        assert_eq!(store.count_resources(1, &by_sha1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_is_set_only_once() {
        let store = InMemoryStore::new();
        let id = store.add_file(1, "to/x.class", b"\xca\xfe");
        assert!(store.set_status(1, id, Status::NoJavaSource).await.unwrap());
        assert!(!store.set_status(1, id, Status::Mapped).await.unwrap());
        let resource = store.get_resource(1, id).await.unwrap().unwrap();
        assert_eq!(resource.status, Some(Status::NoJavaSource));
    }

    #[tokio::test]
    async fn relation_creation_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.add_file(1, "from/a", b"x");
        let b = store.add_file(1, "to/a", b"x");
        let rel = NewRelation::new(a, b, MapType::Path);
        assert!(store.create_relation(1, &rel).await.unwrap());
        assert!(!store.create_relation(1, &rel).await.unwrap());
        assert!(store
            .create_relation(1, &NewRelation::new(a, b, MapType::Sha1))
            .await
            .unwrap());
        assert_eq!(store.list_relations(1, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn pager_walks_in_bounded_batches() {
        let store = InMemoryStore::new();
        for i in 0..7 {
            store.add_file(1, &format!("to/f{}.txt", i), b"x");
        }
        let mut pager = Pager::new(ResourceFilter::files(CodebaseSide::To), 3);
        let mut sizes = Vec::new();
        while let Some(batch) = pager.next_batch(&store, 1).await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn packages_upsert_by_purl() {
        let store = InMemoryStore::new();
        let package = Package {
            package_type: "maven".to_string(),
            name: "foo".to_string(),
            version: Some("1.0".to_string()),
            ..Default::default()
        };
        let first = store.upsert_package(1, &package).await.unwrap();
        let second = store.upsert_package(1, &package).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_packages(1).await.unwrap().len(), 1);
    }
}
