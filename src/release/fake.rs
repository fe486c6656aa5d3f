//! In-memory collaborators for exercising releases without a cluster, registry or remote.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::cluster::{self, Cluster, LiveResource};
use crate::git::{self, Checkout, Repo};
use crate::image::{ImageId, ImageInfo, ImageName};
use crate::manifest::{Manifests, YamlManifests};
use crate::registry::{self, Registry};
use crate::resource::ResourceId;
use crate::workload::Container;
use super::context::{ReleaseContext, Timeouts};

fn io_error(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.to_string())
}

#[derive(Default)]
pub struct FakeCluster {
    pub resources: Vec<LiveResource>,
    /// Resources whose apply fails with the given message.
    pub apply_errors: BTreeMap<ResourceId, String>,
    /// Resources whose apply panics.
    pub apply_panics: BTreeSet<ResourceId>,
    /// Resources whose apply never returns.
    pub apply_hangs: BTreeSet<ResourceId>,
    pub unreachable: bool,
    /// Queries never return.
    pub hanging: bool,
    pub queries: AtomicUsize,
    pub applied: Mutex<Vec<ResourceId>>,
}

impl FakeCluster {
    pub fn with(mut self, id: &str, containers: &[(&str, &str)]) -> Self {
        self.resources.push(LiveResource {
            id: id.parse().unwrap(),
            containers: containers.iter().map(|(name, image)| Container::new(*name, *image)).collect(),
        });
        self
    }

    pub fn failing_apply(mut self, id: &str, message: &str) -> Self {
        self.apply_errors.insert(id.parse().unwrap(), message.to_string());
        self
    }

    pub fn panicking_apply(mut self, id: &str) -> Self {
        self.apply_panics.insert(id.parse().unwrap());
        self
    }

    pub fn hanging_apply(mut self, id: &str) -> Self {
        self.apply_hangs.insert(id.parse().unwrap());
        self
    }

    pub fn applied(&self) -> Vec<ResourceId> {
        self.applied.lock().unwrap().clone()
    }

    async fn query(&self) -> Result<(), cluster::Error> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.hanging {
            std::future::pending::<()>().await;
        }
        if self.unreachable {
            return Err(cluster::Error::IOError(io_error("connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn list_all(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, cluster::Error> {
        self.query().await?;
        Ok(self
            .resources
            .iter()
            .filter(|r| namespace.map_or(true, |ns| r.id.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn list_some(&self, ids: &[ResourceId]) -> Result<Vec<LiveResource>, cluster::Error> {
        self.query().await?;
        Ok(self.resources.iter().filter(|r| ids.contains(&r.id)).cloned().collect())
    }

    async fn apply(&self, manifest: &[u8]) -> Result<(), cluster::Error> {
        let parsed = YamlManifests
            .parse(Path::new("applied.yaml"), manifest)
            .map_err(|err| cluster::Error::IOError(io_error(&err.to_string())))?;
        for applied in parsed {
            if self.apply_hangs.contains(&applied.id) {
                std::future::pending::<()>().await;
            }
            if self.apply_panics.contains(&applied.id) {
                panic!("apply of {} crashed", applied.id);
            }
            if let Some(message) = self.apply_errors.get(&applied.id) {
                return Err(cluster::Error::IOError(io_error(message)));
            }
            self.applied.lock().unwrap().push(applied.id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    pub repositories: BTreeMap<ImageName, Vec<ImageInfo>>,
    pub broken: BTreeSet<ImageName>,
}

impl FakeRegistry {
    /// Images in the order given, newest first.
    pub fn with(mut self, images: &[&str]) -> Self {
        for image in images {
            let id: ImageId = image.parse().unwrap();
            self.repositories
                .entry(id.name().clone())
                .or_default()
                .push(ImageInfo::new(id, None));
        }
        self
    }

    pub fn broken(mut self, repository: &str) -> Self {
        self.broken.insert(repository.parse().unwrap());
        self
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn get_repository(&self, repository: &ImageName) -> Result<Vec<ImageInfo>, registry::Error> {
        if self.broken.contains(repository) {
            return Err(registry::Error::Response {
                url: repository.to_string(),
                code: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(self.repositories.get(repository).cloned().unwrap_or_default())
    }

    async fn image_exists(&self, image: &ImageId) -> Result<bool, registry::Error> {
        Ok(self
            .repositories
            .get(image.name())
            .is_some_and(|images| images.iter().any(|info| &info.id == image)))
    }
}

/// Serves working copies seeded with fixed files and records what gets pushed.
#[derive(Default)]
pub struct FakeRepo {
    pub files: BTreeMap<String, String>,
    pub fail_push: Option<String>,
    pub fail_clone: bool,
    pub checkouts: AtomicUsize,
    /// Commit messages with the file contents at the time of each push.
    pub pushes: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl FakeRepo {
    pub fn with(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn pushes(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repo for FakeRepo {
    async fn checkout(&self) -> Result<Checkout, git::Error> {
        if self.fail_clone {
            return Err(git::Error::IOError(io_error("repository not found")));
        }
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        let dir = tempfile::Builder::new().prefix("nr-test-").tempdir()?;
        for (path, content) in &self.files {
            let target = dir.path().join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(Checkout::new(dir))
    }

    async fn commit_and_push(&self, checkout: &Checkout, message: &str) -> Result<(), git::Error> {
        let mut contents = BTreeMap::new();
        for path in self.files.keys() {
            contents.insert(path.clone(), std::fs::read_to_string(checkout.path().join(path))?);
        }
        if contents == self.files {
            return Err(git::Error::NoChanges);
        }
        if let Some(message) = &self.fail_push {
            return Err(git::Error::IOError(io_error(message)));
        }
        self.pushes.lock().unwrap().push((message.to_string(), contents));
        Ok(())
    }
}

pub struct Fixture {
    pub cluster: Arc<FakeCluster>,
    pub registry: Arc<FakeRegistry>,
    pub repo: Arc<FakeRepo>,
    pub timeouts: Timeouts,
}

impl Fixture {
    pub fn new(cluster: FakeCluster, registry: FakeRegistry, repo: FakeRepo) -> Self {
        Self {
            cluster: Arc::new(cluster),
            registry: Arc::new(registry),
            repo: Arc::new(repo),
            timeouts: Timeouts {
                registry: Duration::from_secs(5),
                repository: Duration::from_secs(5),
                cluster: Duration::from_secs(5),
                git: Duration::from_secs(5),
            },
        }
    }

    pub fn with_cluster_timeout(mut self, limit: Duration) -> Self {
        self.timeouts.cluster = limit;
        self
    }

    pub fn context(&self) -> ReleaseContext {
        let manifests: Arc<dyn Manifests> = Arc::new(YamlManifests);
        ReleaseContext::new(
            self.cluster.clone(),
            manifests,
            self.registry.clone(),
            self.repo.clone(),
            self.timeouts,
        )
    }
}
