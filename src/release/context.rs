use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use crate::cluster::{Cluster, LiveResource};
use crate::git::{self, Checkout, Repo};
use crate::image::{ImageId, ImageInfo, ImageName};
use crate::manifest::{ManifestIndex, Manifests};
use crate::registry::Registry;
use crate::resource::ResourceId;
use super::Error;

/// Time allowed for each kind of external call made during a release.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub registry: Duration,
    pub repository: Duration,
    pub cluster: Duration,
    pub git: Duration,
}

impl From<&crate::config::Timeouts> for Timeouts {
    fn from(cfg: &crate::config::Timeouts) -> Self {
        Self {
            registry: cfg.registry(),
            repository: cfg.repository(),
            cluster: cfg.cluster(),
            git: cfg.git(),
        }
    }
}

/// Everything one release needs. The working copy is cloned on first use,
/// belongs to this context alone, and is removed by [`ReleaseContext::clean`]
/// or when the context is dropped.
pub struct ReleaseContext {
    cluster: Arc<dyn Cluster>,
    manifests: Arc<dyn Manifests>,
    registry: Arc<dyn Registry>,
    repo: Arc<dyn Repo>,
    paths: Vec<PathBuf>,
    namespace: Option<String>,
    timeouts: Timeouts,
    checkout: Option<Checkout>,
}

async fn within<T, E>(
    what: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<Result<T, E>, Error> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Timeout(what, limit))
}

impl ReleaseContext {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        manifests: Arc<dyn Manifests>,
        registry: Arc<dyn Registry>,
        repo: Arc<dyn Repo>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            cluster,
            manifests,
            registry,
            repo,
            paths: vec![PathBuf::from(".")],
            namespace: None,
            timeouts,
            checkout: None,
        }
    }

    /// Manifest locations inside the repository.
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.paths = paths;
        self
    }

    /// Restricts "all resources" queries to one namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn manifests(&self) -> &dyn Manifests {
        self.manifests.as_ref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    async fn working_copy(&mut self) -> Result<&Checkout, Error> {
        let checkout = match self.checkout.take() {
            Some(checkout) => checkout,
            None => {
                let checkout = within("git clone", self.timeouts.git, self.repo.checkout())
                    .await?
                    .map_err(Error::Checkout)?;
                debug!("Working copy at {}", checkout.path().display());
                checkout
            }
        };
        Ok(self.checkout.insert(checkout))
    }

    /// Reads every manifest from the working copy, cloning it first if needed.
    pub async fn load_manifests(&mut self) -> Result<ManifestIndex, Error> {
        let base = self.working_copy().await?.path().to_path_buf();
        Ok(self.manifests.load(&base, &self.paths)?)
    }

    pub async fn list_all(&self) -> Result<Vec<LiveResource>, Error> {
        Ok(within("cluster query", self.timeouts.cluster, self.cluster.list_all(self.namespace())).await??)
    }

    pub async fn list_some(&self, ids: &[ResourceId]) -> Result<Vec<LiveResource>, Error> {
        Ok(within("cluster query", self.timeouts.cluster, self.cluster.list_some(ids)).await??)
    }

    pub async fn image_exists(&self, image: &ImageId) -> Result<bool, Error> {
        Ok(within("registry lookup", self.timeouts.registry, self.registry.image_exists(image)).await??)
    }

    /// Handles for fetching repositories concurrently.
    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    pub fn cluster(&self) -> Arc<dyn Cluster> {
        self.cluster.clone()
    }

    /// Fetches one repository's images, bounded by the repository timeout.
    pub async fn fetch_repository(
        registry: Arc<dyn Registry>,
        repository: ImageName,
        limit: Duration,
    ) -> Result<Vec<ImageInfo>, String> {
        match tokio::time::timeout(limit, registry.get_repository(&repository)).await {
            Ok(Ok(images)) => Ok(images),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("registry lookup for {repository} did not finish within {limit:?}")),
        }
    }

    /// Writes changed files into the working copy.
    pub async fn write_files<'a>(
        &self,
        files: impl IntoIterator<Item = (&'a Path, &'a [u8])>,
    ) -> Result<(), std::io::Error> {
        let checkout = self.checkout.as_ref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no working copy")
        })?;
        for (path, content) in files {
            let target = checkout.path().join(path);
            debug!("Writing {}", target.display());
            tokio::fs::write(target, content).await?;
        }
        Ok(())
    }

    pub async fn commit_and_push(&self, message: &str) -> Result<(), git::Error> {
        let checkout = self.checkout.as_ref().ok_or_else(|| {
            git::Error::IOError(std::io::Error::new(std::io::ErrorKind::NotFound, "no working copy"))
        })?;
        match tokio::time::timeout(self.timeouts.git, self.repo.commit_and_push(checkout, message)).await {
            Ok(result) => result,
            Err(_) => Err(git::Error::Timeout("push".to_string(), self.timeouts.git)),
        }
    }

    /// Removes the working copy. Safe to call more than once.
    pub fn clean(&mut self) {
        if let Some(checkout) = self.checkout.take() {
            let path = checkout.path().display().to_string();
            match checkout.close() {
                Ok(()) => info!("Removed working copy {path}"),
                Err(err) => warn!("Remove working copy {path}: {err}"),
            }
        }
    }

    pub fn has_working_copy(&self) -> bool {
        self.checkout.is_some()
    }
}
