use std::collections::{BTreeMap, BTreeSet};
use log::debug;
use crate::image::{ImageId, ImageInfo, ImageName, ImageSpec};
use crate::policy::{parse_version, Policies, TagPattern};
use crate::workload::Container;
use super::context::ReleaseContext;
use super::Error;

/// What should happen to one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Update(ImageId),
    UpToDate,
    /// No acceptable image is known for the container's repository.
    NotFound,
    /// The release does not concern this container.
    Unrelated,
}

/// Answers which image each container should run. Registry lookups happen
/// up front in [`ImageSelector::prepare`], so answering never blocks.
#[derive(Debug, Clone)]
pub struct ImageSelector {
    spec: ImageSpec,
    repositories: BTreeMap<ImageName, Result<Vec<ImageInfo>, String>>,
}

impl ImageSelector {
    /// Fetches what `spec` needs to know about the repositories `containers` use.
    ///
    /// Repositories for "latest" are fetched concurrently, and a failing lookup only
    /// fails the resources using that repository. An exact image that the registry
    /// does not have stops the release.
    pub async fn prepare<'a>(
        ctx: &ReleaseContext,
        spec: &ImageSpec,
        containers: impl IntoIterator<Item = &'a Container>,
    ) -> Result<Self, Error> {
        let names: BTreeSet<ImageName> = containers
            .into_iter()
            .filter_map(|container| container.image_id().ok())
            .map(|image| image.name().clone())
            .collect();

        let mut repositories = BTreeMap::new();
        match spec {
            ImageSpec::None => {}
            ImageSpec::Exact(image) => {
                if names.contains(image.name()) && !ctx.image_exists(image).await? {
                    return Err(Error::InvalidImageId(image.clone()));
                }
            }
            ImageSpec::Latest => {
                let limit = ctx.timeouts().repository;
                let handles: Vec<_> = names
                    .into_iter()
                    .map(|name| {
                        let registry = ctx.registry();
                        let handle = tokio::spawn(ReleaseContext::fetch_repository(registry, name.clone(), limit));
                        (name, handle)
                    })
                    .collect();
                for (name, handle) in handles {
                    let images = handle
                        .await
                        .unwrap_or_else(|err| Err(format!("registry lookup for {name} failed: {err}")));
                    match &images {
                        Ok(images) => debug!("{} images known for {name}", images.len()),
                        Err(err) => debug!("Repository {name}: {err}"),
                    }
                    repositories.insert(name, images);
                }
            }
        }
        Ok(Self {
            spec: spec.clone(),
            repositories,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(spec: ImageSpec, repositories: BTreeMap<ImageName, Result<Vec<ImageInfo>, String>>) -> Self {
        Self { spec, repositories }
    }

    /// Target for one container. `policies` restrict which tags "latest" may pick.
    pub fn select_target(&self, container: &Container, policies: &Policies) -> Result<Target, String> {
        let current = container.image_id();
        match &self.spec {
            ImageSpec::None => Ok(Target::Unrelated),
            ImageSpec::Exact(image) => Ok(match current {
                Ok(current) if current.name() != image.name() => Target::Unrelated,
                Ok(current) if &current == image => Target::UpToDate,
                Ok(_) => Target::Update(image.clone()),
                Err(_) => Target::Unrelated,
            }),
            ImageSpec::Latest => {
                let Ok(current) = current else {
                    return Ok(Target::NotFound);
                };
                let pattern = policies
                    .tag_pattern(&container.name)
                    .map_err(|err| err.to_string())?;
                let images = match self.repositories.get(current.name()) {
                    Some(Ok(images)) => images,
                    Some(Err(err)) => return Err(err.clone()),
                    None => return Ok(Target::NotFound),
                };
                Ok(match newest(images, &pattern) {
                    None => Target::NotFound,
                    Some(newest) if newest.id == current => Target::UpToDate,
                    Some(newest) => Target::Update(newest.id.clone()),
                })
            }
        }
    }
}

/// First acceptable image in registry order, or the highest version for semver patterns.
fn newest<'a>(images: &'a [ImageInfo], pattern: &TagPattern) -> Option<&'a ImageInfo> {
    let mut candidates = images.iter().filter(|image| pattern.matches(image.id.tag()));
    if pattern.is_semver() {
        candidates.max_by_key(|image| parse_version(image.id.tag()))
    } else {
        candidates.next()
    }
}
