use std::collections::BTreeSet;
use crate::cluster::LiveResource;
use crate::image::ImageName;
use crate::manifest::Manifest;
use crate::resource::ResourceId;
use crate::workload::Container;
use super::result::{Reason, ResourceResult};

/// What the filters know about one resource.
pub struct Candidate<'a> {
    pub id: &'a ResourceId,
    pub manifest: Option<&'a Manifest>,
    pub live: Option<&'a LiveResource>,
}

impl Candidate<'_> {
    /// Running containers when the cluster knows the resource, otherwise the defined ones.
    pub fn containers(&self) -> &[Container] {
        match (self.live, self.manifest) {
            (Some(live), _) => live.containers.as_slice(),
            (None, Some(manifest)) => manifest.containers.as_slice(),
            (None, None) => &[],
        }
    }
}

/// Rejects a resource by returning its final result, or lets it through with `None`.
pub trait Filter: Send + Sync {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult>;
}

/// Runs filters in order; the first rejection is the verdict.
pub fn first_rejection(filters: &[Box<dyn Filter>], candidate: &Candidate) -> Option<ResourceResult> {
    filters.iter().find_map(|filter| filter.filter(candidate))
}

pub struct IncludeFilter {
    pub ids: BTreeSet<ResourceId>,
}

impl Filter for IncludeFilter {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult> {
        (!self.ids.contains(candidate.id)).then(|| ResourceResult::ignored(Reason::NotIncluded))
    }
}

pub struct ExcludeFilter {
    pub ids: BTreeSet<ResourceId>,
}

impl Filter for ExcludeFilter {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult> {
        self.ids
            .contains(candidate.id)
            .then(|| ResourceResult::ignored(Reason::Excluded))
    }
}

/// Only resources running some image of `repository` take part.
pub struct SpecificImageFilter {
    pub repository: ImageName,
}

impl Filter for SpecificImageFilter {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult> {
        let uses_repository = candidate.containers().iter().any(|container| {
            container
                .image_id()
                .is_ok_and(|image| image.name() == &self.repository)
        });
        (!uses_repository).then(|| ResourceResult::ignored(Reason::DifferentImage))
    }
}

pub struct LockedFilter {
    pub locked: BTreeSet<ResourceId>,
    /// Locked resources to release anyway.
    pub forced: BTreeSet<ResourceId>,
}

impl Filter for LockedFilter {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult> {
        (self.locked.contains(candidate.id) && !self.forced.contains(candidate.id))
            .then(|| ResourceResult::skipped(Reason::Locked))
    }
}

pub struct NotInClusterFilter;

impl Filter for NotInClusterFilter {
    fn filter(&self, candidate: &Candidate) -> Option<ResourceResult> {
        candidate
            .live
            .is_none()
            .then(|| ResourceResult::skipped(Reason::NotInCluster))
    }
}
