//! Release computation and application.
//!
//! A release runs in stages: select the resources a request refers to, reject
//! the ones it cannot touch, calculate what changes for the rest, and (when
//! executing) write, commit, push and apply those changes. Every stage records
//! its verdicts in one [`ReleaseResult`].

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use crate::image::{ImageId, ImageSpec};
use crate::resource::{ResourceId, ResourceSpec};
use crate::{cluster, git, manifest, registry};

pub mod apply;
pub mod context;
pub mod filter;
pub mod images;
pub mod policy;
pub mod releaser;
pub mod result;
pub mod select;
pub mod update;

#[cfg(test)]
pub(crate) mod fake;

pub use context::ReleaseContext;
pub use releaser::{release, release_automated, update_policies};
pub use result::{ContainerUpdate, Reason, ReleaseResult, ResourceResult, Status};

/// Errors that stop a release as a whole.
#[derive(Error, Debug)]
pub enum Error {
    #[error("clone config repository: {0}")]
    Checkout(git::Error),

    #[error("load manifests: {0}")]
    Manifests(#[from] manifest::Error),

    #[error("query cluster: {0}")]
    Cluster(#[from] cluster::Error),

    #[error("query registry: {0}")]
    Registry(#[from] registry::Error),

    #[error("image {0} does not exist in the registry")]
    InvalidImageId(ImageId),

    #[error("{0} did not finish within {1:?}")]
    Timeout(&'static str, Duration),

    #[error("record result: {0}")]
    Record(#[from] result::RecordError),
}

/// A release that stopped early, with everything decided before it stopped.
#[derive(Error, Debug)]
#[error("release aborted: {error}")]
pub struct Aborted {
    #[source]
    pub error: Error,
    pub partial: ReleaseResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// Calculate the result without side effects.
    Plan,
    Execute,
}

/// Who asked for a change, and why. Ends up in the commit message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cause {
    pub user: Option<String>,
    pub message: Option<String>,
}

impl Cause {
    fn trailer(&self) -> String {
        let mut trailer = String::new();
        if let Some(message) = &self.message {
            trailer.push_str(&format!("\n\n{message}"));
        }
        if let Some(user) = &self.user {
            trailer.push_str(&format!("\n\nReleased-by: {user}"));
        }
        trailer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub resource_specs: Vec<ResourceSpec>,
    pub image_spec: ImageSpec,
    pub kind: ReleaseKind,
    pub excludes: Vec<ResourceId>,
    /// Release explicitly named resources even when they are locked.
    pub force: bool,
    pub cause: Cause,
}

impl ReleaseSpec {
    pub fn new(resource_specs: Vec<ResourceSpec>, image_spec: ImageSpec, kind: ReleaseKind) -> Self {
        Self {
            resource_specs,
            image_spec,
            kind,
            excludes: vec![],
            force: false,
            cause: Cause::default(),
        }
    }

    pub fn commit_message(&self) -> String {
        let targets = if self.resource_specs.contains(&ResourceSpec::All) {
            ResourceSpec::All.to_string()
        } else {
            self.resource_specs
                .iter()
                .map(ToString::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", ")
        };
        let summary = match &self.image_spec {
            ImageSpec::Latest => format!("Release latest images to {targets}"),
            ImageSpec::None => format!("Update manifests for {targets}"),
            ImageSpec::Exact(image) => format!("Release {image} to {targets}"),
        };
        format!("{summary}{}", self.cause.trailer())
    }
}

impl Display for ReleaseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ReleaseKind::Plan => "plan",
            ReleaseKind::Execute => "execute",
        })
    }
}
