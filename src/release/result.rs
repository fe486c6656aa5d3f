use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use serde::{Serialize, Serializer};
use thiserror::Error;
use crate::image::ImageId;
use crate::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Ignored,
    Skipped,
    Failed,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Success => "success",
            Status::Ignored => "ignored",
            Status::Skipped => "skipped",
            Status::Failed => "failed",
        })
    }
}

/// Why a resource did not end up with a successful update.
/// Everything except [`Reason::Error`] renders as a stable token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    NotIncluded,
    Excluded,
    DifferentImage,
    Locked,
    NotInCluster,
    ImageNotFound,
    ImageUpToDate,
    DoesNotUseImage,
    /// A policy update that leaves the manifest byte-identical.
    Unchanged,
    Error(String),
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Reason::NotIncluded => "NotIncluded",
            Reason::Excluded => "Excluded",
            Reason::DifferentImage => "DifferentImage",
            Reason::Locked => "Locked",
            Reason::NotInCluster => "NotInCluster",
            Reason::ImageNotFound => "ImageNotFound",
            Reason::ImageUpToDate => "ImageUpToDate",
            Reason::DoesNotUseImage => "DoesNotUseImage",
            Reason::Unchanged => "Unchanged",
            Reason::Error(err) => err,
        })
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerUpdate {
    pub container: String,
    pub current: ImageId,
    pub target: ImageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Reason>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub per_container: Vec<ContainerUpdate>,
}

impl ResourceResult {
    pub fn success(per_container: Vec<ContainerUpdate>) -> Self {
        Self {
            status: Status::Success,
            error: None,
            per_container,
        }
    }

    pub fn ignored(reason: Reason) -> Self {
        Self {
            status: Status::Ignored,
            error: Some(reason),
            per_container: vec![],
        }
    }

    pub fn skipped(reason: Reason) -> Self {
        Self {
            status: Status::Skipped,
            error: Some(reason),
            per_container: vec![],
        }
    }

    pub fn failed(err: impl Display) -> Self {
        Self {
            status: Status::Failed,
            error: Some(Reason::Error(err.to_string())),
            per_container: vec![],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("a result for {0} has already been recorded")]
    AlreadyRecorded(ResourceId),

    #[error("{0} has no successful result to mark as failed")]
    NotSuccessful(ResourceId),
}

/// Per-resource outcome of a release. Entries are written once; the only
/// permitted change afterwards is failing a successful entry during apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReleaseResult(BTreeMap<ResourceId, ResourceResult>);

impl ReleaseResult {
    pub fn add(&mut self, id: ResourceId, result: ResourceResult) -> Result<(), RecordError> {
        if self.0.contains_key(&id) {
            return Err(RecordError::AlreadyRecorded(id));
        }
        self.0.insert(id, result);
        Ok(())
    }

    /// Turns a successful entry into a failure, keeping its container updates for reference.
    pub fn downgrade(&mut self, id: &ResourceId, err: impl Display) -> Result<(), RecordError> {
        match self.0.get_mut(id) {
            Some(result) if result.status == Status::Success => {
                result.status = Status::Failed;
                result.error = Some(Reason::Error(err.to_string()));
                Ok(())
            }
            _ => Err(RecordError::NotSuccessful(id.clone())),
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceResult> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.0.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ResourceResult)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, status: Status) -> usize {
        self.0.values().filter(|result| result.status == status).count()
    }
}

/// Table with one line per resource and one extra line per additional container update.
impl Display for ReleaseResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self
            .0
            .keys()
            .map(|id| id.to_string().len())
            .max()
            .unwrap_or(0)
            .max("RESOURCE".len());
        writeln!(f, "{:width$}  {:8}  {}", "RESOURCE", "STATUS", "UPDATES")?;
        for (id, result) in &self.0 {
            let mut details: Vec<String> = result
                .per_container
                .iter()
                .map(|u| format!("{}: {} -> {}", u.container, u.current, u.target.tag()))
                .collect();
            if let Some(reason) = &result.error {
                details.insert(0, format!("({reason})"));
            }
            let mut details = details.into_iter();
            writeln!(
                f,
                "{:width$}  {:8}  {}",
                id.to_string(),
                result.status.to_string(),
                details.next().unwrap_or_default()
            )?;
            for detail in details {
                writeln!(f, "{:width$}  {:8}  {}", "", "", detail)?;
            }
        }
        Ok(())
    }
}
