use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use ParseError::*;

/// Namespace used for resources whose manifest does not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Sentinel accepted wherever a list of resources is expected.
pub const ALL_RESOURCES: &str = "<all>";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("resource id '{0}' must have the form <namespace>:<kind>/<name>")]
    Malformed(String),

    #[error("unsupported workload kind '{0}'")]
    UnsupportedKind(String),
}

/// Workload kinds that carry containers the engine knows how to update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    CronJob,
    DaemonSet,
    Deployment,
    ReplicationController,
    StatefulSet,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::CronJob,
        Kind::DaemonSet,
        Kind::Deployment,
        Kind::ReplicationController,
        Kind::StatefulSet,
    ];

    /// Lowercase form used in resource ids and by kubectl.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::CronJob => "cronjob",
            Kind::DaemonSet => "daemonset",
            Kind::Deployment => "deployment",
            Kind::ReplicationController => "replicationcontroller",
            Kind::StatefulSet => "statefulset",
        }
    }

    /// Path from the resource root to its pod spec.
    pub fn pod_spec_path(&self) -> &'static [&'static str] {
        match self {
            Kind::CronJob => &["spec", "jobTemplate", "spec", "template", "spec"],
            _ => &["spec", "template", "spec"],
        }
    }
}

impl FromStr for Kind {
    type Err = ParseError;

    /// Accepts both the manifest spelling (`Deployment`) and the id spelling (`deployment`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnsupportedKind(s.to_string()))
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a managed workload, e.g. `team:deployment/app`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    namespace: String,
    kind: Kind,
    name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, kind: Kind, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                namespace
            },
            kind,
            name: name.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for ResourceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = s.split_once(':').ok_or_else(|| Malformed(s.to_string()))?;
        let (kind, name) = rest.split_once('/').ok_or_else(|| Malformed(s.to_string()))?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(Malformed(s.to_string()));
        }
        Ok(ResourceId::new(namespace, kind.parse()?, name))
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single resource, or every resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceSpec {
    All,
    Id(ResourceId),
}

impl FromStr for ResourceSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ALL_RESOURCES {
            Ok(ResourceSpec::All)
        } else {
            s.parse().map(ResourceSpec::Id)
        }
    }
}

impl Display for ResourceSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceSpec::All => f.write_str(ALL_RESOURCES),
            ResourceSpec::Id(id) => id.fmt(f),
        }
    }
}

impl From<ResourceId> for ResourceSpec {
    fn from(id: ResourceId) -> Self {
        ResourceSpec::Id(id)
    }
}
