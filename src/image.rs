use std::fmt::{Display, Formatter};
use std::str::FromStr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use ParseError::*;

/// Registry assumed for image names without an explicit host.
pub const DOCKER_HUB: &str = "docker.io";

/// Sentinel image spec: release the newest image of every repository.
pub const LATEST: &str = "<all latest>";

/// Sentinel image spec: leave images alone.
pub const NONE: &str = "<no updates>";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty image reference")]
    Empty,

    #[error("image reference '{0}' has an empty path component")]
    EmptyComponent(String),

    #[error("image reference '{0}' has an empty tag")]
    EmptyTag(String),

    #[error("image reference '{0}' is pinned by digest, which cannot be released")]
    Digest(String),
}

/// A repository, e.g. `europe-north1-docker.pkg.dev/nais/team/app`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageName {
    host: String,
    path: String,
}

impl ImageName {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn with_tag(&self, tag: impl Into<String>) -> ImageId {
        ImageId {
            name: self.clone(),
            tag: tag.into(),
        }
    }
}

impl FromStr for ImageName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Empty);
        }
        let mut components: Vec<&str> = s.split('/').collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(EmptyComponent(s.to_string()));
        }
        let first = components[0];
        let host = if components.len() > 1
            && (first.contains('.') || first.contains(':') || first == "localhost")
        {
            components.remove(0).to_string()
        } else {
            DOCKER_HUB.to_string()
        };
        if host == DOCKER_HUB && components.len() == 1 {
            components.insert(0, "library");
        }
        Ok(ImageName {
            host,
            path: components.join("/"),
        })
    }
}

impl Display for ImageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

/// A repository and tag, e.g. `ghcr.io/navikt/app:2024.11.01-abcdef`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId {
    name: ImageName,
    tag: String,
}

impl ImageId {
    pub fn name(&self) -> &ImageName {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ImageId {
    type Err = ParseError;

    /// Untagged references resolve to the `latest` tag, like the container runtime does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('@') {
            return Err(Digest(s.to_string()));
        }
        let last_slash = s.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match s[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&s[..colon], &s[colon + 1..])
            }
            None => (s, "latest"),
        };
        if tag.is_empty() {
            return Err(EmptyTag(s.to_string()));
        }
        Ok(ImageId {
            name: name.parse()?,
            tag: tag.to_string(),
        })
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl Serialize for ImageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An image known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: ImageId,
    pub created_at: Option<DateTime<Utc>>,
}

impl ImageInfo {
    pub fn new(id: ImageId, created_at: Option<DateTime<Utc>>) -> Self {
        Self { id, created_at }
    }
}

/// Which image a release moves containers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSpec {
    Latest,
    None,
    Exact(ImageId),
}

impl FromStr for ImageSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            LATEST => Ok(ImageSpec::Latest),
            NONE => Ok(ImageSpec::None),
            _ => s.parse().map(ImageSpec::Exact),
        }
    }
}

impl Display for ImageSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSpec::Latest => f.write_str(LATEST),
            ImageSpec::None => f.write_str(NONE),
            ImageSpec::Exact(id) => id.fmt(f),
        }
    }
}
