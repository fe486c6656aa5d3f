use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use Error::*;

/// Policies are stored as annotations with this prefix on the workload manifest.
pub const ANNOTATION_PREFIX: &str = "release.nais.io/";

const GLOB_PREFIX: &str = "glob:";
const SEMVER_PREFIX: &str = "semver:";
const REGEX_PREFIX: &str = "regex:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    #[error("invalid tag pattern '{pattern}': {reason}")]
    InvalidTagPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Policy {
    Automated,
    Locked,
    LockedMsg,
    LockedUser,
    TagAll,
    /// Tag pattern for a single container.
    Tag(String),
}

impl Policy {
    pub fn annotation(&self) -> String {
        format!("{ANNOTATION_PREFIX}{self}")
    }

    pub fn from_annotation(key: &str) -> Option<Policy> {
        key.strip_prefix(ANNOTATION_PREFIX)?.parse().ok()
    }
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automated" => Ok(Policy::Automated),
            "locked" => Ok(Policy::Locked),
            "locked_msg" => Ok(Policy::LockedMsg),
            "locked_user" => Ok(Policy::LockedUser),
            "tag_all" => Ok(Policy::TagAll),
            _ => match s.strip_prefix("tag.") {
                Some(container) if !container.is_empty() => Ok(Policy::Tag(container.to_string())),
                _ => Err(UnknownPolicy(s.to_string())),
            },
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Automated => f.write_str("automated"),
            Policy::Locked => f.write_str("locked"),
            Policy::LockedMsg => f.write_str("locked_msg"),
            Policy::LockedUser => f.write_str("locked_user"),
            Policy::TagAll => f.write_str("tag_all"),
            Policy::Tag(container) => write!(f, "tag.{container}"),
        }
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Policy values attached to a single workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Policies(BTreeMap<Policy, String>);

impl Policies {
    pub fn get(&self, policy: &Policy) -> Option<&str> {
        self.0.get(policy).map(String::as_str)
    }

    /// Boolean policies count as set unless explicitly `"false"`.
    pub fn has(&self, policy: &Policy) -> bool {
        self.get(policy).is_some_and(|value| value != "false")
    }

    pub fn is_locked(&self) -> bool {
        self.has(&Policy::Locked)
    }

    pub fn is_automated(&self) -> bool {
        self.has(&Policy::Automated)
    }

    /// The pattern restricting which tags "latest" may pick for `container`.
    pub fn tag_pattern(&self, container: &str) -> Result<TagPattern, Error> {
        self.get(&Policy::Tag(container.to_string()))
            .or_else(|| self.get(&Policy::TagAll))
            .map(TagPattern::new)
            .unwrap_or_else(|| Ok(TagPattern::default()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Policy, &str)> {
        self.0.iter().map(|(policy, value)| (policy, value.as_str()))
    }
}

impl FromIterator<(Policy, String)> for Policies {
    fn from_iter<T: IntoIterator<Item = (Policy, String)>>(iter: T) -> Self {
        Policies(iter.into_iter().collect())
    }
}

/// Policies to add and remove on one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub add: BTreeMap<Policy, String>,
    #[serde(default)]
    pub remove: BTreeSet<Policy>,
}

impl PolicyUpdate {
    pub fn add(mut self, policy: Policy, value: impl Into<String>) -> Self {
        self.add.insert(policy, value.into());
        self
    }

    pub fn remove(mut self, policy: Policy) -> Self {
        self.remove.insert(policy);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Restricts the tags a container may be released to.
#[derive(Debug, Clone)]
pub enum TagPattern {
    Glob { source: String, regex: Regex },
    Semver(semver::VersionReq),
    Regex(Regex),
}

impl TagPattern {
    pub fn new(pattern: &str) -> Result<Self, Error> {
        let invalid = |reason: String| InvalidTagPattern {
            pattern: pattern.to_string(),
            reason,
        };
        if let Some(req) = pattern.strip_prefix(SEMVER_PREFIX) {
            return semver::VersionReq::parse(req)
                .map(TagPattern::Semver)
                .map_err(|err| invalid(err.to_string()));
        }
        if let Some(expr) = pattern.strip_prefix(REGEX_PREFIX) {
            return Regex::new(expr)
                .map(TagPattern::Regex)
                .map_err(|err| invalid(err.to_string()));
        }
        let glob = pattern.strip_prefix(GLOB_PREFIX).unwrap_or(pattern);
        let mut expr = String::from("^");
        for c in glob.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');
        Regex::new(&expr)
            .map(|regex| TagPattern::Glob {
                source: glob.to_string(),
                regex,
            })
            .map_err(|err| invalid(err.to_string()))
    }

    /// A tag literally named `latest` only matches a glob that names it.
    pub fn matches(&self, tag: &str) -> bool {
        match self {
            TagPattern::Glob { source, regex } => {
                if tag.eq_ignore_ascii_case("latest") && !source.eq_ignore_ascii_case("latest") {
                    return false;
                }
                regex.is_match(tag)
            }
            TagPattern::Semver(req) => parse_version(tag).is_some_and(|version| req.matches(&version)),
            TagPattern::Regex(regex) => regex.is_match(tag),
        }
    }

    pub fn is_semver(&self) -> bool {
        matches!(self, TagPattern::Semver(_))
    }
}

impl Default for TagPattern {
    fn default() -> Self {
        TagPattern::Glob {
            source: "*".to_string(),
            regex: Regex::new("^.*$").expect("static pattern"),
        }
    }
}

/// Parses `1.2.3` and `v1.2.3` tags.
pub fn parse_version(tag: &str) -> Option<semver::Version> {
    semver::Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}
