use std::path::PathBuf;
use std::time::Duration;
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;
use Error::*;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile { path: String, err: std::io::Error },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("git.url is not set")]
    MissingGitUrl,

    #[error("registry.concurrency must be at least 1")]
    NoRegistryConcurrency,
}

/// A nr.toml file.
#[derive(Deserialize, Debug, Clone)]
pub struct File {
    pub description: Option<String>,
    pub git: Git,
    pub cluster: Cluster,
    pub registry: Registry,
    pub timeouts: Timeouts,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Reads a user configuration file and lays it over the built-in defaults.
    /// Tables are merged key by key; everything else in the user file wins.
    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let user = std::fs::read_to_string(path).map_err(|err| ReadFile {
            path: path.to_string(),
            err,
        })?;
        Self::from_layers(DEFAULT_CONFIG, &user)
    }

    fn from_layers(base: &str, user: &str) -> Result<Self, Error> {
        let mut merged: toml::Value = toml::from_str(base)?;
        merge(&mut merged, toml::from_str(user)?);
        Ok(merged.try_into()?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.git.url.is_empty() {
            return Err(MissingGitUrl);
        }
        if self.registry.concurrency == 0 {
            return Err(NoRegistryConcurrency);
        }
        Ok(())
    }
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Git {
    pub url: String,
    #[serde_inline_default("main".to_string())]
    pub branch: String,
    /// Directories or files holding manifests, relative to the repository root.
    #[serde_inline_default(vec![PathBuf::from(".")])]
    pub paths: Vec<PathBuf>,
    pub user: String,
    pub email: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Cluster {
    pub kubectl: String,
    /// Empty means the current kubectl context.
    pub context: String,
    /// Restricts "all resources" releases to one namespace. Empty means every namespace.
    pub namespace: String,
}

impl Cluster {
    pub fn namespace(&self) -> Option<&str> {
        Some(self.namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Registry {
    /// Registries reached over plain HTTP.
    #[serde_inline_default(vec![])]
    pub insecure_hosts: Vec<String>,
    /// User presented to registry token services along with the token.
    pub username: String,
    /// Environment variable holding a password or access token for registries.
    pub token_env: String,
    /// Registries, by host suffix, that accept Google credentials.
    #[serde_inline_default(vec![])]
    pub google_hosts: Vec<String>,
    /// Image manifests fetched in parallel for each repository.
    #[serde_inline_default(8)]
    pub concurrency: usize,
}

impl Registry {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

/// Seconds allowed for each kind of external call.
#[derive(Deserialize, Debug, Clone)]
pub struct Timeouts {
    /// Each registry request.
    pub registry: u64,
    /// Listing one repository with all its image metadata.
    pub repository: u64,
    pub cluster: u64,
    pub git: u64,
}

impl Timeouts {
    pub fn registry(&self) -> Duration {
        Duration::from_secs(self.registry)
    }

    pub fn repository(&self) -> Duration {
        Duration::from_secs(self.repository)
    }

    pub fn cluster(&self) -> Duration {
        Duration::from_secs(self.cluster)
    }

    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git)
    }
}
