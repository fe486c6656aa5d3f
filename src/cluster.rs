use std::collections::BTreeSet;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use crate::resource::{Kind, ResourceId};
use crate::workload::{self, Container};
use Error::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kubectl exited with code {status}: {stderr}")]
    Kubectl { status: ExitStatus, stderr: String },

    #[error("decode kubectl output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("kubectl did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// A workload as it is currently running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveResource {
    pub id: ResourceId,
    pub containers: Vec<Container>,
}

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Every workload, optionally restricted to one namespace.
    async fn list_all(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, Error>;

    /// The named workloads. Ids the cluster does not know are absent from the result.
    async fn list_some(&self, ids: &[ResourceId]) -> Result<Vec<LiveResource>, Error>;

    /// Applies one manifest document.
    async fn apply(&self, manifest: &[u8]) -> Result<(), Error>;
}

/// Talks to the cluster through the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    pub binary: String,
    /// Empty means the current context.
    pub context: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct List {
    items: Vec<serde_yaml::Value>,
}

impl Kubectl {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        if !self.context.is_empty() {
            command.arg("--context").arg(&self.context);
        }
        command.kill_on_drop(true);
        command
    }

    async fn get(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, Error> {
        let kinds = Kind::ALL.map(|kind| kind.as_str()).join(",");
        let mut command = self.command();
        command.arg("get").arg(kinds).arg("--output").arg("json");
        match namespace {
            Some(namespace) => command.arg("--namespace").arg(namespace),
            None => command.arg("--all-namespaces"),
        };
        debug!("Listing workloads with kubectl, namespace {:?}", namespace);

        let output = tokio::time::timeout(self.timeout, command.stdin(Stdio::null()).output())
            .await
            .map_err(|_| Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(Error::Kubectl {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(decode(&output.stdout)?)
    }
}

/// Turns `kubectl get -o json` output into live resources, skipping kinds we do not manage.
fn decode(stdout: &[u8]) -> Result<Vec<LiveResource>, serde_json::Error> {
    let list: List = serde_json::from_slice(stdout)?;
    Ok(list
        .items
        .iter()
        .filter_map(|item| {
            let kind: Kind = item.get("kind")?.as_str()?.parse().ok()?;
            let metadata = item.get("metadata")?;
            let name = metadata.get("name")?.as_str()?;
            let namespace = metadata.get("namespace").and_then(|ns| ns.as_str()).unwrap_or_default();
            Some(LiveResource {
                id: ResourceId::new(namespace, kind, name),
                containers: workload::containers(kind, item),
            })
        })
        .collect())
}

#[async_trait]
impl Cluster for Kubectl {
    async fn list_all(&self, namespace: Option<&str>) -> Result<Vec<LiveResource>, Error> {
        self.get(namespace).await
    }

    async fn list_some(&self, ids: &[ResourceId]) -> Result<Vec<LiveResource>, Error> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let wanted: BTreeSet<&ResourceId> = ids.iter().collect();
        let namespaces: BTreeSet<&str> = ids.iter().map(ResourceId::namespace).collect();
        let namespace = match namespaces.len() {
            1 => namespaces.into_iter().next(),
            _ => None,
        };
        Ok(self
            .get(namespace)
            .await?
            .into_iter()
            .filter(|resource| wanted.contains(&resource.id))
            .collect())
    }

    async fn apply(&self, manifest: &[u8]) -> Result<(), Error> {
        let mut child = self
            .command()
            .arg("apply")
            .arg("--filename")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(manifest).await?;
        }
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Timeout(self.timeout))??;
        if output.status.success() {
            debug!("kubectl apply: {}", String::from_utf8_lossy(&output.stdout).trim());
            Ok(())
        } else {
            Err(Error::Kubectl {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
