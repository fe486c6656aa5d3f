use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, info};
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use Error::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("nothing to commit")]
    NoChanges,

    #[error("git {command} exited with code {status}: {stderr}")]
    Git {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("git {0} did not finish within {1:?}")]
    Timeout(String, Duration),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// A working copy of the config repository, removed from disk when dropped.
#[derive(Debug)]
pub struct Checkout {
    dir: TempDir,
}

impl Checkout {
    pub fn new(dir: TempDir) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the working copy, reporting errors that dropping would swallow.
    pub fn close(self) -> Result<(), std::io::Error> {
        self.dir.close()
    }
}

#[async_trait]
pub trait Repo: Send + Sync {
    /// Fresh, exclusive working copy of the configured branch.
    async fn checkout(&self) -> Result<Checkout, Error>;

    /// Commits every change in the working copy and pushes it.
    /// Returns [`Error::NoChanges`] when there is nothing to commit.
    async fn commit_and_push(&self, checkout: &Checkout, message: &str) -> Result<(), Error>;
}

/// Drives the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    pub url: String,
    pub branch: String,
    pub user: String,
    pub email: String,
    pub timeout: Duration,
}

impl GitCli {
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<Output, Error> {
        let command = args
            .iter()
            .find(|arg| !arg.starts_with('-') && !arg.contains('='))
            .copied()
            .unwrap_or_default()
            .to_string();
        debug!("git {}", args.join(" "));
        let mut git = Command::new("git");
        git.current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, git.output())
            .await
            .map_err(|_| Timeout(command.clone(), self.timeout))??;
        if output.status.success() {
            Ok(output)
        } else {
            Err(Git {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Repo for GitCli {
    async fn checkout(&self) -> Result<Checkout, Error> {
        let dir = tempfile::Builder::new().prefix("nr-").tempdir()?;
        let target = dir.path().to_string_lossy().to_string();
        info!("Cloning {} ({}) into {}", self.url, self.branch, target);
        self.git(
            dir.path(),
            &["clone", "--depth", "1", "--branch", &self.branch, &self.url, &target],
        )
        .await?;
        Ok(Checkout::new(dir))
    }

    async fn commit_and_push(&self, checkout: &Checkout, message: &str) -> Result<(), Error> {
        let dir = checkout.path();
        self.git(dir, &["add", "--all"]).await?;
        let status = self.git(dir, &["status", "--porcelain"]).await?;
        if status.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(NoChanges);
        }
        let user = format!("user.name={}", self.user);
        let email = format!("user.email={}", self.email);
        self.git(dir, &["-c", &user, "-c", &email, "commit", "--message", message])
            .await?;
        let refspec = format!("HEAD:{}", self.branch);
        self.git(dir, &["push", "origin", &refspec]).await?;
        info!("Pushed release commit to {}", self.branch);
        Ok(())
    }
}
