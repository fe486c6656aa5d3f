/// NAIS release
use std::collections::BTreeMap;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use thiserror::Error;
use nr::cluster::Kubectl;
use nr::config;
use nr::git::GitCli;
use nr::image::{ImageSpec, LATEST};
use nr::manifest::YamlManifests;
use nr::policy::{Policy, PolicyUpdate};
use nr::registry::{self, HttpRegistry};
use nr::release::{self, Aborted, Cause, ReleaseContext, ReleaseKind, ReleaseResult, ReleaseSpec, Status};
use nr::resource::{ResourceId, ResourceSpec};
use crate::Error::*;

/// Release container images to workloads defined in a config repository.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory to look for nr.toml in.
    #[arg(default_value = ".")]
    working_directory: String,

    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Options {
    /// Write, push and apply the changes. Without this flag nr only reports what would happen.
    #[arg(long)]
    execute: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Who is releasing. Defaults to $USER.
    #[arg(long)]
    user: Option<String>,

    /// Why, for the commit message.
    #[arg(long)]
    message: Option<String>,
}

impl Options {
    fn kind(&self) -> ReleaseKind {
        if self.execute {
            ReleaseKind::Execute
        } else {
            ReleaseKind::Plan
        }
    }

    fn cause(&self) -> Cause {
        Cause {
            user: self.user.clone().or_else(|| std::env::var("USER").ok()),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Release an image to workloads.
    Release {
        /// Workload as <namespace>:<kind>/<name>, or <all>. Repeatable.
        #[arg(long = "resource", required = true)]
        resources: Vec<ResourceSpec>,

        /// Image to release, `<all latest>` for the newest image of every repository,
        /// or `<no updates>`.
        #[arg(long, default_value = LATEST)]
        image: ImageSpec,

        /// Workload to leave alone. Repeatable.
        #[arg(long = "exclude")]
        excludes: Vec<ResourceId>,

        /// Release named workloads even when they are locked.
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        options: Options,
    },
    /// Release the newest images to every workload with the automated policy.
    Automate {
        #[command(flatten)]
        options: Options,
    },
    /// Change release policies, such as locked or automated, on workloads.
    Policy {
        /// Workload as <namespace>:<kind>/<name>. Repeatable.
        #[arg(long = "resource", required = true)]
        resources: Vec<ResourceId>,

        /// Policy to set, as <policy>=<value>, e.g. `locked=true` or `tag.app=semver:^1`.
        #[arg(long, value_parser = parse_assignment)]
        add: Vec<(Policy, String)>,

        /// Policy to remove.
        #[arg(long)]
        remove: Vec<Policy>,

        #[command(flatten)]
        options: Options,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration file: {0}")]
    ConfigParse(#[from] config::Error),

    #[error("registry client: {0}")]
    RegistryClient(#[from] registry::Error),

    #[error(transparent)]
    Release(#[from] Aborted),

    #[error("encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no policies to add or remove")]
    EmptyPolicyUpdate,
}

fn parse_assignment(s: &str) -> Result<(Policy, String), String> {
    let (policy, value) = s
        .split_once('=')
        .ok_or_else(|| format!("'{s}' must have the form <policy>=<value>"))?;
    Ok((policy.parse().map_err(|err: nr::policy::Error| err.to_string())?, value.to_string()))
}

/// Read configuration file from disk and merge it with the
/// `default.toml` [built-in config](../default.toml).
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists on disk.
/// If it does, it is used implicitly. If not, we ignore any read errors.
fn read_config(args: &Cli) -> Result<config::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "nr.toml";

    let config_path = format!("{}/{}", args.working_directory, DEFAULT_CONFIG_FILE);

    let config_file = match &args.config {
        None => std::fs::metadata(&config_path)
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
            .then_some(config_path),
        Some(c) => Some(c.clone()),
    };

    Ok(if let Some(config_file) = config_file {
        config::File::default_with_user_config_file(&config_file)?
    } else {
        config::File::default()
    })
}

fn release_context(cfg: &config::File) -> Result<ReleaseContext, Error> {
    cfg.validate()?;
    let cluster = Kubectl {
        binary: cfg.cluster.kubectl.clone(),
        context: cfg.cluster.context.clone(),
        timeout: cfg.timeouts.cluster(),
    };
    let registry = HttpRegistry::new(&cfg.registry, cfg.timeouts.registry())?;
    let repo = GitCli {
        url: cfg.git.url.clone(),
        branch: cfg.git.branch.clone(),
        user: cfg.git.user.clone(),
        email: cfg.git.email.clone(),
        timeout: cfg.timeouts.git(),
    };
    Ok(ReleaseContext::new(
        Arc::new(cluster),
        Arc::new(YamlManifests),
        Arc::new(registry),
        Arc::new(repo),
        (&cfg.timeouts).into(),
    )
    .with_paths(cfg.git.paths.clone())
    .with_namespace(cfg.cluster.namespace().map(str::to_string)))
}

fn print(result: &ReleaseResult, json: bool) -> Result<(), Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{result}");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(failed) if failed > 0 => {
            warn!("{failed} resources failed");
            std::process::exit(2)
        }
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

/// Returns the number of failed resources.
async fn run() -> Result<usize, Error> {
    env_logger::init();

    let args = Cli::parse();
    let cfg = read_config(&args)?;
    let mut ctx = release_context(&cfg)?;

    info!("NAIS release {}", env!("CARGO_PKG_VERSION"));

    let (outcome, json) = match args.command {
        Commands::Release {
            resources,
            image,
            excludes,
            force,
            options,
        } => {
            let mut spec = ReleaseSpec::new(resources, image, options.kind());
            spec.excludes = excludes;
            spec.force = force;
            spec.cause = options.cause();
            (release::release(&mut ctx, &spec).await, options.json)
        }
        Commands::Automate { options } => (
            release::release_automated(&mut ctx, options.kind(), options.cause()).await,
            options.json,
        ),
        Commands::Policy {
            resources,
            add,
            remove,
            options,
        } => {
            let update = PolicyUpdate {
                add: add.into_iter().collect(),
                remove: remove.into_iter().collect(),
            };
            if update.is_empty() {
                return Err(EmptyPolicyUpdate);
            }
            let updates: BTreeMap<ResourceId, PolicyUpdate> =
                resources.into_iter().map(|id| (id, update.clone())).collect();
            (
                release::update_policies(&mut ctx, &updates, options.kind(), &options.cause()).await,
                options.json,
            )
        }
    };

    match outcome {
        Ok(result) => {
            print(&result, json)?;
            Ok(result.count(Status::Failed))
        }
        Err(aborted) => {
            if !aborted.partial.is_empty() {
                print(&aborted.partial, json)?;
            }
            Err(Release(aborted))
        }
    }
}
