use std::collections::BTreeMap;
use std::path::PathBuf;
use log::{debug, info, warn};
use crate::git;
use crate::manifest::{self, ManifestIndex, Manifests};
use crate::policy::PolicyUpdate;
use crate::resource::ResourceId;
use super::context::ReleaseContext;
use super::result::{ContainerUpdate, RecordError, ReleaseResult, Status};
use super::update::panic_message;

/// What a successful resource needs done to its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Images(Vec<ContainerUpdate>),
    Policies(PolicyUpdate),
}

/// Manifest edits for a release, computed in memory.
#[derive(Debug, Clone, Default)]
pub struct Rewrite {
    /// New contents of every file that changed, relative to the repository root.
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    /// The updated definition of every resource to apply.
    pub documents: BTreeMap<ResourceId, Vec<u8>>,
}

fn edit(
    manifests: &dyn Manifests,
    content: &[u8],
    id: &ResourceId,
    change: &Change,
) -> Result<Vec<u8>, manifest::Error> {
    match change {
        Change::Images(updates) => updates.iter().try_fold(content.to_vec(), |content, update| {
            manifests.set_container_image(&content, id, &update.container, &update.target)
        }),
        Change::Policies(update) => manifests.update_policies(content, id, update),
    }
}

/// Applies `changes` to the manifest files in `index`. Several resources may share
/// a file; their edits are chained on one buffer. A resource whose manifest cannot
/// be edited is failed and leaves the buffer as it was.
pub fn rewrite(
    manifests: &dyn Manifests,
    index: &ManifestIndex,
    changes: &BTreeMap<ResourceId, Change>,
    result: &mut ReleaseResult,
) -> Result<Rewrite, RecordError> {
    let mut buffers: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
    let mut edited: Vec<(&ResourceId, PathBuf)> = vec![];

    for (id, change) in changes {
        if result.get(id).map(|r| r.status) != Some(Status::Success) {
            continue;
        }
        let manifest = match index.get(id) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!("{id}: {err}");
                result.downgrade(id, err)?;
                continue;
            }
        };
        let Some(original) = index.file(&manifest.source) else {
            result.downgrade(id, format!("{} is not part of the working copy", manifest.source.display()))?;
            continue;
        };
        let buffer = buffers
            .entry(manifest.source.clone())
            .or_insert_with(|| original.to_vec());
        match edit(manifests, buffer.as_slice(), id, change) {
            Ok(updated) => {
                *buffer = updated;
                edited.push((id, manifest.source.clone()));
            }
            Err(err) => {
                warn!("{id}: {err}");
                result.downgrade(id, err)?;
            }
        }
    }

    let mut rewrite = Rewrite::default();
    for (id, source) in edited {
        let content = &buffers[&source];
        let document = manifests
            .parse(&source, content)
            .map_err(|err| err.to_string())
            .and_then(|parsed| {
                parsed
                    .into_iter()
                    .find(|manifest| &manifest.id == id)
                    .map(|manifest| manifest.document)
                    .ok_or_else(|| format!("{id} disappeared from {}", source.display()))
            });
        match document {
            Ok(document) => {
                rewrite.documents.insert(id.clone(), document);
            }
            Err(err) => result.downgrade(id, err)?,
        }
    }
    rewrite.files = buffers
        .into_iter()
        .filter(|(path, content)| index.file(path) != Some(content.as_slice()))
        .collect();
    debug!(
        "{} files rewritten for {} resources",
        rewrite.files.len(),
        rewrite.documents.len()
    );
    Ok(rewrite)
}

/// Writes, commits and pushes the rewritten files, then applies each resource to
/// the cluster. Until the push succeeds every resource shares the outcome; after
/// that each resource succeeds or fails on its own.
pub async fn apply(
    ctx: &ReleaseContext,
    rewrite: Rewrite,
    message: &str,
    result: &mut ReleaseResult,
) -> Result<(), RecordError> {
    if rewrite.documents.is_empty() {
        debug!("Nothing to apply");
        return Ok(());
    }

    let written = ctx.write_files(
        rewrite
            .files
            .iter()
            .map(|(path, content)| (path.as_path(), content.as_slice())),
    )
    .await;
    if let Err(err) = written {
        return fail_all(result, rewrite.documents.keys(), format!("write manifests: {err}"));
    }
    match ctx.commit_and_push(message).await {
        Ok(()) => {}
        Err(git::Error::NoChanges) => info!("Manifests already up to date, nothing to push"),
        Err(err) => return fail_all(result, rewrite.documents.keys(), format!("commit and push: {err}")),
    }

    let limit = ctx.timeouts().cluster;
    let handles: Vec<_> = rewrite
        .documents
        .into_iter()
        .map(|(id, document)| {
            let cluster = ctx.cluster();
            let handle = tokio::spawn(async move { tokio::time::timeout(limit, cluster.apply(&document)).await });
            (id, handle)
        })
        .collect();
    for (id, handle) in handles {
        let failure = match handle.await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(format!("apply: {err}")),
            Ok(Err(_)) => Some(format!("apply did not finish within {limit:?}")),
            Err(err) if err.is_panic() => Some(format!("apply panicked: {}", panic_message(&*err.into_panic()))),
            Err(err) => Some(format!("apply: {err}")),
        };
        match failure {
            None => info!("Applied {id}"),
            Some(err) => {
                warn!("{id}: {err}");
                result.downgrade(&id, err)?;
            }
        }
    }
    Ok(())
}

fn fail_all<'a>(
    result: &mut ReleaseResult,
    ids: impl Iterator<Item = &'a ResourceId>,
    err: String,
) -> Result<(), RecordError> {
    warn!("{err}");
    for id in ids {
        result.downgrade(id, &err)?;
    }
    Ok(())
}
