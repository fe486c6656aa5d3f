use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use log::debug;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use crate::image::ImageId;
use crate::policy::{Policies, Policy, PolicyUpdate};
use crate::resource::{Kind, ResourceId};
use crate::workload::{self, Container};
use Error::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no manifest found for {0}")]
    NotFound(ResourceId),

    #[error("multiple manifests found for {id}: {}", paths.join(", "))]
    Multiple { id: ResourceId, paths: Vec<String> },

    #[error("container '{container}' not found in manifest for {id}")]
    ContainerNotFound { id: ResourceId, container: String },

    #[error("parse {path}: {err}")]
    Parse { path: String, err: serde_yaml::Error },

    #[error("manifest is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("read {path}: {err}")]
    ReadFile { path: String, err: std::io::Error },

    #[error("scan file system: {0}")]
    FileSystem(#[from] std::io::Error),
}

/// One workload definition found in the config repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub id: ResourceId,
    /// File holding the definition, relative to the repository root.
    pub source: PathBuf,
    pub containers: Vec<Container>,
    pub policies: Policies,
    /// The definition on its own, suitable for applying to the cluster.
    pub document: Vec<u8>,
}

/// All workload definitions below the configured paths, with the file contents they came from.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    files: BTreeMap<PathBuf, Vec<u8>>,
    manifests: BTreeMap<ResourceId, Vec<Manifest>>,
}

impl ManifestIndex {
    pub fn insert_file(&mut self, path: PathBuf, content: Vec<u8>, manifests: Vec<Manifest>) {
        for manifest in manifests {
            self.manifests.entry(manifest.id.clone()).or_default().push(manifest);
        }
        self.files.insert(path, content);
    }

    /// The unique definition of `id`.
    pub fn get(&self, id: &ResourceId) -> Result<&Manifest, Error> {
        match self.manifests.get(id).map(Vec::as_slice) {
            None | Some([]) => Err(NotFound(id.clone())),
            Some([manifest]) => Ok(manifest),
            Some(many) => Err(Multiple {
                id: id.clone(),
                paths: many.iter().map(|m| m.source.display().to_string()).collect(),
            }),
        }
    }

    pub fn file(&self, path: &Path) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.manifests.keys()
    }

    /// Resources whose every definition satisfies `predicate`.
    fn select(&self, predicate: impl Fn(&Policies) -> bool) -> BTreeSet<ResourceId> {
        self.manifests
            .iter()
            .filter(|(_, manifests)| manifests.iter().all(|m| predicate(&m.policies)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn locked(&self) -> BTreeSet<ResourceId> {
        self.select(Policies::is_locked)
    }

    pub fn automated(&self) -> BTreeSet<ResourceId> {
        self.select(Policies::is_automated)
    }

    /// Policies of the unique definition, or none when it cannot be located.
    pub fn policies(&self, id: &ResourceId) -> Policies {
        self.get(id).map(|m| m.policies.clone()).unwrap_or_default()
    }
}

/// Reads and edits workload definitions. Edits operate on whole file contents
/// and return the new contents; unchanged input yields byte-identical output.
pub trait Manifests: Send + Sync {
    fn load(&self, base: &Path, paths: &[PathBuf]) -> Result<ManifestIndex, Error>;

    fn parse(&self, source: &Path, content: &[u8]) -> Result<Vec<Manifest>, Error>;

    fn set_container_image(
        &self,
        content: &[u8],
        id: &ResourceId,
        container: &str,
        image: &ImageId,
    ) -> Result<Vec<u8>, Error>;

    fn update_policies(
        &self,
        content: &[u8],
        id: &ResourceId,
        update: &PolicyUpdate,
    ) -> Result<Vec<u8>, Error>;
}

/// Edits manifests through the parsed YAML value tree.
#[derive(Debug, Clone, Default)]
pub struct YamlManifests;

fn is_manifest_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Recursively lists manifest files, skipping hidden entries such as `.git`.
fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_dir(&path, files)?;
        } else if is_manifest_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn documents(source: &Path, content: &[u8]) -> Result<Vec<Value>, Error> {
    serde_yaml::Deserializer::from_slice(content)
        .map(Value::deserialize)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect::<Result<_, _>>()
        .map_err(|err| Parse {
            path: source.display().to_string(),
            err,
        })
}

fn resource_id(doc: &Value) -> Option<ResourceId> {
    let kind: Kind = doc.get("kind")?.as_str()?.parse().ok()?;
    let metadata = doc.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata.get("namespace").and_then(Value::as_str).unwrap_or_default();
    Some(ResourceId::new(namespace, kind, name))
}

fn policies(doc: &Value) -> Policies {
    doc.get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(Value::as_mapping)
        .map(|annotations| {
            annotations
                .iter()
                .filter_map(|(key, value)| {
                    let policy = Policy::from_annotation(key.as_str()?)?;
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((policy, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_separator(line: &str) -> bool {
    line.strip_prefix("---")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// Splits a YAML stream into the raw text of its documents. Each piece keeps the
/// `---` line opening it, so the pieces concatenate back to `text`.
fn raw_documents(text: &str) -> Vec<&str> {
    let mut starts = vec![0];
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 && is_separator(line) {
            starts.push(offset);
        }
        offset += line.len();
    }
    starts.push(text.len());
    starts.windows(2).map(|w| &text[w[0]..w[1]]).collect()
}

/// Applies `edit` to the single document defining `id`. Only that document is
/// re-rendered; the text of every other document in the file is kept as it was.
fn edit_document(
    content: &[u8],
    id: &ResourceId,
    edit: impl FnOnce(&mut Value) -> Result<(), Error>,
) -> Result<Vec<u8>, Error> {
    let raw = raw_documents(std::str::from_utf8(content)?);
    let mut matching = vec![];
    for (i, text) in raw.iter().enumerate() {
        let doc: Value = serde_yaml::from_str(text).map_err(|err| Parse {
            path: format!("document {i}"),
            err,
        })?;
        if resource_id(&doc).as_ref() == Some(id) {
            matching.push((i, doc));
        }
    }
    let (index, mut doc) = match matching.len() {
        0 => return Err(NotFound(id.clone())),
        1 => matching.remove(0),
        _ => {
            return Err(Multiple {
                id: id.clone(),
                paths: matching.iter().map(|(i, _)| format!("document {i}")).collect(),
            })
        }
    };

    let original = doc.clone();
    edit(&mut doc)?;
    if doc == original {
        return Ok(content.to_vec());
    }
    let separator = raw[index]
        .split_inclusive('\n')
        .next()
        .filter(|line| is_separator(line))
        .unwrap_or_default();
    let rendered = format!("{separator}{}", serde_yaml::to_string(&doc)?);
    let mut updated = String::with_capacity(content.len() + rendered.len());
    for (i, text) in raw.iter().enumerate() {
        updated.push_str(if i == index { &rendered } else { text });
    }
    Ok(updated.into_bytes())
}

impl Manifests for YamlManifests {
    fn load(&self, base: &Path, paths: &[PathBuf]) -> Result<ManifestIndex, Error> {
        let mut files = vec![];
        for path in paths {
            let path = base.join(path);
            if path.is_dir() {
                walk_dir(&path, &mut files)?;
            } else if is_manifest_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        files.dedup();
        debug!("{} manifest files found below {}", files.len(), base.display());

        let mut index = ManifestIndex::default();
        for path in files {
            let content = std::fs::read(&path).map_err(|err| ReadFile {
                path: path.display().to_string(),
                err,
            })?;
            let relative = path.strip_prefix(base).unwrap_or(&path).to_path_buf();
            let manifests = self.parse(&relative, &content)?;
            index.insert_file(relative, content, manifests);
        }
        Ok(index)
    }

    fn parse(&self, source: &Path, content: &[u8]) -> Result<Vec<Manifest>, Error> {
        documents(source, content)?
            .iter()
            .filter_map(|doc| resource_id(doc).map(|id| (id, doc)))
            .map(|(id, doc)| {
                Ok(Manifest {
                    containers: workload::containers(id.kind(), doc),
                    policies: policies(doc),
                    document: serde_yaml::to_string(doc)?.into_bytes(),
                    source: source.to_path_buf(),
                    id,
                })
            })
            .collect()
    }

    fn set_container_image(
        &self,
        content: &[u8],
        id: &ResourceId,
        container: &str,
        image: &ImageId,
    ) -> Result<Vec<u8>, Error> {
        edit_document(content, id, |doc| {
            if workload::set_image(id.kind(), doc, container, image) {
                Ok(())
            } else {
                Err(ContainerNotFound {
                    id: id.clone(),
                    container: container.to_string(),
                })
            }
        })
    }

    fn update_policies(
        &self,
        content: &[u8],
        id: &ResourceId,
        update: &PolicyUpdate,
    ) -> Result<Vec<u8>, Error> {
        edit_document(content, id, |doc| {
            let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_mapping_mut) else {
                return Err(NotFound(id.clone()));
            };
            let mut annotations = metadata
                .get("annotations")
                .and_then(Value::as_mapping)
                .cloned()
                .unwrap_or_else(Mapping::new);
            for policy in &update.remove {
                annotations.remove(policy.annotation());
            }
            for (policy, value) in &update.add {
                annotations.insert(policy.annotation().into(), value.clone().into());
            }
            if annotations.is_empty() {
                metadata.remove("annotations");
            } else {
                metadata.insert("annotations".into(), Value::Mapping(annotations));
            }
            Ok(())
        })
    }
}
