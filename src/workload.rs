//! Container access for the workload kinds in [`Kind`], shared by the
//! cluster and manifest collaborators.

use serde_yaml::Value;
use crate::image::{self, ImageId};
use crate::resource::Kind;

const CONTAINER_LISTS: [&str; 2] = ["initContainers", "containers"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    /// Image reference exactly as written in the pod spec.
    pub image: String,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }

    pub fn image_id(&self) -> Result<ImageId, image::ParseError> {
        self.image.parse()
    }
}

fn pod_spec<'a>(kind: Kind, resource: &'a Value) -> Option<&'a Value> {
    kind.pod_spec_path()
        .iter()
        .try_fold(resource, |value, key| value.get(*key))
}

fn pod_spec_mut<'a>(kind: Kind, resource: &'a mut Value) -> Option<&'a mut Value> {
    kind.pod_spec_path()
        .iter()
        .try_fold(resource, |value, key| value.get_mut(*key))
}

/// Init containers first, then containers, in declaration order.
pub fn containers(kind: Kind, resource: &Value) -> Vec<Container> {
    let Some(spec) = pod_spec(kind, resource) else {
        return vec![];
    };
    CONTAINER_LISTS
        .iter()
        .filter_map(|list| spec.get(*list)?.as_sequence())
        .flatten()
        .filter_map(|container| {
            Some(Container::new(
                container.get("name")?.as_str()?,
                container.get("image")?.as_str()?,
            ))
        })
        .collect()
}

/// Replaces the image of the named container. Returns false when no such container exists.
pub fn set_image(kind: Kind, resource: &mut Value, container: &str, image: &ImageId) -> bool {
    let Some(spec) = pod_spec_mut(kind, resource) else {
        return false;
    };
    for list in CONTAINER_LISTS {
        let Some(containers) = spec.get_mut(list).and_then(Value::as_sequence_mut) else {
            continue;
        };
        for entry in containers.iter_mut() {
            if entry.get("name").and_then(Value::as_str) == Some(container) {
                if let Some(mapping) = entry.as_mapping_mut() {
                    mapping.insert("image".into(), image.to_string().into());
                    return true;
                }
            }
        }
    }
    false
}
