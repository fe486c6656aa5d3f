use crate::manifest::{ManifestIndex, Manifests};
use crate::policy::{Policy, PolicyUpdate};
use crate::resource::ResourceId;
use super::result::{Reason, ResourceResult};
use super::Cause;

/// Adds who locked a resource, and why, to an update that locks it. Unlocking
/// clears both.
pub fn decorate(update: &PolicyUpdate, cause: &Cause) -> PolicyUpdate {
    let mut update = update.clone();
    if update.add.contains_key(&Policy::Locked) {
        if let Some(user) = &cause.user {
            update.add.entry(Policy::LockedUser).or_insert_with(|| user.clone());
        }
        if let Some(message) = &cause.message {
            update.add.entry(Policy::LockedMsg).or_insert_with(|| message.clone());
        }
    }
    if update.remove.contains(&Policy::Locked) {
        update.remove.insert(Policy::LockedUser);
        update.remove.insert(Policy::LockedMsg);
    }
    update
}

/// Outcome of changing the policies of `id`, decided on the manifest text alone.
pub fn calculate(
    manifests: &dyn Manifests,
    index: &ManifestIndex,
    id: &ResourceId,
    update: &PolicyUpdate,
) -> ResourceResult {
    let manifest = match index.get(id) {
        Ok(manifest) => manifest,
        Err(err) => return ResourceResult::failed(err),
    };
    let Some(content) = index.file(&manifest.source) else {
        return ResourceResult::failed(format!("{} is not part of the working copy", manifest.source.display()));
    };
    match manifests.update_policies(content, id, update) {
        Ok(updated) if updated == content => ResourceResult::skipped(Reason::Unchanged),
        Ok(_) => ResourceResult::success(vec![]),
        Err(err) => ResourceResult::failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use crate::manifest::YamlManifests;
    use crate::release::Status;

    const FILE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: app
  namespace: team
  annotations:
    release.nais.io/automated: "true"
spec:
  template:
    spec:
      containers:
        - name: app
          image: ghcr.io/navikt/app:1
"#;

    fn index(content: &str) -> ManifestIndex {
        let source = Path::new("team/app.yaml");
        let manifests = YamlManifests.parse(source, content.as_bytes()).unwrap();
        let mut index = ManifestIndex::default();
        index.insert_file(source.to_path_buf(), content.as_bytes().to_vec(), manifests);
        index
    }

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    #[test]
    fn lock_records_the_cause() {
        let cause = Cause {
            user: Some("kimt".into()),
            message: Some("incident".into()),
        };
        let update = decorate(&PolicyUpdate::default().add(Policy::Locked, "true"), &cause);
        assert_eq!(update.add.get(&Policy::LockedUser).map(String::as_str), Some("kimt"));
        assert_eq!(update.add.get(&Policy::LockedMsg).map(String::as_str), Some("incident"));

        let update = decorate(&PolicyUpdate::default().remove(Policy::Locked), &cause);
        assert!(update.remove.contains(&Policy::LockedUser));
        assert!(update.remove.contains(&Policy::LockedMsg));
        assert!(update.add.is_empty());
    }

    #[test]
    fn outcomes() {
        let index = index(FILE);
        let app = id("team:deployment/app");

        let lock = PolicyUpdate::default().add(Policy::Locked, "true");
        assert_eq!(calculate(&YamlManifests, &index, &app, &lock), ResourceResult::success(vec![]));

        let noop = PolicyUpdate::default().add(Policy::Automated, "true");
        assert_eq!(
            calculate(&YamlManifests, &index, &app, &noop),
            ResourceResult::skipped(Reason::Unchanged)
        );

        let missing = calculate(&YamlManifests, &index, &id("team:deployment/gone"), &lock);
        assert_eq!(missing.status, Status::Failed);
        assert_eq!(
            missing.error,
            Some(Reason::Error("no manifest found for team:deployment/gone".into()))
        );
    }

    #[test]
    fn ambiguous_manifests_fail() {
        let mut index = index(FILE);
        let copy = Path::new("other/app.yaml");
        index.insert_file(
            copy.to_path_buf(),
            FILE.as_bytes().to_vec(),
            YamlManifests.parse(copy, FILE.as_bytes()).unwrap(),
        );
        let result = calculate(
            &YamlManifests,
            &index,
            &id("team:deployment/app"),
            &PolicyUpdate::default().add(Policy::Locked, "true"),
        );
        assert_eq!(result.status, Status::Failed);
        assert_eq!(
            result.error,
            Some(Reason::Error(
                "multiple manifests found for team:deployment/app: team/app.yaml, other/app.yaml".into()
            ))
        );
    }
}
