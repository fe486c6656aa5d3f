use std::collections::{BTreeMap, BTreeSet};
use log::{debug, info};
use crate::image::ImageSpec;
use crate::manifest::ManifestIndex;
use crate::policy::PolicyUpdate;
use crate::resource::{ResourceId, ResourceSpec};
use super::apply::{self, Change};
use super::context::ReleaseContext;
use super::filter::{
    first_rejection, Candidate, ExcludeFilter, Filter, IncludeFilter, LockedFilter, NotInClusterFilter,
    SpecificImageFilter,
};
use super::images::ImageSelector;
use super::result::{ReleaseResult, Status};
use super::select::{select, Requested, Selection};
use super::{policy, update, Aborted, Cause, Error, ReleaseKind, ReleaseSpec};

/// Releases images to the resources `spec` selects. The working copy is removed
/// before returning, whatever the outcome.
pub async fn release(ctx: &mut ReleaseContext, spec: &ReleaseSpec) -> Result<ReleaseResult, Aborted> {
    info!("Starting {} release of {} to {} resource specs", spec.kind, spec.image_spec, spec.resource_specs.len());
    let mut result = ReleaseResult::default();
    let outcome = run_release(ctx, spec, &mut result).await;
    ctx.clean();
    finish(outcome, result)
}

/// Releases the latest images to every resource with the automated policy.
pub async fn release_automated(
    ctx: &mut ReleaseContext,
    kind: ReleaseKind,
    cause: Cause,
) -> Result<ReleaseResult, Aborted> {
    let automated = match ctx.load_manifests().await {
        Ok(index) => index.automated(),
        Err(error) => {
            ctx.clean();
            return Err(Aborted {
                error,
                partial: ReleaseResult::default(),
            });
        }
    };
    if automated.is_empty() {
        info!("No automated resources");
        ctx.clean();
        return Ok(ReleaseResult::default());
    }
    debug!("Automated resources: {automated:?}");
    let mut spec = ReleaseSpec::new(
        automated.into_iter().map(ResourceSpec::Id).collect(),
        ImageSpec::Latest,
        kind,
    );
    spec.cause = cause;
    release(ctx, &spec).await
}

/// Adds and removes policies on the named resources.
pub async fn update_policies(
    ctx: &mut ReleaseContext,
    updates: &BTreeMap<ResourceId, PolicyUpdate>,
    kind: ReleaseKind,
    cause: &Cause,
) -> Result<ReleaseResult, Aborted> {
    info!("Starting {kind} policy update of {} resources", updates.len());
    let mut result = ReleaseResult::default();
    let outcome = run_policy_update(ctx, updates, kind, cause, &mut result).await;
    ctx.clean();
    finish(outcome, result)
}

fn finish(outcome: Result<(), Error>, result: ReleaseResult) -> Result<ReleaseResult, Aborted> {
    match outcome {
        Ok(()) => {
            info!(
                "Release finished: {} succeeded, {} ignored, {} skipped, {} failed",
                result.count(Status::Success),
                result.count(Status::Ignored),
                result.count(Status::Skipped),
                result.count(Status::Failed),
            );
            Ok(result)
        }
        Err(error) => Err(Aborted { error, partial: result }),
    }
}

fn filters(spec: &ReleaseSpec, selection: &Selection) -> Vec<Box<dyn Filter>> {
    let mut filters: Vec<Box<dyn Filter>> = vec![];
    if let Requested::Only(ids) = &selection.requested {
        filters.push(Box::new(IncludeFilter { ids: ids.clone() }));
    }
    filters.push(Box::new(ExcludeFilter {
        ids: selection.excludes.clone(),
    }));
    if let ImageSpec::Exact(image) = &spec.image_spec {
        filters.push(Box::new(SpecificImageFilter {
            repository: image.name().clone(),
        }));
    }
    let forced = match (&selection.requested, spec.force) {
        (Requested::Only(ids), true) => ids.clone(),
        _ => BTreeSet::new(),
    };
    filters.push(Box::new(LockedFilter {
        locked: selection.locked.clone(),
        forced,
    }));
    filters.push(Box::new(NotInClusterFilter));
    filters
}

async fn run_release(ctx: &mut ReleaseContext, spec: &ReleaseSpec, result: &mut ReleaseResult) -> Result<(), Error> {
    let index = ctx.load_manifests().await?;
    let selection = Selection::new(&spec.resource_specs, &spec.excludes, index.locked());
    let live = select(ctx, &selection).await?;

    let filters = filters(spec, &selection);
    let mut pending = vec![];
    for id in selection.universe(&index, &live, ctx.namespace()) {
        let candidate = Candidate {
            id: &id,
            manifest: index.get(&id).ok(),
            live: live.get(&id),
        };
        match first_rejection(&filters, &candidate) {
            Some(rejection) => {
                debug!("{id}: {} {:?}", rejection.status, rejection.error);
                result.add(id, rejection)?;
            }
            None => pending.push(id),
        }
    }
    debug!("{} resources left after filtering", pending.len());

    let selector = ImageSelector::prepare(
        ctx,
        &spec.image_spec,
        pending.iter().filter_map(|id| live.get(id)).flat_map(|r| r.containers.iter()),
    )
    .await?;

    let mut changes = BTreeMap::new();
    for id in pending {
        let Some(resource) = live.get(&id) else {
            continue;
        };
        let outcome = update::calculate_isolated(&selector, resource, &index.policies(&id));
        if outcome.status == Status::Success {
            changes.insert(id.clone(), Change::Images(outcome.per_container.clone()));
        }
        result.add(id, outcome)?;
    }

    write_changes(ctx, &index, &changes, spec.kind, &spec.commit_message(), result).await
}

async fn run_policy_update(
    ctx: &mut ReleaseContext,
    updates: &BTreeMap<ResourceId, PolicyUpdate>,
    kind: ReleaseKind,
    cause: &Cause,
    result: &mut ReleaseResult,
) -> Result<(), Error> {
    let index = ctx.load_manifests().await?;
    let mut changes = BTreeMap::new();
    for (id, update) in updates {
        let update = policy::decorate(update, cause);
        let outcome = policy::calculate(ctx.manifests(), &index, id, &update);
        if outcome.status == Status::Success {
            changes.insert(id.clone(), Change::Policies(update));
        }
        result.add(id.clone(), outcome)?;
    }
    let message = policy_commit_message(updates.keys(), cause);
    write_changes(ctx, &index, &changes, kind, &message, result).await
}

/// Rewrites manifests for both kinds of release, so a plan reports what an
/// execution would; only an execution writes, pushes and applies them.
async fn write_changes(
    ctx: &ReleaseContext,
    index: &ManifestIndex,
    changes: &BTreeMap<ResourceId, Change>,
    kind: ReleaseKind,
    message: &str,
    result: &mut ReleaseResult,
) -> Result<(), Error> {
    let rewrite = apply::rewrite(ctx.manifests(), index, changes, result)?;
    if kind == ReleaseKind::Execute {
        apply::apply(ctx, rewrite, message, result).await?;
    }
    Ok(())
}

fn policy_commit_message<'a>(ids: impl Iterator<Item = &'a ResourceId>, cause: &Cause) -> String {
    let ids = ids.map(ToString::to_string).collect::<Vec<_>>().join(", ");
    format!("Update policies for {ids}{}", cause.trailer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use crate::image::LATEST;
    use crate::policy::Policy;
    use crate::release::fake::{FakeCluster, FakeRegistry, FakeRepo, Fixture};
    use crate::release::{Reason, ResourceResult};

    const HW: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: hw
  namespace: team
spec:
  template:
    spec:
      containers:
        - name: hw
          image: ghcr.io/navikt/hw:1
"#;

    const LOCKED: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: locked
  namespace: team
  annotations:
    release.nais.io/locked: "true"
spec:
  template:
    spec:
      containers:
        - name: locked
          image: ghcr.io/navikt/locked:1
"#;

    const OTHER: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: other
  namespace: team
  annotations:
    release.nais.io/automated: "true"
spec:
  template:
    spec:
      containers:
        - name: other
          image: ghcr.io/navikt/other:1
"#;

    const GHOST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: ghost
  namespace: team
spec:
  template:
    spec:
      containers:
        - name: ghost
          image: ghcr.io/navikt/ghost:1
"#;

    const ELSEWHERE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: b
  namespace: elsewhere
spec:
  template:
    spec:
      containers:
        - name: b
          image: ghcr.io/navikt/b:1
"#;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn spec(specs: &[&str], image: &str, kind: ReleaseKind) -> ReleaseSpec {
        ReleaseSpec::new(
            specs.iter().map(|s| s.parse().unwrap()).collect(),
            image.parse().unwrap(),
            kind,
        )
    }

    fn repo() -> FakeRepo {
        FakeRepo::default()
            .with("team/hw.yaml", HW)
            .with("team/locked.yaml", LOCKED)
            .with("team/other.yaml", OTHER)
            .with("team/ghost.yaml", GHOST)
    }

    fn cluster() -> FakeCluster {
        FakeCluster::default()
            .with("team:deployment/hw", &[("hw", "ghcr.io/navikt/hw:1")])
            .with("team:deployment/locked", &[("locked", "ghcr.io/navikt/locked:1")])
            .with("team:deployment/other", &[("other", "ghcr.io/navikt/other:1")])
    }

    fn registry() -> FakeRegistry {
        FakeRegistry::default().with(&[
            "ghcr.io/navikt/hw:2",
            "ghcr.io/navikt/hw:1",
            "ghcr.io/navikt/locked:2",
            "ghcr.io/navikt/locked:1",
            "ghcr.io/navikt/other:2",
            "ghcr.io/navikt/other:1",
        ])
    }

    fn fixture() -> Fixture {
        Fixture::new(cluster(), registry(), repo())
    }

    fn status(result: &ReleaseResult, s: &str) -> (Status, Option<Reason>) {
        let entry = result.get(&id(s)).unwrap();
        (entry.status, entry.error.clone())
    }

    #[tokio::test]
    async fn named_resource_gets_latest_image() {
        let fixture = fixture();
        let result = release(&mut fixture.context(), &spec(&["team:deployment/hw"], LATEST, ReleaseKind::Plan))
            .await
            .unwrap();

        let hw = result.get(&id("team:deployment/hw")).unwrap();
        assert_eq!(hw.status, Status::Success);
        assert_eq!(hw.per_container.len(), 1);
        assert_eq!(hw.per_container[0].target.to_string(), "ghcr.io/navikt/hw:2");
        assert_eq!(status(&result, "team:deployment/locked"), (Status::Ignored, Some(Reason::NotIncluded)));
        assert_eq!(status(&result, "team:deployment/other"), (Status::Ignored, Some(Reason::NotIncluded)));
        assert_eq!(fixture.cluster.queries.load(Ordering::SeqCst), 1);
        assert!(fixture.repo.pushes().is_empty());
    }

    #[tokio::test]
    async fn all_resources_with_exclusion() {
        let fixture = fixture();
        let mut spec = spec(&["<all>"], LATEST, ReleaseKind::Plan);
        spec.excludes = vec![id("team:deployment/locked")];
        let result = release(&mut fixture.context(), &spec).await.unwrap();

        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/other").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/locked"), (Status::Ignored, Some(Reason::Excluded)));
        assert_eq!(status(&result, "team:deployment/ghost"), (Status::Skipped, Some(Reason::NotInCluster)));
    }

    #[tokio::test]
    async fn locked_resources_are_skipped_unless_forced() {
        let fixture = fixture();
        let result = release(&mut fixture.context(), &spec(&["<all>"], LATEST, ReleaseKind::Plan))
            .await
            .unwrap();
        assert_eq!(status(&result, "team:deployment/locked"), (Status::Skipped, Some(Reason::Locked)));

        let mut forced = spec(&["team:deployment/locked"], LATEST, ReleaseKind::Plan);
        let result = release(&mut fixture.context(), &forced).await.unwrap();
        assert_eq!(status(&result, "team:deployment/locked"), (Status::Skipped, Some(Reason::Locked)));

        forced.force = true;
        let result = release(&mut fixture.context(), &forced).await.unwrap();
        assert_eq!(status(&result, "team:deployment/locked").0, Status::Success);
    }

    #[tokio::test]
    async fn exact_image_already_running_is_up_to_date() {
        let fixture = fixture();
        let result = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw"], "ghcr.io/navikt/hw:1", ReleaseKind::Plan),
        )
        .await
        .unwrap();
        assert_eq!(status(&result, "team:deployment/hw"), (Status::Skipped, Some(Reason::ImageUpToDate)));
    }

    #[tokio::test]
    async fn exact_image_for_other_repository() {
        let fixture = fixture();
        let result = release(&mut fixture.context(), &spec(&["<all>"], "ghcr.io/navikt/hw:2", ReleaseKind::Plan))
            .await
            .unwrap();
        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/other"), (Status::Ignored, Some(Reason::DifferentImage)));
    }

    #[tokio::test]
    async fn unknown_exact_image_aborts() {
        let fixture = fixture();
        let aborted = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw"], "ghcr.io/navikt/hw:9", ReleaseKind::Execute),
        )
        .await
        .unwrap_err();
        assert!(matches!(aborted.error, Error::InvalidImageId(_)));
        assert_eq!(aborted.partial.get(&id("team:deployment/other")).unwrap().error, Some(Reason::NotIncluded));
        assert!(fixture.repo.pushes().is_empty());
    }

    #[tokio::test]
    async fn push_failure_fails_every_resource() {
        let mut repo = repo();
        repo.fail_push = Some("remote rejected".into());
        let fixture = Fixture::new(cluster(), registry(), repo);
        let result = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Execute),
        )
        .await
        .unwrap();

        for resource in ["team:deployment/hw", "team:deployment/other"] {
            let (status, reason) = status(&result, resource);
            assert_eq!(status, Status::Failed);
            assert_eq!(reason, Some(Reason::Error("commit and push: remote rejected".into())));
        }
        assert_eq!(result.count(Status::Success), 0);
        assert!(fixture.cluster.applied().is_empty());
    }

    #[tokio::test]
    async fn cluster_apply_failures_are_per_resource() {
        let cluster = cluster().failing_apply("team:deployment/other", "admission webhook denied");
        let fixture = Fixture::new(cluster, registry(), repo());
        let result = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Execute),
        )
        .await
        .unwrap();

        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(
            status(&result, "team:deployment/other"),
            (Status::Failed, Some(Reason::Error("apply: admission webhook denied".into())))
        );
        assert_eq!(fixture.cluster.applied(), vec![id("team:deployment/hw")]);

        let pushes = fixture.repo.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(
            pushes[0].0,
            "Release latest images to team:deployment/hw, team:deployment/other"
        );
        assert!(pushes[0].1["team/hw.yaml"].contains("ghcr.io/navikt/hw:2"));
        assert!(pushes[0].1["team/other.yaml"].contains("ghcr.io/navikt/other:2"));
    }

    #[tokio::test]
    async fn panicking_apply_fails_only_its_resource() {
        let cluster = cluster().panicking_apply("team:deployment/other");
        let fixture = Fixture::new(cluster, registry(), repo());
        let result = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Execute),
        )
        .await
        .unwrap();

        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(
            status(&result, "team:deployment/other"),
            (
                Status::Failed,
                Some(Reason::Error("apply panicked: apply of team:deployment/other crashed".into()))
            )
        );
        assert_eq!(fixture.cluster.applied(), vec![id("team:deployment/hw")]);
    }

    #[tokio::test]
    async fn hanging_apply_times_out_alone() {
        let cluster = cluster().hanging_apply("team:deployment/other");
        let fixture = Fixture::new(cluster, registry(), repo()).with_cluster_timeout(Duration::from_millis(200));
        let result = release(
            &mut fixture.context(),
            &spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Execute),
        )
        .await
        .unwrap();

        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(
            status(&result, "team:deployment/other"),
            (
                Status::Failed,
                Some(Reason::Error("apply did not finish within 200ms".into()))
            )
        );
        assert_eq!(fixture.cluster.applied(), vec![id("team:deployment/hw")]);
    }

    #[tokio::test]
    async fn hanging_cluster_query_aborts() {
        let mut cluster = cluster();
        cluster.hanging = true;
        let fixture = Fixture::new(cluster, registry(), repo()).with_cluster_timeout(Duration::from_millis(100));
        let mut ctx = fixture.context();
        let aborted = release(&mut ctx, &spec(&["<all>"], LATEST, ReleaseKind::Plan))
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, Error::Timeout("cluster query", _)));
        assert!(!ctx.has_working_copy());
    }

    #[tokio::test]
    async fn all_in_one_namespace_leaves_other_namespaces_out() {
        let cluster = cluster().with("elsewhere:deployment/b", &[("b", "ghcr.io/navikt/b:1")]);
        let repo = repo().with("elsewhere/b.yaml", ELSEWHERE);
        let fixture = Fixture::new(cluster, registry(), repo);
        let mut ctx = fixture.context().with_namespace(Some("team".into()));
        let result = release(&mut ctx, &spec(&["<all>"], LATEST, ReleaseKind::Plan))
            .await
            .unwrap();

        assert!(result.get(&id("elsewhere:deployment/b")).is_none());
        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/ghost"), (Status::Skipped, Some(Reason::NotInCluster)));
    }

    #[tokio::test]
    async fn plan_is_idempotent_and_side_effect_free() {
        let fixture = fixture();
        let spec = spec(&["<all>"], LATEST, ReleaseKind::Plan);
        let first = release(&mut fixture.context(), &spec).await.unwrap();
        let second = release(&mut fixture.context(), &spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert!(fixture.repo.pushes().is_empty());
        assert!(fixture.cluster.applied().is_empty());
    }

    #[tokio::test]
    async fn exclusion_wins_over_naming() {
        let fixture = fixture();
        let mut spec = spec(&["team:deployment/hw"], LATEST, ReleaseKind::Plan);
        spec.excludes = vec![id("team:deployment/hw")];
        let result = release(&mut fixture.context(), &spec).await.unwrap();
        assert_eq!(status(&result, "team:deployment/hw"), (Status::Ignored, Some(Reason::Excluded)));
    }

    #[tokio::test]
    async fn all_overrides_named_resources() {
        let fixture = fixture();
        let mut all = spec(&["<all>"], LATEST, ReleaseKind::Plan);
        all.excludes = vec![id("team:deployment/other")];
        let mut mixed = spec(&["team:deployment/hw", "<all>"], LATEST, ReleaseKind::Plan);
        mixed.excludes = vec![id("team:deployment/other")];
        assert_eq!(
            release(&mut fixture.context(), &all).await.unwrap(),
            release(&mut fixture.context(), &mixed).await.unwrap()
        );
    }

    #[tokio::test]
    async fn one_broken_manifest_leaves_the_others_alone() {
        let broken = FakeRepo::default()
            .with("team/hw.yaml", HW)
            .with("team/other.yaml", OTHER)
            .with("copy/other.yaml", OTHER);
        let fixture = Fixture::new(cluster(), registry(), broken);
        let spec = spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Plan);
        let result = release(&mut fixture.context(), &spec).await.unwrap();

        let (status_other, reason) = status(&result, "team:deployment/other");
        assert_eq!(status_other, Status::Failed);
        assert!(matches!(reason, Some(Reason::Error(err)) if err.starts_with("multiple manifests found")));
        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
    }

    #[tokio::test]
    async fn broken_registry_fails_only_its_resources() {
        let fixture = Fixture::new(cluster(), registry().broken("ghcr.io/navikt/other"), repo());
        let spec = spec(&["team:deployment/hw", "team:deployment/other"], LATEST, ReleaseKind::Plan);
        let result = release(&mut fixture.context(), &spec).await.unwrap();
        assert_eq!(status(&result, "team:deployment/hw").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/other").0, Status::Failed);
    }

    #[tokio::test]
    async fn every_result_has_a_status_and_reason() {
        let fixture = fixture();
        let mut spec = spec(&["<all>"], "ghcr.io/navikt/hw:2", ReleaseKind::Plan);
        spec.excludes = vec![id("team:deployment/other")];
        let result = release(&mut fixture.context(), &spec).await.unwrap();
        assert_eq!(result.len(), 4);
        for (_, entry) in result.iter() {
            match entry.status {
                Status::Success => assert!(entry.error.is_none()),
                Status::Failed => assert!(matches!(&entry.error, Some(Reason::Error(err)) if !err.is_empty())),
                Status::Ignored | Status::Skipped => {
                    assert!(matches!(&entry.error, Some(reason) if !matches!(reason, Reason::Error(_))))
                }
            }
        }
    }

    #[tokio::test]
    async fn unreachable_cluster_aborts_and_cleans_up() {
        let mut cluster = cluster();
        cluster.unreachable = true;
        let fixture = Fixture::new(cluster, registry(), repo());
        let mut ctx = fixture.context();
        let aborted = release(&mut ctx, &spec(&["<all>"], LATEST, ReleaseKind::Execute))
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, Error::Cluster(_)));
        assert!(aborted.partial.is_empty());
        assert!(!ctx.has_working_copy());
    }

    #[tokio::test]
    async fn failed_clone_aborts() {
        let mut repo = repo();
        repo.fail_clone = true;
        let fixture = Fixture::new(cluster(), registry(), repo);
        let aborted = release(&mut fixture.context(), &spec(&["<all>"], LATEST, ReleaseKind::Plan))
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, Error::Checkout(_)));
        assert_eq!(fixture.cluster.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn automated_release_covers_automated_resources() {
        let fixture = fixture();
        let cause = Cause {
            user: Some("robot".into()),
            message: None,
        };
        let result = release_automated(&mut fixture.context(), ReleaseKind::Execute, cause)
            .await
            .unwrap();
        assert_eq!(status(&result, "team:deployment/other").0, Status::Success);
        assert_eq!(status(&result, "team:deployment/hw"), (Status::Ignored, Some(Reason::NotIncluded)));
        let pushes = fixture.repo.pushes();
        assert_eq!(
            pushes[0].0,
            "Release latest images to team:deployment/other\n\nReleased-by: robot"
        );
        assert_eq!(fixture.repo.checkouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn policy_updates() {
        let fixture = fixture();
        let updates = BTreeMap::from([
            (id("team:deployment/hw"), PolicyUpdate::default().add(Policy::Locked, "true")),
            (id("team:deployment/locked"), PolicyUpdate::default().add(Policy::Locked, "true")),
            (id("team:deployment/gone"), PolicyUpdate::default().add(Policy::Automated, "true")),
        ]);
        let cause = Cause {
            user: Some("kimt".into()),
            message: Some("incident".into()),
        };
        let result = update_policies(&mut fixture.context(), &updates, ReleaseKind::Execute, &cause)
            .await
            .unwrap();

        assert_eq!(result.get(&id("team:deployment/hw")).unwrap(), &ResourceResult::success(vec![]));
        assert_eq!(status(&result, "team:deployment/gone").0, Status::Failed);

        let pushes = fixture.repo.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(
            pushes[0].0,
            "Update policies for team:deployment/gone, team:deployment/hw, team:deployment/locked\n\nincident\n\nReleased-by: kimt"
        );
        let hw = &pushes[0].1["team/hw.yaml"];
        assert!(hw.contains("release.nais.io/locked"));
        assert!(hw.contains("release.nais.io/locked_user: kimt"));
        let mut applied = fixture.cluster.applied();
        applied.sort();
        assert_eq!(applied, vec![id("team:deployment/hw"), id("team:deployment/locked")]);
    }

    #[tokio::test]
    async fn unchanged_policies_are_skipped() {
        let fixture = fixture();
        let updates = BTreeMap::from([(
            id("team:deployment/other"),
            PolicyUpdate::default().add(Policy::Automated, "true"),
        )]);
        let result = update_policies(&mut fixture.context(), &updates, ReleaseKind::Execute, &Cause::default())
            .await
            .unwrap();
        assert_eq!(status(&result, "team:deployment/other"), (Status::Skipped, Some(Reason::Unchanged)));
        assert!(fixture.repo.pushes().is_empty());
    }
}
