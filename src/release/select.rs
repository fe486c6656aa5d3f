use std::collections::{BTreeMap, BTreeSet};
use log::debug;
use crate::cluster::LiveResource;
use crate::manifest::ManifestIndex;
use crate::resource::{ResourceId, ResourceSpec};
use super::context::ReleaseContext;
use super::Error;

/// Which resources a request names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requested {
    All,
    Only(BTreeSet<ResourceId>),
}

/// The single cluster lookup a selection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Everything the cluster runs, minus these.
    AllExcept(BTreeSet<ResourceId>),
    Some(Vec<ResourceId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub requested: Requested,
    pub excludes: BTreeSet<ResourceId>,
    pub locked: BTreeSet<ResourceId>,
}

impl Selection {
    /// `<all>` anywhere in `specs` wins over every named resource.
    pub fn new(specs: &[ResourceSpec], excludes: &[ResourceId], locked: BTreeSet<ResourceId>) -> Self {
        let requested = if specs.contains(&ResourceSpec::All) {
            Requested::All
        } else {
            Requested::Only(
                specs
                    .iter()
                    .filter_map(|spec| match spec {
                        ResourceSpec::Id(id) => Some(id.clone()),
                        ResourceSpec::All => None,
                    })
                    .collect(),
            )
        };
        Self {
            requested,
            excludes: excludes.iter().cloned().collect(),
            locked,
        }
    }

    /// Locked resources are only looked up when they are asked for by name.
    pub fn query(&self) -> Query {
        match &self.requested {
            Requested::All => Query::AllExcept(self.excludes.union(&self.locked).cloned().collect()),
            Requested::Only(ids) => Query::Some(ids.difference(&self.excludes).cloned().collect()),
        }
    }

    /// Every resource the release has an opinion about: all defined in the
    /// repository, everything requested or excluded, and everything found running.
    /// An `<all>` release restricted to `namespace` leaves out definitions from
    /// other namespaces, since the cluster was never asked about them.
    pub fn universe(
        &self,
        index: &ManifestIndex,
        live: &BTreeMap<ResourceId, LiveResource>,
        namespace: Option<&str>,
    ) -> BTreeSet<ResourceId> {
        let mut ids: BTreeSet<ResourceId> = match (&self.requested, namespace) {
            (Requested::All, Some(namespace)) => index.ids().filter(|id| id.namespace() == namespace).cloned().collect(),
            _ => index.ids().cloned().collect(),
        };
        if let Requested::Only(requested) = &self.requested {
            ids.extend(requested.iter().cloned());
        }
        ids.extend(self.excludes.iter().cloned());
        ids.extend(live.keys().cloned());
        ids
    }
}

/// Asks the cluster about the selected resources in one call.
pub async fn select(
    ctx: &ReleaseContext,
    selection: &Selection,
) -> Result<BTreeMap<ResourceId, LiveResource>, Error> {
    let live = match selection.query() {
        Query::AllExcept(except) => ctx
            .list_all()
            .await?
            .into_iter()
            .filter(|resource| !except.contains(&resource.id))
            .collect::<Vec<_>>(),
        Query::Some(ids) => ctx.list_some(&ids).await?,
    };
    debug!("{} selected resources found in the cluster", live.len());
    Ok(live.into_iter().map(|resource| (resource.id.clone(), resource)).collect())
}
