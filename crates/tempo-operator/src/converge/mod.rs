//!
//! # Convergence
//!
//! Brings the live objects owned by one instance in line with the desired set:
//! list everything owned, diff by identity, create and update, then prune. The
//! owned set is rebuilt from the platform on every run and never cached.
//!
//! Nothing is pruned unless every create and update succeeded, so an aborted run
//! leaves the platform in a state the next run converges from.
//!
mod diff;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use tempo_operator_metadata::config::FeatureGates;
use tempo_operator_metadata::stack::TempoStack;

use crate::error::{PlatformError, ReconcileError};
use crate::objects::{ManagedKind, ManagedObject, ObjectKey};
use crate::platform::{Platform, cancellable};

pub use self::diff::Controlled;

/// Live objects owned by one instance, indexed by uid and identity
#[derive(Debug, Default)]
pub struct OwnedObjectSet {
    objects: Vec<ManagedObject>,
    by_uid: BTreeMap<String, usize>,
    by_key: BTreeMap<ObjectKey, usize>,
}

impl OwnedObjectSet {
    /// list every kind that may be owned under `gates`
    pub async fn list(
        platform: &dyn Platform,
        cancel: &CancellationToken,
        namespace: &str,
        selector: &BTreeMap<String, String>,
        gates: &FeatureGates,
    ) -> Result<Self, PlatformError> {
        let mut set = Self::default();
        for kind in ManagedKind::owned_kinds(gates) {
            let objects =
                cancellable(cancel, platform.list_owned(kind, namespace, selector)).await?;
            trace!(%kind, count = objects.len(), "listed owned");
            for object in objects {
                set.insert(object);
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, object: ManagedObject) {
        let index = self.objects.len();
        if let Some(uid) = object.uid() {
            self.by_uid.insert(uid.to_owned(), index);
        }
        self.by_key.insert(object.key(), index);
        self.objects.push(object);
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&ManagedObject> {
        self.by_key.get(key).map(|index| &self.objects[*index])
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<&ManagedObject> {
        self.by_uid.get(uid).map(|index| &self.objects[*index])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject> {
        self.objects.iter()
    }

    /// uids in key order
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.by_key
            .values()
            .filter_map(|index| self.objects[*index].uid())
    }
}

/// Controller owner reference pointing at the instance
pub fn owner_reference(stack: &TempoStack) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: TempoStack::api_version(&()).into_owned(),
        kind: TempoStack::kind(&()).into_owned(),
        name: stack.metadata.name.clone()?,
        uid: stack.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// What to do with one desired object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    /// path of the first drifted field
    Update(String),
    Unchanged,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<(ObjectKey, Action)>,
    /// owned objects with no desired counterpart
    pub prune: Vec<ObjectKey>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.prune.is_empty()
            && self
                .actions
                .iter()
                .all(|(_, action)| *action == Action::Unchanged)
    }
}

/// value without fields the builder never controls
fn controlled_value(object: &ManagedObject) -> Result<Value, serde_json::Error> {
    let mut value = object.to_value()?;
    if let Value::Object(map) = &mut value {
        map.remove("status");
    }
    Ok(value)
}

/// diff the desired set against the owned set
pub fn plan(desired: &[ManagedObject], owned: &OwnedObjectSet) -> Result<Plan, ReconcileError> {
    let mut plan = Plan::default();
    let mut seen = BTreeSet::new();

    for object in desired {
        let key = object.key();
        if !seen.insert(key.clone()) {
            return Err(ReconcileError::Invariant(format!(
                "desired set contains {key} twice"
            )));
        }
        let action = match owned.get(&key) {
            None => Action::Create,
            Some(live) => {
                let desired_value = controlled_value(object).map_err(PlatformError::from)?;
                let live_value = live.to_value().map_err(PlatformError::from)?;
                match desired_value.drift(&live_value) {
                    Some(path) => Action::Update(path),
                    None => Action::Unchanged,
                }
            }
        };
        plan.actions.push((key, action));
    }

    plan.prune = owned
        .iter()
        .map(ManagedObject::key)
        .filter(|key| !seen.contains(key))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Ok(plan)
}

/// Outcome of one convergence run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConvergeReport {
    pub created: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    pub unchanged: Vec<ObjectKey>,
    /// workloads which are not fully rolled out
    pub pending: Vec<ObjectKey>,
}

impl ConvergeReport {
    /// number of writes performed
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_ready(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Display for ConvergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created: {}, updated: {}, deleted: {}, unchanged: {}, pending: {}",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len(),
            self.pending.len()
        )
    }
}

/// Applies a desired set for one instance
pub struct ConvergenceEngine<'a> {
    platform: &'a dyn Platform,
    cancel: &'a CancellationToken,
}

impl<'a> ConvergenceEngine<'a> {
    pub fn new(platform: &'a dyn Platform, cancel: &'a CancellationToken) -> Self {
        Self { platform, cancel }
    }

    /// converge the objects selected by `selector` in `namespace` to `desired`
    #[instrument(skip_all, fields(desired = desired.len()))]
    pub async fn converge(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
        gates: &FeatureGates,
        desired: &[ManagedObject],
    ) -> Result<ConvergeReport, ReconcileError> {
        if let Some(object) = desired.iter().find(|object| {
            object
                .kind()
                .descriptor()
                .gate
                .is_some_and(|gate| !gate.enabled(gates))
        }) {
            return Err(ReconcileError::Invariant(format!(
                "{} is desired but its integration is disabled",
                object.key()
            )));
        }

        let owned =
            OwnedObjectSet::list(self.platform, self.cancel, namespace, selector, gates).await?;
        debug!(owned = owned.len(), "owned objects listed");

        let plan = plan(desired, &owned)?;
        let mut report = ConvergeReport::default();

        for (object, (key, action)) in desired.iter().zip(plan.actions) {
            let current = match action {
                Action::Create => {
                    match cancellable(self.cancel, self.platform.create(object)).await {
                        Ok(created) => {
                            info!(%key, "created");
                            report.created.push(key.clone());
                            created
                        }
                        // left behind without our labels, take it over
                        Err(err) if err.is_already_exists() => {
                            let adopted =
                                cancellable(self.cancel, self.platform.update(object)).await?;
                            info!(%key, "adopted existing object");
                            report.updated.push(key.clone());
                            adopted
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Action::Update(path) => {
                    let updated = cancellable(self.cancel, self.platform.update(object)).await?;
                    info!(%key, drift = %path, "updated");
                    report.updated.push(key.clone());
                    updated
                }
                Action::Unchanged => {
                    trace!(%key, "unchanged");
                    report.unchanged.push(key.clone());
                    match owned.get(&key) {
                        Some(live) => live.clone(),
                        None => object.clone(),
                    }
                }
            };
            if current.workload_ready() == Some(false) {
                report.pending.push(key);
            }
        }

        for key in plan.prune {
            cancellable(self.cancel, self.platform.delete(&key)).await?;
            info!(%key, "pruned");
            report.deleted.push(key);
        }

        debug!(%report, "converged");
        Ok(report)
    }
}

#[cfg(test)]
mod test {

    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;

    use crate::naming::common_labels;
    use crate::platform::{MemoryPlatform, Operation, PlatformAction};

    use super::*;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("default".to_owned()),
            labels: Some(common_labels("simplest")),
            ..Default::default()
        }
    }

    fn config_map(name: &str, value: &str) -> ManagedObject {
        ConfigMap {
            metadata: meta(name),
            data: Some(BTreeMap::from([("tempo.yaml".to_owned(), value.to_owned())])),
            ..Default::default()
        }
        .into()
    }

    fn service(name: &str) -> ManagedObject {
        Service {
            metadata: meta(name),
            ..Default::default()
        }
        .into()
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        let engine = ConvergenceEngine::new(&platform, &cancel);
        let gates = FeatureGates::default();
        let selector = common_labels("simplest");
        let desired = vec![config_map("tempo-simplest", "a"), service("tempo-simplest-querier")];

        let first = engine
            .converge("default", &selector, &gates, &desired)
            .await
            .expect("first");
        assert_eq!(first.created.len(), 2);

        let second = engine
            .converge("default", &selector, &gates, &desired)
            .await
            .expect("second");
        assert_eq!(second.writes(), 0);
        assert_eq!(second.unchanged.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_prune() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        let engine = ConvergenceEngine::new(&platform, &cancel);
        let gates = FeatureGates::default();
        let selector = common_labels("simplest");

        engine
            .converge(
                "default",
                &selector,
                &gates,
                &[config_map("tempo-simplest", "a"), service("tempo-simplest-gateway")],
            )
            .await
            .expect("first");
        platform.clear_actions().await;

        let report = engine
            .converge("default", &selector, &gates, &[config_map("tempo-simplest", "b")])
            .await
            .expect("second");

        let service_key = ObjectKey::new(ManagedKind::Service, "default", "tempo-simplest-gateway");
        assert_eq!(report.deleted, vec![service_key.clone()]);
        assert_eq!(
            platform.actions().await,
            vec![
                PlatformAction::Update(ObjectKey::new(
                    ManagedKind::ConfigMap,
                    "default",
                    "tempo-simplest"
                )),
                PlatformAction::Delete(service_key),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_apply_skips_prune() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        let engine = ConvergenceEngine::new(&platform, &cancel);
        let gates = FeatureGates::default();
        let selector = common_labels("simplest");

        engine
            .converge("default", &selector, &gates, &[service("tempo-simplest-gateway")])
            .await
            .expect("first");
        platform.clear_actions().await;
        platform
            .fail_next(Operation::Create, PlatformError::Unavailable("timeout".to_owned()))
            .await;

        let err = engine
            .converge("default", &selector, &gates, &[config_map("tempo-simplest", "a")])
            .await
            .expect_err("aborted");
        assert!(err.is_transient());
        assert!(platform.actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_adopts_unlabelled_object() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        let engine = ConvergenceEngine::new(&platform, &cancel);
        let gates = FeatureGates::default();
        let selector = common_labels("simplest");
        platform
            .insert(ConfigMap {
                metadata: ObjectMeta {
                    name: Some("tempo-simplest".to_owned()),
                    namespace: Some("default".to_owned()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([("tempo.yaml".to_owned(), "stale".to_owned())])),
                ..Default::default()
            })
            .await;

        let desired = vec![config_map("tempo-simplest", "a")];
        let report = engine
            .converge("default", &selector, &gates, &desired)
            .await
            .expect("adopted");
        let key = ObjectKey::new(ManagedKind::ConfigMap, "default", "tempo-simplest");
        assert!(report.created.is_empty());
        assert_eq!(report.updated, vec![key.clone()]);

        let adopted = platform.get(&key).await.expect("config map");
        assert_eq!(adopted.metadata().labels.as_ref(), Some(&selector));

        let again = engine
            .converge("default", &selector, &gates, &desired)
            .await
            .expect("second");
        assert_eq!(again.writes(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_any_write() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = ConvergenceEngine::new(&platform, &cancel);

        let err = engine
            .converge(
                "default",
                &common_labels("simplest"),
                &FeatureGates::default(),
                &[config_map("tempo-simplest", "a")],
            )
            .await
            .expect_err("cancelled");
        assert!(matches!(
            err,
            ReconcileError::Transient(PlatformError::Cancelled)
        ));
        assert!(platform.objects().await.is_empty());
    }

    #[test]
    fn test_duplicate_identity_is_invariant() {
        let desired = vec![config_map("tempo-simplest", "a"), config_map("tempo-simplest", "b")];
        let err = plan(&desired, &OwnedObjectSet::default()).expect_err("duplicate");
        assert!(matches!(err, ReconcileError::Invariant(_)));
    }

    #[test]
    fn test_owned_set_index() {
        let mut owned = OwnedObjectSet::default();
        let mut object = config_map("tempo-simplest", "a");
        object.metadata_mut().uid = Some("uid-1".to_owned());
        owned.insert(object.clone());

        assert_eq!(owned.get_by_uid("uid-1"), Some(&object));
        assert_eq!(owned.get(&object.key()), Some(&object));
        assert_eq!(owned.uids().collect::<Vec<_>>(), vec!["uid-1"]);
    }
}
