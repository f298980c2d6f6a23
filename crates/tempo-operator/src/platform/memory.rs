use std::collections::{BTreeMap, HashMap, VecDeque};

use async_lock::RwLock;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use serde_json::Value;
use tracing::trace;

use tempo_operator_metadata::stack::TempoStack;

use crate::error::PlatformError;
use crate::objects::{ManagedKind, ManagedObject, ObjectKey};

use super::{Capabilities, ClusterTlsProfile, Platform};

/// Platform calls failures can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Create,
    Update,
    Delete,
    GetSecret,
    GetConfigMap,
    GetServiceAccount,
    ClusterTlsProfile,
    ClusterBaseDomain,
    Capabilities,
    GetStack,
    ReplaceStack,
    ReplaceStackStatus,
}

/// Write performed against managed objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformAction {
    Create(ObjectKey),
    Update(ObjectKey),
    Delete(ObjectKey),
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManagedObject>,
    stacks: BTreeMap<(String, String), TempoStack>,
    actions: Vec<PlatformAction>,
    failures: HashMap<Operation, VecDeque<PlatformError>>,
    last_uid: u64,
    last_version: u64,
}

impl State {
    fn take_failure(&mut self, op: Operation) -> Result<(), PlatformError> {
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.last_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.last_uid)
    }
}

/// In memory cluster.
///
/// Keeps objects per identity, bumps resource versions on every write, rejects stale
/// writes with a conflict and records every write in an action log. Workloads roll
/// out instantly unless [`MemoryPlatform::hold_rollouts`] was called.
#[derive(Debug)]
pub struct MemoryPlatform {
    state: RwLock<State>,
    cluster_tls: Option<ClusterTlsProfile>,
    base_domain: String,
    capabilities: Capabilities,
    instant_rollout: bool,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            cluster_tls: None,
            base_domain: "apps.example.com".to_owned(),
            capabilities: Capabilities::default(),
            instant_rollout: true,
        }
    }

    pub fn with_cluster_tls_profile(mut self, profile: ClusterTlsProfile) -> Self {
        self.cluster_tls = Some(profile);
        self
    }

    pub fn with_base_domain(mut self, domain: impl Into<String>) -> Self {
        self.base_domain = domain.into();
        self
    }

    pub fn with_api_groups<'a>(mut self, groups: impl IntoIterator<Item = &'a str>) -> Self {
        self.capabilities
            .api_groups
            .extend(groups.into_iter().map(str::to_owned));
        self
    }

    /// workloads stay unready after writes
    pub fn hold_rollouts(mut self) -> Self {
        self.instant_rollout = false;
        self
    }

    /// fail the next call of `op` with `err`
    pub async fn fail_next(&self, op: Operation, err: PlatformError) {
        let mut state = self.state.write().await;
        state.failures.entry(op).or_default().push_back(err);
    }

    /// seed an object without recording an action
    pub async fn insert(&self, object: impl Into<ManagedObject>) -> ManagedObject {
        let mut object = object.into();
        let mut state = self.state.write().await;
        let uid = state.next_uid();
        let version = state.next_version();
        let meta = object.metadata_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(version);
        state.objects.insert(object.key(), object.clone());
        object
    }

    pub async fn insert_stack(&self, mut stack: TempoStack) -> TempoStack {
        let mut state = self.state.write().await;
        if stack.metadata.uid.is_none() {
            stack.metadata.uid = Some(state.next_uid());
        }
        stack.metadata.resource_version = Some(state.next_version());
        let key = stack_key(&stack);
        state.stacks.insert(key, stack.clone());
        stack
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.state.read().await.objects.get(key).cloned()
    }

    pub async fn objects(&self) -> Vec<ManagedObject> {
        self.state.read().await.objects.values().cloned().collect()
    }

    pub async fn stack(&self, namespace: &str, name: &str) -> Option<TempoStack> {
        let key = (namespace.to_owned(), name.to_owned());
        self.state.read().await.stacks.get(&key).cloned()
    }

    /// change a stored object the way another controller would
    pub async fn mutate<F>(&self, key: &ObjectKey, change: F) -> bool
    where
        F: FnOnce(&mut ManagedObject),
    {
        let mut state = self.state.write().await;
        let version = state.next_version();
        match state.objects.get_mut(key) {
            Some(object) => {
                change(object);
                object.metadata_mut().resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    pub async fn actions(&self) -> Vec<PlatformAction> {
        self.state.read().await.actions.clone()
    }

    pub async fn clear_actions(&self) {
        self.state.write().await.actions.clear();
    }

    fn roll_out(&self, object: &mut ManagedObject) {
        if !self.instant_rollout {
            return;
        }
        match object {
            ManagedObject::Deployment(deployment) => {
                let replicas = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                deployment.status = Some(DeploymentStatus {
                    replicas: Some(replicas),
                    ready_replicas: Some(replicas),
                    ..Default::default()
                });
            }
            ManagedObject::StatefulSet(statefulset) => {
                let replicas = statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                statefulset.status = Some(StatefulSetStatus {
                    replicas,
                    ready_replicas: Some(replicas),
                    ..Default::default()
                });
            }
            _ => {}
        }
    }

    async fn get_typed(
        &self,
        op: Operation,
        kind: ManagedKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(op)?;
        Ok(state
            .objects
            .get(&ObjectKey::new(kind, namespace, name))
            .cloned())
    }
}

fn stack_key(stack: &TempoStack) -> (String, String) {
    (
        stack.metadata.namespace.clone().unwrap_or_default(),
        stack.metadata.name.clone().unwrap_or_default(),
    )
}

fn has_labels(object: &ManagedObject, labels: &BTreeMap<String, String>) -> bool {
    let Some(object_labels) = object.metadata().labels.as_ref() else {
        return labels.is_empty();
    };
    labels
        .iter()
        .all(|(k, v)| object_labels.get(k).is_some_and(|value| value == v))
}

/// overlay `desired` onto `live`, objects merge key by key, everything else replaces
fn merge_value(live: &mut Value, desired: &Value) {
    match (live, desired) {
        (Value::Object(live), Value::Object(desired)) => {
            for (key, value) in desired {
                if value.is_null() {
                    continue;
                }
                match live.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        live.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (live, desired) => *live = desired.clone(),
    }
}

fn check_version(
    given: Option<&String>,
    stored: Option<&String>,
    what: impl FnOnce() -> String,
) -> Result<(), PlatformError> {
    match given {
        Some(given) if Some(given) != stored => Err(PlatformError::Conflict(what())),
        _ => Ok(()),
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn list_owned(
        &self,
        kind: ManagedKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::List)?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(_, object)| object)
            .filter(|object| has_labels(object, labels))
            .cloned()
            .collect())
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::Create)?;
        let key = object.key();
        if state.objects.contains_key(&key) {
            return Err(PlatformError::AlreadyExists(key.to_string()));
        }

        let mut created = object.clone();
        let uid = state.next_uid();
        let version = state.next_version();
        let meta = created.metadata_mut();
        meta.uid = Some(uid);
        meta.resource_version = Some(version);
        self.roll_out(&mut created);

        trace!(%key, "memory create");
        state.objects.insert(key.clone(), created.clone());
        state.actions.push(PlatformAction::Create(key));
        Ok(created)
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::Update)?;
        let key = object.key();
        let Some(stored) = state.objects.get(&key) else {
            return Err(PlatformError::Unavailable(format!("{key} not found")));
        };
        check_version(
            object.metadata().resource_version.as_ref(),
            stored.metadata().resource_version.as_ref(),
            || key.to_string(),
        )?;

        let mut merged = stored.to_value()?;
        merge_value(&mut merged, &object.to_value()?);
        let mut updated = ManagedObject::from_value(key.kind, merged)?;
        updated.metadata_mut().resource_version = Some(state.next_version());
        self.roll_out(&mut updated);

        trace!(%key, "memory update");
        state.objects.insert(key.clone(), updated.clone());
        state.actions.push(PlatformAction::Update(key));
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::Delete)?;
        if state.objects.remove(key).is_some() {
            trace!(%key, "memory delete");
            state.actions.push(PlatformAction::Delete(key.clone()));
        }
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, PlatformError> {
        match self
            .get_typed(Operation::GetSecret, ManagedKind::Secret, namespace, name)
            .await?
        {
            Some(ManagedObject::Secret(secret)) => Ok(Some(secret)),
            _ => Ok(None),
        }
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError> {
        match self
            .get_typed(Operation::GetConfigMap, ManagedKind::ConfigMap, namespace, name)
            .await?
        {
            Some(ManagedObject::ConfigMap(config_map)) => Ok(Some(config_map)),
            _ => Ok(None),
        }
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, PlatformError> {
        match self
            .get_typed(
                Operation::GetServiceAccount,
                ManagedKind::ServiceAccount,
                namespace,
                name,
            )
            .await?
        {
            Some(ManagedObject::ServiceAccount(account)) => Ok(Some(account)),
            _ => Ok(None),
        }
    }

    async fn cluster_tls_profile(&self) -> Result<Option<ClusterTlsProfile>, PlatformError> {
        self.state
            .write()
            .await
            .take_failure(Operation::ClusterTlsProfile)?;
        Ok(self.cluster_tls.clone())
    }

    async fn cluster_base_domain(&self) -> Result<String, PlatformError> {
        self.state
            .write()
            .await
            .take_failure(Operation::ClusterBaseDomain)?;
        Ok(self.base_domain.clone())
    }

    async fn capabilities(&self) -> Result<Capabilities, PlatformError> {
        self.state
            .write()
            .await
            .take_failure(Operation::Capabilities)?;
        Ok(self.capabilities.clone())
    }

    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TempoStack>, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::GetStack)?;
        Ok(state
            .stacks
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn replace_stack(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::ReplaceStack)?;
        let key = stack_key(stack);
        let Some(stored) = state.stacks.get(&key) else {
            return Err(PlatformError::Unavailable(format!(
                "TempoStack {}/{} not found",
                key.0, key.1
            )));
        };
        check_version(
            stack.metadata.resource_version.as_ref(),
            stored.metadata.resource_version.as_ref(),
            || format!("TempoStack {}/{}", key.0, key.1),
        )?;

        let mut replaced = stack.clone();
        replaced.status = stored.status.clone();
        replaced.metadata.uid = stored.metadata.uid.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        state.stacks.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn replace_stack_status(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError> {
        let mut state = self.state.write().await;
        state.take_failure(Operation::ReplaceStackStatus)?;
        let key = stack_key(stack);
        let Some(stored) = state.stacks.get(&key) else {
            return Err(PlatformError::Unavailable(format!(
                "TempoStack {}/{} not found",
                key.0, key.1
            )));
        };
        check_version(
            stack.metadata.resource_version.as_ref(),
            stored.metadata.resource_version.as_ref(),
            || format!("TempoStack {}/{}", key.0, key.1),
        )?;

        let mut replaced = stored.clone();
        replaced.status = stack.status.clone();
        replaced.metadata.resource_version = Some(state.next_version());
        state.stacks.insert(key, replaced.clone());
        Ok(replaced)
    }
}

#[cfg(test)]
mod test {

    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("default".to_owned()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("a".to_owned(), "1".to_owned())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_by_labels() {
        let platform = MemoryPlatform::new();
        platform.insert(config_map("one", &[("app", "tempo")])).await;
        platform.insert(config_map("two", &[("app", "other")])).await;

        let selector = BTreeMap::from([("app".to_owned(), "tempo".to_owned())]);
        let listed = platform
            .list_owned(ManagedKind::ConfigMap, "default", &selector)
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name(), "one");
    }

    #[tokio::test]
    async fn test_update_merges_and_bumps_version() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert(config_map("one", &[("app", "tempo")])).await;
        let version = stored.metadata().resource_version.clone();
        platform
            .mutate(&stored.key(), |object| {
                object
                    .metadata_mut()
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert("external".to_owned(), "yes".to_owned());
            })
            .await;

        let mut desired = config_map("one", &[("app", "tempo")]);
        desired.data = Some(BTreeMap::from([("a".to_owned(), "2".to_owned())]));
        let updated = platform
            .update(&ManagedObject::from(desired))
            .await
            .expect("update");

        assert_ne!(updated.metadata().resource_version, version);
        assert_eq!(updated.uid(), stored.uid());
        assert_eq!(
            updated.metadata().annotations.as_ref().and_then(|a| a.get("external")),
            Some(&"yes".to_owned())
        );
        let ManagedObject::ConfigMap(updated) = updated else {
            panic!("expected a config map");
        };
        assert_eq!(updated.data.expect("data")["a"], "2");
        assert_eq!(
            platform.actions().await,
            vec![PlatformAction::Update(stored.key())]
        );
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert(config_map("one", &[])).await;
        platform.mutate(&stored.key(), |_| {}).await;

        let err = platform.update(&stored).await.expect_err("stale");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_existing_name() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert(config_map("one", &[])).await;

        let err = platform.create(&stored).await.expect_err("exists");
        assert!(err.is_already_exists());
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let platform = MemoryPlatform::new();
        platform
            .fail_next(Operation::List, PlatformError::Unavailable("down".to_owned()))
            .await;

        let selector = BTreeMap::new();
        assert!(
            platform
                .list_owned(ManagedKind::Service, "default", &selector)
                .await
                .is_err()
        );
        assert!(
            platform
                .list_owned(ManagedKind::Service, "default", &selector)
                .await
                .is_ok()
        );
    }
}
