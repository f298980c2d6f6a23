use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use tracing::{debug, instrument, trace};

use tempo_operator_metadata::stack::TempoStack;

use crate::error::PlatformError;
use crate::naming::selector_string;
use crate::objects::{ManagedKind, ManagedObject, ObjectKey};

use super::{Capabilities, ClusterTlsProfile, FIELD_MANAGER, Platform};

/// name of the cluster scoped OpenShift configuration singletons
const CLUSTER_CONFIG: &str = "cluster";

/// status reason of a create hitting an existing name
const ALREADY_EXISTS: &str = "AlreadyExists";

/// Platform backed by the Kubernetes API server
#[derive(Clone)]
pub struct K8Platform {
    client: Client,
}

impl K8Platform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, kind: ManagedKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn openshift_config(&self, kind: &str, plural: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk("config.openshift.io", "v1", kind),
            plural,
        );
        Api::all_with(self.client.clone(), &resource)
    }

    fn stacks(&self, namespace: &str) -> Api<TempoStack> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// turn 409 responses into [`PlatformError::AlreadyExists`] or [`PlatformError::Conflict`]
fn map_err(err: kube::Error, what: impl FnOnce() -> String) -> PlatformError {
    match err {
        kube::Error::Api(response) if response.code == 409 && response.reason == ALREADY_EXISTS => {
            PlatformError::AlreadyExists(what())
        }
        kube::Error::Api(response) if response.code == 409 => PlatformError::Conflict(what()),
        err => PlatformError::Kube(err),
    }
}

/// list items come without type information
fn into_managed(kind: ManagedKind, object: DynamicObject) -> Result<ManagedObject, PlatformError> {
    let mut value = serde_json::to_value(object)?;
    if let Value::Object(map) = &mut value {
        let desc = kind.descriptor();
        map.insert("apiVersion".to_owned(), Value::String(desc.api_version()));
        map.insert("kind".to_owned(), Value::String(desc.name.to_owned()));
    }
    Ok(ManagedObject::from_value(kind, value)?)
}

fn into_dynamic(object: &ManagedObject) -> Result<DynamicObject, PlatformError> {
    Ok(serde_json::from_value(object.to_value()?)?)
}

fn tls_profile(apiserver: &DynamicObject) -> Option<ClusterTlsProfile> {
    let profile = apiserver.data.get("spec")?.get("tlsSecurityProfile")?;
    let type_ = profile.get("type").and_then(Value::as_str).unwrap_or_default();
    let custom = profile.get("custom");
    let ciphers = custom
        .and_then(|custom| custom.get("ciphers"))
        .and_then(Value::as_array)
        .map(|ciphers| {
            ciphers
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let min_tls_version = custom
        .and_then(|custom| custom.get("minTLSVersion"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(ClusterTlsProfile {
        type_: type_.to_owned(),
        ciphers,
        min_tls_version: min_tls_version.to_owned(),
    })
}

#[async_trait]
impl Platform for K8Platform {
    #[instrument(skip(self, labels))]
    async fn list_owned(
        &self,
        kind: ManagedKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>, PlatformError> {
        let params = ListParams::default().labels(&selector_string(labels));
        let list = self
            .dynamic(kind, namespace)
            .list(&params)
            .await
            .map_err(PlatformError::Kube)?;
        trace!(items = list.items.len(), "listed");
        list.items
            .into_iter()
            .map(|object| into_managed(kind, object))
            .collect()
    }

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError> {
        let key = object.key();
        debug!(%key, "creating");
        let created = self
            .dynamic(key.kind, &key.namespace)
            .create(&PostParams::default(), &into_dynamic(object)?)
            .await
            .map_err(|err| map_err(err, || key.to_string()))?;
        into_managed(key.kind, created)
    }

    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError> {
        let key = object.key();
        debug!(%key, "applying");
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let applied = self
            .dynamic(key.kind, &key.namespace)
            .patch(&key.name, &params, &Patch::Apply(&object.to_value()?))
            .await
            .map_err(|err| map_err(err, || key.to_string()))?;
        into_managed(key.kind, applied)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError> {
        debug!(%key, "deleting");
        match self
            .dynamic(key.kind, &key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                trace!(%key, "already gone");
                Ok(())
            }
            Err(err) => Err(PlatformError::Kube(err)),
        }
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, PlatformError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, PlatformError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn cluster_tls_profile(&self) -> Result<Option<ClusterTlsProfile>, PlatformError> {
        let apiserver = self
            .openshift_config("APIServer", "apiservers")
            .get_opt(CLUSTER_CONFIG)
            .await?;
        Ok(apiserver.as_ref().and_then(tls_profile))
    }

    async fn cluster_base_domain(&self) -> Result<String, PlatformError> {
        let ingress = self
            .openshift_config("Ingress", "ingresses")
            .get_opt(CLUSTER_CONFIG)
            .await?
            .ok_or_else(|| PlatformError::Unavailable("cluster ingress config not found".to_owned()))?;
        ingress
            .data
            .get("spec")
            .and_then(|spec| spec.get("domain"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| PlatformError::Unavailable("cluster ingress config has no domain".to_owned()))
    }

    async fn capabilities(&self) -> Result<Capabilities, PlatformError> {
        let groups = self.client.list_api_groups().await?;
        Ok(Capabilities {
            api_groups: groups.groups.into_iter().map(|group| group.name).collect(),
        })
    }

    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TempoStack>, PlatformError> {
        Ok(self.stacks(namespace).get_opt(name).await?)
    }

    async fn replace_stack(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError> {
        let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
        let name = stack.metadata.name.as_deref().unwrap_or_default();
        self.stacks(namespace)
            .replace(name, &PostParams::default(), stack)
            .await
            .map_err(|err| map_err(err, || format!("TempoStack {namespace}/{name}")))
    }

    async fn replace_stack_status(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError> {
        let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
        let name = stack.metadata.name.as_deref().unwrap_or_default();
        let body = serde_json::to_vec(stack)?;
        self.stacks(namespace)
            .replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|err| map_err(err, || format!("TempoStack {namespace}/{name} status")))
    }
}

#[cfg(test)]
mod test {

    use serde_json::json;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_owned(),
            message: "tempo-simplest".to_owned(),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn test_map_409() {
        let exists = map_err(api_error(409, "AlreadyExists"), || "ConfigMap default/a".to_owned());
        assert!(matches!(exists, PlatformError::AlreadyExists(_)));
        assert!(exists.is_already_exists());
        assert!(!exists.is_conflict());

        let conflict = map_err(api_error(409, "Conflict"), || "ConfigMap default/a".to_owned());
        assert!(matches!(conflict, PlatformError::Conflict(_)));
        assert!(!conflict.is_already_exists());

        assert!(matches!(
            map_err(api_error(500, "InternalError"), String::new),
            PlatformError::Kube(_)
        ));
    }

    #[test]
    fn test_custom_tls_profile() {
        let apiserver: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "APIServer",
            "metadata": { "name": "cluster" },
            "spec": {
                "tlsSecurityProfile": {
                    "type": "Custom",
                    "custom": {
                        "ciphers": ["ECDHE-ECDSA-AES128-GCM-SHA256"],
                        "minTLSVersion": "VersionTLS12"
                    }
                }
            }
        }))
        .expect("apiserver");

        let profile = tls_profile(&apiserver).expect("profile");
        assert_eq!(profile.type_, "Custom");
        assert_eq!(profile.ciphers, vec!["ECDHE-ECDSA-AES128-GCM-SHA256"]);
        assert_eq!(profile.min_tls_version, "VersionTLS12");
    }

    #[test]
    fn test_missing_tls_profile() {
        let apiserver: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "APIServer",
            "metadata": { "name": "cluster" },
            "spec": {}
        }))
        .expect("apiserver");
        assert!(tls_profile(&apiserver).is_none());
    }

    #[test]
    fn test_list_item_gets_type_information() {
        let object: DynamicObject = serde_json::from_value(json!({
            "metadata": { "name": "tempo-simplest", "namespace": "default" },
            "data": { "tempo.yaml": "server: {}" }
        }))
        .expect("object");
        let managed = into_managed(ManagedKind::ConfigMap, object).expect("managed");
        assert_eq!(managed.kind(), ManagedKind::ConfigMap);
        assert_eq!(managed.name(), "tempo-simplest");
    }
}
