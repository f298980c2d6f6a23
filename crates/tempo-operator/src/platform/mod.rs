//!
//! # Platform
//!
//! Everything the operator reads from or writes to the cluster goes through the
//! [`Platform`] trait. The cluster implementation talks to the API server, the memory
//! implementation backs the tests.
//!
mod k8;
mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use tokio_util::sync::CancellationToken;

use tempo_operator_metadata::stack::TempoStack;

use crate::error::PlatformError;
use crate::objects::{ManagedKind, ManagedObject, ObjectKey};

pub use self::k8::K8Platform;
pub use self::memory::{MemoryPlatform, Operation, PlatformAction};

/// field manager used for server side apply
pub const FIELD_MANAGER: &str = "tempo-operator";

/// TLS security profile configured on the cluster API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTlsProfile {
    /// `Old`, `Intermediate`, `Modern` or `Custom`
    pub type_: String,
    /// only set for `Custom`, OpenSSL cipher names
    pub ciphers: Vec<String>,
    pub min_tls_version: String,
}

/// API groups served by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub api_groups: BTreeSet<String>,
}

impl Capabilities {
    pub fn has(&self, group: &str) -> bool {
        self.api_groups.contains(group)
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// objects of `kind` in `namespace` carrying all `labels`
    async fn list_owned(
        &self,
        kind: ManagedKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ManagedObject>, PlatformError>;

    async fn create(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError>;

    /// update the fields set in `object`, leaving other fields alone
    async fn update(&self, object: &ManagedObject) -> Result<ManagedObject, PlatformError>;

    /// deleting a missing object succeeds
    async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError>;

    async fn get_secret(&self, namespace: &str, name: &str)
    -> Result<Option<Secret>, PlatformError>;

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError>;

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, PlatformError>;

    /// `None` when the API server does not configure a profile
    async fn cluster_tls_profile(&self) -> Result<Option<ClusterTlsProfile>, PlatformError>;

    /// wildcard domain of the cluster ingress
    async fn cluster_base_domain(&self) -> Result<String, PlatformError>;

    async fn capabilities(&self) -> Result<Capabilities, PlatformError>;

    async fn get_stack(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<TempoStack>, PlatformError>;

    /// write spec and metadata, fails with a conflict on a stale resource version
    async fn replace_stack(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError>;

    /// write the status sub resource, fails with a conflict on a stale resource version
    async fn replace_stack_status(&self, stack: &TempoStack) -> Result<TempoStack, PlatformError>;
}

/// run a platform call unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PlatformError::Cancelled),
        result = call => result,
    }
}

/// value of a secret key, looking at `data` then `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return String::from_utf8(value.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
}

/// keys present in a secret
pub fn secret_keys(secret: &Secret) -> BTreeSet<&str> {
    let data = secret.data.iter().flat_map(|data| data.keys());
    let string_data = secret.string_data.iter().flat_map(|data| data.keys());
    data.chain(string_data).map(String::as_str).collect()
}
