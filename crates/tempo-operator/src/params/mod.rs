//!
//! # Parameter resolution
//!
//! Turns the references held by an instance (storage secret, CA config map, tenant
//! secrets, cluster policies) into concrete values for one reconcile cycle. Nothing
//! resolved here is persisted.
//!
mod storage;
mod tenants;
mod tls;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use tempo_operator_metadata::config::ProjectConfig;
use tempo_operator_metadata::stack::{ConditionReason, ModeType, TempoStack};

use crate::error::{ConfigurationError, ReconcileError};
use crate::platform::{Platform, cancellable};

pub use self::storage::{
    AzureParams, GcsParams, S3Params, STORAGE_CA_KEY, StorageParams, validate_ca_config_map,
    validate_storage_secret,
};
pub use self::tenants::{
    GATEWAY_TENANTS_KEY, TenantData, TenantOidcSecret, generate_cookie_secret,
    validate_tenant_configs,
};
pub use self::tls::{TlsProfile, resolve_tls_profile};

/// Everything the templater and the builder need for one instance
#[derive(Debug, Clone)]
pub struct Params {
    pub stack: TempoStack,
    /// operator configuration, with the OpenShift base domain filled in when needed
    pub config: ProjectConfig,
    pub storage: StorageParams,
    pub tls_profile: TlsProfile,
    /// static mode only
    pub tenant_secrets: Vec<TenantOidcSecret>,
    /// OpenShift mode only
    pub tenants_data: Vec<TenantData>,
}

impl Params {
    /// parameters without any platform lookup
    pub fn offline(stack: TempoStack, config: ProjectConfig) -> Self {
        let storage = StorageParams::placeholder(stack.spec.storage.secret.type_);
        let tls_profile = config
            .gates
            .tls_profile
            .parse()
            .map(TlsProfile::named)
            .unwrap_or_default();
        Self {
            stack,
            config,
            storage,
            tls_profile,
            tenant_secrets: Vec::new(),
            tenants_data: Vec::new(),
        }
    }

    pub fn instance(&self) -> &str {
        self.stack.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.stack.metadata.namespace.as_deref().unwrap_or_default()
    }
}

/// resolve everything for one cycle, storage first
#[instrument(skip_all)]
pub async fn resolve(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    stack: &TempoStack,
    config: &ProjectConfig,
) -> Result<Params, ReconcileError> {
    let storage = storage::resolve_storage(platform, cancel, stack).await?;

    validate_tenant_configs(stack.spec.tenants.as_ref()).map_err(|err| {
        ConfigurationError::new(
            ConditionReason::InvalidTenantsConfiguration,
            format!("Invalid tenants configuration: {err}"),
        )
    })?;

    let mut config = config.clone();
    let mode = stack.spec.tenant_mode();
    if mode == Some(ModeType::OpenShift) && config.gates.openshift.base_domain.is_empty() {
        let domain = cancellable(cancel, platform.cluster_base_domain()).await?;
        info!(%domain, "OpenShift base domain set");
        config.gates.openshift.base_domain = domain;
    }

    let tls_profile = resolve_tls_profile(platform, cancel, &config.gates).await?;

    let tenant_secrets = match mode {
        Some(ModeType::Static) => tenants::resolve_oidc_secrets(platform, cancel, stack).await?,
        _ => Vec::new(),
    };
    let tenants_data = match mode {
        Some(ModeType::OpenShift) => tenants::resolve_tenants_data(platform, cancel, stack).await?,
        _ => Vec::new(),
    };

    Ok(Params {
        stack: stack.clone(),
        config,
        storage,
        tls_profile,
        tenant_secrets,
        tenants_data,
    })
}
