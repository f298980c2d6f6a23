use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tempo_operator_metadata::stack::{ConditionReason, ModeType, TempoStack, TenantsSpec};

use crate::error::{ConfigurationError, PlatformError, ReconcileError};
use crate::naming;
use crate::platform::{Platform, cancellable, secret_value};

pub const TENANT_CLIENT_ID: &str = "clientID";
pub const TENANT_CLIENT_SECRET: &str = "clientSecret";
pub const TENANT_ISSUER_CA_PATH: &str = "issuerCAPath";

/// key of the tenants document in the gateway secret
pub const GATEWAY_TENANTS_KEY: &str = "tenants.yaml";

const COOKIE_SECRET_LEN: usize = 32;

/// OIDC client credentials of one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantOidcSecret {
    pub tenant_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub issuer_ca_path: String,
}

/// Per tenant data the gateway keeps between cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantData {
    pub tenant_name: String,
    pub cookie_secret: String,
}

/// check the tenants section is consistent with its mode
pub fn validate_tenant_configs(tenants: Option<&TenantsSpec>) -> Result<(), String> {
    let Some(tenants) = tenants else {
        return Ok(());
    };

    let mut names = BTreeSet::new();
    let mut ids = BTreeSet::new();
    for auth in &tenants.authentication {
        if !names.insert(auth.tenant_name.as_str()) {
            return Err(format!("tenant name {} is defined more than once", auth.tenant_name));
        }
        if !ids.insert(auth.tenant_id.as_str()) {
            return Err(format!("tenant id {} is defined more than once", auth.tenant_id));
        }
    }

    match tenants.mode {
        ModeType::Static => {
            if tenants.authentication.is_empty() {
                return Err("spec.tenants.authentication is required in static mode".to_owned());
            }
            if tenants.authentication.iter().any(|auth| auth.oidc.is_none()) {
                return Err("spec.tenants.authentication.oidc is required in static mode".to_owned());
            }
            if tenants.authorization.is_none() {
                return Err("spec.tenants.authorization is required in static mode".to_owned());
            }
        }
        ModeType::OpenShift => {
            if tenants.authorization.is_some() {
                return Err("spec.tenants.authorization should not be defined in openshift mode".to_owned());
            }
            if tenants.authentication.iter().any(|auth| auth.oidc.is_some()) {
                return Err(
                    "spec.tenants.authentication.oidc should not be defined in openshift mode".to_owned(),
                );
            }
        }
    }

    Ok(())
}

fn missing_secret(message: String) -> ReconcileError {
    ConfigurationError::new(ConditionReason::MissingGatewayTenantSecret, message).into()
}

/// one OIDC secret per tenant, all required
pub async fn resolve_oidc_secrets(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    stack: &TempoStack,
) -> Result<Vec<TenantOidcSecret>, ReconcileError> {
    let Some(tenants) = &stack.spec.tenants else {
        return Ok(Vec::new());
    };
    let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();

    let mut secrets = Vec::with_capacity(tenants.authentication.len());
    for auth in &tenants.authentication {
        let Some(oidc) = &auth.oidc else {
            continue;
        };
        let secret = cancellable(cancel, platform.get_secret(namespace, &oidc.secret.name))
            .await?
            .ok_or_else(|| {
                missing_secret(format!("Missing secrets for tenant {}", auth.tenant_name))
            })?;

        let client_id = secret_value(&secret, TENANT_CLIENT_ID).ok_or_else(|| {
            missing_secret(format!(
                "Invalid gateway tenant secret contents for tenant {}: missing {TENANT_CLIENT_ID}",
                auth.tenant_name
            ))
        })?;

        secrets.push(TenantOidcSecret {
            tenant_name: auth.tenant_name.clone(),
            client_id,
            client_secret: secret_value(&secret, TENANT_CLIENT_SECRET).unwrap_or_default(),
            issuer_ca_path: secret_value(&secret, TENANT_ISSUER_CA_PATH).unwrap_or_default(),
        });
    }
    Ok(secrets)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayTenants {
    tenants: Vec<GatewayTenant>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayTenant {
    name: String,
    openshift: Option<GatewayTenantOpenShift>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GatewayTenantOpenShift {
    cookie_secret: String,
}

#[derive(Debug, thiserror::Error)]
enum TenantsDataError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("gateway secret {0} not found")]
    MissingSecret(String),
    #[error("gateway secret has no tenants.yaml")]
    MissingDocument,
    #[error("failed to parse tenants.yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

async fn read_cookie_secrets(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    stack: &TempoStack,
) -> Result<BTreeMap<String, String>, TenantsDataError> {
    let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
    let instance = stack.metadata.name.as_deref().unwrap_or_default();
    let name = naming::name(naming::GATEWAY, instance);

    let secret = cancellable(cancel, platform.get_secret(namespace, &name))
        .await?
        .ok_or(TenantsDataError::MissingSecret(name))?;
    let document =
        secret_value(&secret, GATEWAY_TENANTS_KEY).ok_or(TenantsDataError::MissingDocument)?;
    let parsed: GatewayTenants = serde_yaml::from_str(&document)?;

    Ok(parsed
        .tenants
        .into_iter()
        .filter_map(|tenant| {
            let cookie = tenant.openshift?.cookie_secret;
            (!cookie.is_empty()).then_some((tenant.name, cookie))
        })
        .collect())
}

/// random alphanumeric cookie secret
pub fn generate_cookie_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COOKIE_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// cookie secrets kept in the gateway secret, new ones for tenants without.
///
/// The gateway secret does not exist before the first cycle, so failing to read it
/// is only logged.
pub async fn resolve_tenants_data(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    stack: &TempoStack,
) -> Result<Vec<TenantData>, ReconcileError> {
    let Some(tenants) = &stack.spec.tenants else {
        return Ok(Vec::new());
    };

    let mut cookies = match read_cookie_secrets(platform, cancel, stack).await {
        Ok(cookies) => cookies,
        // cookies are regenerated only when the secret or its document is absent
        Err(TenantsDataError::Platform(err)) => return Err(err.into()),
        Err(err) => {
            info!(%err, "failed to get gateway secret and/or tenants.yaml");
            BTreeMap::new()
        }
    };

    Ok(tenants
        .authentication
        .iter()
        .map(|auth| {
            let cookie_secret = cookies.remove(&auth.tenant_name).unwrap_or_else(|| {
                debug!(tenant = %auth.tenant_name, "generating cookie secret");
                generate_cookie_secret()
            });
            TenantData {
                tenant_name: auth.tenant_name.clone(),
                cookie_secret,
            }
        })
        .collect())
}
