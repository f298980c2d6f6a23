//!
//! # Config templates
//!
//! Renders the Tempo configuration documents and the gateway configuration from
//! resolved parameters. The registry is built once at start and shared; rendering is
//! a pure function of its inputs.
//!
mod options;

use std::collections::BTreeMap;

use minijinja::{AutoEscape, Environment};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::TemplateError;
use crate::params::Params;

use self::options::{GatewayOptions, QueryOptions, TempoOptions, TenantOverridesOptions};

pub const TEMPO_CONFIG: &str = "tempo.yaml";
pub const TEMPO_QUERY_FRONTEND_CONFIG: &str = "tempo-query-frontend.yaml";
pub const TEMPO_OVERRIDES: &str = "overrides.yaml";
pub const TEMPO_QUERY_CONFIG: &str = "tempo-query.yaml";
pub const GATEWAY_RBAC: &str = "rbac.yaml";
pub const GATEWAY_TENANTS: &str = "tenants.yaml";

/// pod template annotation carrying the config fingerprint
pub const CONFIG_HASH_ANNOTATION: &str = "tempo.grafana.com/tempoConfig.hash";

/// directory the config map is mounted at
pub const CONFIG_DIR: &str = "/conf";
/// data directory holding the WAL
pub const DATA_DIR: &str = "/var/tempo";

pub const TLS_CA_FILENAME: &str = "service-ca.crt";
pub const TLS_CERT_FILENAME: &str = "tls.crt";
pub const TLS_KEY_FILENAME: &str = "tls.key";

pub const RECEIVER_TLS_CA_DIR: &str = "/var/run/ca-receiver";
pub const RECEIVER_TLS_CERT_DIR: &str = "/var/run/tls/receiver";
pub const INTERNAL_TLS_CA_DIR: &str = "/var/run/ca";
pub const INTERNAL_TLS_CERT_DIR: &str = "/var/run/tls/server";
pub const STORAGE_TLS_CA_DIR: &str = "/var/run/ca-storage";
pub const STORAGE_TLS_CERT_DIR: &str = "/var/run/tls/storage";

/// header carrying the tenant id to Tempo
pub const TENANT_HEADER: &str = "x-scope-orgid";

const ASSETS: &[(&str, &str)] = &[
    (TEMPO_CONFIG, include_str!("assets/tempo.yaml")),
    (TEMPO_OVERRIDES, include_str!("assets/overrides.yaml")),
    (TEMPO_QUERY_CONFIG, include_str!("assets/tempo-query.yaml")),
    (GATEWAY_RBAC, include_str!("assets/rbac.yaml")),
    (GATEWAY_TENANTS, include_str!("assets/tenants.yaml")),
];

/// Rendered Tempo configuration, keyed by file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFiles {
    pub data: BTreeMap<String, String>,
    pub hash: String,
}

impl ConfigFiles {
    fn new(data: BTreeMap<String, String>) -> Self {
        let hash = fingerprint(&data);
        Self { data, hash }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(String::as_str)
    }
}

/// lowercase hex sha256 over keys and values in key order
pub fn fingerprint(data: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Static templates, loaded once
pub struct TemplateRegistry {
    env: Environment<'static>,
}

impl TemplateRegistry {
    pub fn new() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);

        for (name, source) in ASSETS {
            env.add_template(name, source)
                .map_err(|source| TemplateError::Load { name, source })?;
        }
        Ok(Self { env })
    }

    fn render<S: Serialize>(&self, name: &'static str, ctx: S) -> Result<String, TemplateError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|source| TemplateError::Load { name, source })?;
        let rendered = template
            .render(ctx)
            .map_err(|source| TemplateError::Render { name, source })?;
        trace!(name, bytes = rendered.len(), "rendered");
        Ok(rendered)
    }

    /// every Tempo config document of an instance
    pub fn render_config(&self, params: &Params) -> Result<ConfigFiles, TemplateError> {
        let spec = &params.stack.spec;
        let mut data = BTreeMap::new();

        let options = TempoOptions::new(params, &params.config.gates);
        data.insert(TEMPO_CONFIG.to_owned(), self.render(TEMPO_CONFIG, &options)?);

        // the query frontend only serves http TLS behind the gateway
        let mut frontend_gates = params.config.gates.clone();
        if !spec.template.gateway.enabled {
            frontend_gates.http_encryption = false;
        }
        let frontend_options = TempoOptions::new(params, &frontend_gates);
        data.insert(
            TEMPO_QUERY_FRONTEND_CONFIG.to_owned(),
            self.render(TEMPO_CONFIG, &frontend_options)?,
        );

        if let Some(overrides) = TenantOverridesOptions::new(&spec.limit_spec) {
            data.insert(TEMPO_OVERRIDES.to_owned(), self.render(TEMPO_OVERRIDES, &overrides)?);
        }

        if spec.template.query_frontend.jaeger_query.enabled {
            let query = QueryOptions::new(params);
            data.insert(TEMPO_QUERY_CONFIG.to_owned(), self.render(TEMPO_QUERY_CONFIG, &query)?);
        }

        Ok(ConfigFiles::new(data))
    }

    /// gateway rbac and tenants documents, `None` without tenants
    pub fn render_gateway(&self, params: &Params) -> Result<Option<ConfigFiles>, TemplateError> {
        let Some(options) = GatewayOptions::new(params) else {
            return Ok(None);
        };
        let mut data = BTreeMap::new();
        data.insert(GATEWAY_RBAC.to_owned(), self.render(GATEWAY_RBAC, &options.rbac)?);
        data.insert(GATEWAY_TENANTS.to_owned(), self.render(GATEWAY_TENANTS, &options.tenants)?);
        Ok(Some(ConfigFiles::new(data)))
    }
}
