use std::collections::BTreeMap;

use serde::Serialize;

use tempo_operator_metadata::config::FeatureGates;
use tempo_operator_metadata::stack::{
    LimitSpec, ModeType, PermissionType, RateLimitSpec, SearchSpec, SubjectKind,
};

use crate::naming;
use crate::params::{Params, StorageParams};

use super::{
    CONFIG_DIR, INTERNAL_TLS_CA_DIR, INTERNAL_TLS_CERT_DIR, RECEIVER_TLS_CA_DIR,
    RECEIVER_TLS_CERT_DIR, STORAGE_TLS_CA_DIR, STORAGE_TLS_CERT_DIR, TEMPO_OVERRIDES,
    TENANT_HEADER, TLS_CA_FILENAME, TLS_CERT_FILENAME, TLS_KEY_FILENAME,
};

const OPA_URL_PATH: &str = "/v1/data/tempostack/allow";

#[derive(Debug, Serialize)]
pub(super) struct GateOptions {
    grpc_encryption: bool,
    http_encryption: bool,
}

impl From<&FeatureGates> for GateOptions {
    fn from(gates: &FeatureGates) -> Self {
        Self {
            grpc_encryption: gates.grpc_encryption,
            http_encryption: gates.http_encryption,
        }
    }
}

#[derive(Debug, Serialize)]
struct TlsPaths {
    ca: String,
    certificate: String,
    key: String,
}

impl TlsPaths {
    fn new(ca_dir: &str, cert_dir: &str) -> Self {
        Self {
            ca: format!("{ca_dir}/{TLS_CA_FILENAME}"),
            certificate: format!("{cert_dir}/{TLS_CERT_FILENAME}"),
            key: format!("{cert_dir}/{TLS_KEY_FILENAME}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ServerNames {
    ingester: String,
    query_frontend: String,
}

#[derive(Debug, Serialize)]
struct ProfileOptions {
    min_version: String,
    min_version_short: &'static str,
    ciphers: Vec<&'static str>,
}

/// internal TLS between components
#[derive(Debug, Serialize)]
struct TlsOptions {
    paths: TlsPaths,
    server_names: ServerNames,
    profile: ProfileOptions,
}

impl TlsOptions {
    fn new(params: &Params) -> Self {
        let namespace = params.namespace();
        let instance = params.instance();
        Self {
            paths: TlsPaths::new(INTERNAL_TLS_CA_DIR, INTERNAL_TLS_CERT_DIR),
            server_names: ServerNames {
                ingester: naming::service_fqdn(namespace, instance, naming::INGESTER),
                query_frontend: naming::service_fqdn(namespace, instance, naming::QUERY_FRONTEND),
            },
            profile: ProfileOptions {
                min_version: params.tls_profile.min_tls_version.clone(),
                min_version_short: params.tls_profile.min_version_short().unwrap_or("1.3"),
                ciphers: params.tls_profile.iana_ciphers(),
            },
        }
    }
}

/// TLS of the OTLP receivers
#[derive(Debug, Serialize)]
struct ReceiverTlsOptions {
    enabled: bool,
    client_ca_enabled: bool,
    paths: TlsPaths,
    min_version: String,
}

#[derive(Debug, Default, Serialize)]
struct StorageTlsOptions {
    enabled: bool,
    ca: String,
    certificate: String,
    key: String,
    min_version: String,
}

#[derive(Debug, Serialize)]
struct MemberlistOptions {
    enable_ipv6: bool,
    join_members: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RateLimitOptions {
    ingestion_burst_size_bytes: Option<i64>,
    ingestion_rate_limit_bytes: Option<i64>,
    max_bytes_per_trace: Option<i64>,
    max_traces_per_user: Option<i64>,
    max_bytes_per_tag_values: Option<i64>,
    /// empty when unlimited
    max_search_duration: String,
}

impl From<&RateLimitSpec> for RateLimitOptions {
    fn from(spec: &RateLimitSpec) -> Self {
        let duration = spec.query.max_search_duration;
        Self {
            ingestion_burst_size_bytes: spec.ingestion.ingestion_burst_size_bytes,
            ingestion_rate_limit_bytes: spec.ingestion.ingestion_rate_limit_bytes,
            max_bytes_per_trace: spec.ingestion.max_bytes_per_trace,
            max_traces_per_user: spec.ingestion.max_traces_per_user,
            max_bytes_per_tag_values: spec.query.max_bytes_per_tag_values,
            max_search_duration: if duration.is_zero() {
                String::new()
            } else {
                duration.to_string()
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchOptions {
    external_hedge_requests_at: &'static str,
    external_hedge_requests_up_to: u32,
    concurrent_jobs: u32,
    max_concurrent_queries: u32,
    default_result_limit: i32,
    max_duration: String,
    max_result_limit: i32,
}

impl From<&SearchSpec> for SearchOptions {
    fn from(spec: &SearchSpec) -> Self {
        Self {
            external_hedge_requests_at: "8s",
            external_hedge_requests_up_to: 2,
            concurrent_jobs: 2000,
            max_concurrent_queries: 20,
            default_result_limit: spec.default_result_limit.unwrap_or_default(),
            max_duration: spec.max_duration.to_string(),
            max_result_limit: spec.max_result_limit,
        }
    }
}

#[derive(Debug, Serialize)]
struct S3Options<'a> {
    endpoint: &'a str,
    bucket: &'a str,
    insecure: bool,
}

#[derive(Debug, Serialize)]
struct AzureOptions<'a> {
    container: &'a str,
    account_name: &'a str,
}

#[derive(Debug, Serialize)]
struct GcsOptions<'a> {
    bucket: &'a str,
}

/// Context of the main Tempo config document
#[derive(Debug, Serialize)]
pub(super) struct TempoOptions<'a> {
    storage_type: &'static str,
    s3: Option<S3Options<'a>>,
    azure: Option<AzureOptions<'a>>,
    gcs: Option<GcsOptions<'a>>,
    storage_tls: StorageTlsOptions,
    global_retention: String,
    memberlist: MemberlistOptions,
    query_frontend_discovery: String,
    global_rate_limits: RateLimitOptions,
    tenant_rate_limits_path: Option<String>,
    search: SearchOptions,
    replication_factor: i32,
    multitenancy: bool,
    gateway: bool,
    gates: GateOptions,
    tls: Option<TlsOptions>,
    receiver_tls: ReceiverTlsOptions,
}

impl<'a> TempoOptions<'a> {
    pub(super) fn new(params: &'a Params, gates: &FeatureGates) -> Self {
        let spec = &params.stack.spec;
        let instance = params.instance();

        let (s3, azure, gcs) = match &params.storage {
            StorageParams::S3(s3) => (
                Some(S3Options {
                    endpoint: &s3.endpoint,
                    bucket: &s3.bucket,
                    insecure: s3.insecure,
                }),
                None,
                None,
            ),
            StorageParams::Azure(azure) => (
                None,
                Some(AzureOptions {
                    container: &azure.container,
                    account_name: &azure.account_name,
                }),
                None,
            ),
            StorageParams::Gcs(gcs) => (None, None, Some(GcsOptions { bucket: &gcs.bucket })),
        };

        let storage_tls = spec.storage.tls.clone();
        let s3_ca = match &params.storage {
            StorageParams::S3(s3) => s3.ca_filename.clone(),
            _ => None,
        };
        let storage_tls = StorageTlsOptions {
            enabled: storage_tls.enabled,
            ca: s3_ca
                .map(|file| format!("{STORAGE_TLS_CA_DIR}/{file}"))
                .unwrap_or_default(),
            certificate: if storage_tls.cert.is_empty() {
                String::new()
            } else {
                format!("{STORAGE_TLS_CERT_DIR}/{TLS_CERT_FILENAME}")
            },
            key: if storage_tls.cert.is_empty() {
                String::new()
            } else {
                format!("{STORAGE_TLS_CERT_DIR}/{TLS_KEY_FILENAME}")
            },
            min_version: storage_tls.min_version,
        };

        let receiver = &spec.template.distributor.tls;
        let receiver_tls = ReceiverTlsOptions {
            enabled: receiver.enabled,
            client_ca_enabled: !receiver.ca.is_empty(),
            paths: TlsPaths::new(RECEIVER_TLS_CA_DIR, RECEIVER_TLS_CERT_DIR),
            min_version: if receiver.min_version.is_empty() {
                params
                    .tls_profile
                    .min_version_short()
                    .unwrap_or("1.3")
                    .to_owned()
            } else {
                receiver.min_version.clone()
            },
        };

        Self {
            storage_type: params.storage.backend().as_str(),
            s3,
            azure,
            gcs,
            storage_tls,
            global_retention: spec.retention.global.traces.to_string(),
            memberlist: MemberlistOptions {
                enable_ipv6: spec.hash_ring.member_list.enable_ipv6.unwrap_or(false),
                join_members: vec![naming::name(naming::GOSSIP_RING, instance)],
            },
            query_frontend_discovery: format!(
                "{}:{}",
                naming::name(naming::QUERY_FRONTEND_DISCOVERY, instance),
                naming::PORT_GRPC
            ),
            global_rate_limits: RateLimitOptions::from(&spec.limit_spec.global),
            tenant_rate_limits_path: has_tenant_overrides(&spec.limit_spec)
                .then(|| format!("{CONFIG_DIR}/{TEMPO_OVERRIDES}")),
            search: SearchOptions::from(&spec.search_spec),
            replication_factor: spec.replication_factor,
            multitenancy: spec.is_multitenant(),
            gateway: spec.template.gateway.enabled,
            gates: GateOptions::from(gates),
            tls: (gates.grpc_encryption || gates.http_encryption).then(|| TlsOptions::new(params)),
            receiver_tls,
        }
    }
}

/// at least one tenant overrides a global limit
fn has_tenant_overrides(limits: &LimitSpec) -> bool {
    limits
        .per_tenant
        .values()
        .any(|limits| *limits != RateLimitSpec::default())
}

#[derive(Debug, Serialize)]
pub(super) struct TenantOverridesOptions {
    rate_limits: BTreeMap<String, RateLimitOptions>,
}

impl TenantOverridesOptions {
    pub(super) fn new(limits: &LimitSpec) -> Option<Self> {
        has_tenant_overrides(limits).then(|| Self {
            rate_limits: limits
                .per_tenant
                .iter()
                .map(|(tenant, spec)| (tenant.clone(), RateLimitOptions::from(spec)))
                .collect(),
        })
    }
}

/// Context of the Jaeger query plugin config
#[derive(Debug, Serialize)]
pub(super) struct QueryOptions {
    http_port: i32,
    tenant_header: &'static str,
    gateway: bool,
    gates: GateOptions,
    tls: TlsOptions,
}

impl QueryOptions {
    pub(super) fn new(params: &Params) -> Self {
        Self {
            http_port: naming::PORT_HTTP,
            tenant_header: TENANT_HEADER,
            gateway: params.stack.spec.template.gateway.enabled,
            gates: GateOptions::from(&params.config.gates),
            tls: TlsOptions::new(params),
        }
    }
}

#[derive(Debug, Serialize)]
struct RoleOptions<'a> {
    name: &'a str,
    permissions: Vec<&'static str>,
    resources: &'a [String],
    tenants: &'a [String],
}

#[derive(Debug, Serialize)]
struct SubjectOptions<'a> {
    kind: &'static str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RoleBindingOptions<'a> {
    name: &'a str,
    roles: &'a [String],
    subjects: Vec<SubjectOptions<'a>>,
}

#[derive(Debug, Default, Serialize)]
pub(super) struct RbacOptions<'a> {
    roles: Vec<RoleOptions<'a>>,
    role_bindings: Vec<RoleBindingOptions<'a>>,
}

#[derive(Debug, Serialize)]
struct OidcOptions<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    issuer_ca_path: &'a str,
    issuer_url: &'a str,
    redirect_url: &'a str,
    username_claim: &'a str,
    group_claim: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenShiftOptions<'a> {
    service_account: String,
    redirect_url: String,
    cookie_secret: &'a str,
    opa_url: String,
}

#[derive(Debug, Serialize)]
struct TenantOptions<'a> {
    name: &'a str,
    id: &'a str,
    oidc: Option<OidcOptions<'a>>,
    openshift: Option<OpenShiftOptions<'a>>,
}

#[derive(Debug, Serialize)]
pub(super) struct TenantsOptions<'a> {
    tenants: Vec<TenantOptions<'a>>,
}

/// Context of the gateway documents
pub(super) struct GatewayOptions<'a> {
    pub(super) rbac: RbacOptions<'a>,
    pub(super) tenants: TenantsOptions<'a>,
}

impl<'a> GatewayOptions<'a> {
    pub(super) fn new(params: &'a Params) -> Option<Self> {
        let tenants = params.stack.spec.tenants.as_ref()?;
        let instance = params.instance();
        let namespace = params.namespace();

        let rbac = match &tenants.authorization {
            Some(authorization) => RbacOptions {
                roles: authorization
                    .roles
                    .iter()
                    .map(|role| RoleOptions {
                        name: &role.name,
                        permissions: role
                            .permissions
                            .iter()
                            .map(|permission| match permission {
                                PermissionType::Read => "read",
                                PermissionType::Write => "write",
                            })
                            .collect(),
                        resources: &role.resources,
                        tenants: &role.tenants,
                    })
                    .collect(),
                role_bindings: authorization
                    .role_bindings
                    .iter()
                    .map(|binding| RoleBindingOptions {
                        name: &binding.name,
                        roles: &binding.roles,
                        subjects: binding
                            .subjects
                            .iter()
                            .map(|subject| SubjectOptions {
                                kind: match subject.kind {
                                    SubjectKind::User => "user",
                                    SubjectKind::Group => "group",
                                },
                                name: &subject.name,
                            })
                            .collect(),
                    })
                    .collect(),
            },
            None => RbacOptions::default(),
        };

        let gateway_host = {
            let host = &params.stack.spec.template.gateway.ingress.host;
            if host.is_empty() {
                naming::gateway_route_host(
                    namespace,
                    instance,
                    &params.config.gates.openshift.base_domain,
                )
            } else {
                host.clone()
            }
        };

        let tenants = tenants
            .authentication
            .iter()
            .map(|auth| {
                let oidc = match (tenants.mode, &auth.oidc) {
                    (ModeType::Static, Some(oidc)) => {
                        let secret = params
                            .tenant_secrets
                            .iter()
                            .find(|secret| secret.tenant_name == auth.tenant_name);
                        Some(OidcOptions {
                            client_id: secret.map(|s| s.client_id.as_str()).unwrap_or_default(),
                            client_secret: secret
                                .map(|s| s.client_secret.as_str())
                                .unwrap_or_default(),
                            issuer_ca_path: secret
                                .map(|s| s.issuer_ca_path.as_str())
                                .unwrap_or_default(),
                            issuer_url: &oidc.issuer_url,
                            redirect_url: &oidc.redirect_url,
                            username_claim: &oidc.username_claim,
                            group_claim: &oidc.group_claim,
                        })
                    }
                    _ => None,
                };
                let openshift = (tenants.mode == ModeType::OpenShift).then(|| OpenShiftOptions {
                    service_account: naming::name(naming::GATEWAY, instance),
                    redirect_url: format!(
                        "https://{gateway_host}/openshift/{}/callback",
                        auth.tenant_name
                    ),
                    cookie_secret: params
                        .tenants_data
                        .iter()
                        .find(|data| data.tenant_name == auth.tenant_name)
                        .map(|data| data.cookie_secret.as_str())
                        .unwrap_or_default(),
                    opa_url: format!("http://localhost:{}{OPA_URL_PATH}", naming::PORT_OPA),
                });
                TenantOptions {
                    name: &auth.tenant_name,
                    id: &auth.tenant_id,
                    oidc,
                    openshift,
                }
            })
            .collect();

        Some(Self {
            rbac,
            tenants: TenantsOptions { tenants },
        })
    }
}
