use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::config::ImagesSpec;
use crate::duration::GoDuration;
use crate::{is_false, is_zero_i32};

use super::status::TempoStackStatus;

/// Desired state of one Tempo deployment split into microservices
#[derive(CustomResource, Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "tempo.grafana.com",
    version = "v1alpha1",
    kind = "TempoStack",
    plural = "tempostacks",
    namespaced,
    status = "TempoStackStatus",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoStackSpec {
    pub management_state: ManagementStateType,

    /// images overriding the operator defaults
    pub images: ImagesSpec,

    /// service account used by all components, `tempo-<name>` when unset
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,

    pub storage: ObjectStorageSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// size of the ingester volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<Quantity>,

    #[serde(skip_serializing_if = "is_zero_i32")]
    pub replication_factor: i32,

    pub retention: RetentionSpec,

    #[serde(rename = "limits")]
    pub limit_spec: LimitSpec,

    #[serde(rename = "search")]
    pub search_spec: SearchSpec,

    pub resources: Resources,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenants: Option<TenantsSpec>,

    pub hash_ring: HashRingSpec,

    pub observability: ObservabilitySpec,

    pub template: TempoTemplateSpec,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementStateType {
    #[default]
    Managed,
    Unmanaged,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStorageSpec {
    pub secret: ObjectStorageSecretSpec,
    pub tls: TlsSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStorageSecretSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ObjectStorageSecretType,
}

/// Object storage backend selected by the storage secret
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStorageSecretType {
    #[default]
    S3,
    Azure,
    Gcs,
}

impl ObjectStorageSecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Azure => "azure",
            Self::Gcs => "gcs",
        }
    }
}

impl fmt::Display for ObjectStorageSecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS settings of one channel
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsSpec {
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    /// config map holding `service-ca.crt`
    #[serde(rename = "caName", skip_serializing_if = "String::is_empty")]
    pub ca: String,
    /// secret holding `tls.crt` and `tls.key`
    #[serde(rename = "certName", skip_serializing_if = "String::is_empty")]
    pub cert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub min_version: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSpec {
    pub global: RetentionConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    pub traces: GoDuration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitSpec {
    pub global: RateLimitSpec,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub per_tenant: BTreeMap<String, RateLimitSpec>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSpec {
    pub ingestion: IngestionLimitSpec,
    pub query: QueryLimit,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestionLimitSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_burst_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion_rate_limit_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_trace: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_traces_per_user: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryLimit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_tag_values: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_search_bytes_per_trace: Option<i64>,
    #[serde(skip_serializing_if = "GoDuration::is_zero")]
    pub max_search_duration: GoDuration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_result_limit: Option<i32>,
    /// zero disables the limit
    #[serde(skip_serializing_if = "GoDuration::is_zero")]
    pub max_duration: GoDuration,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub max_result_limit: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    /// budget split across all components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<ResourceRequirements>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeType {
    #[default]
    Static,
    #[serde(rename = "openshift")]
    OpenShift,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantsSpec {
    pub mode: ModeType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<AuthenticationSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationSpec>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticationSpec {
    pub tenant_name: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSpec>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OidcSpec {
    pub secret: TenantSecretSpec,
    #[serde(rename = "issuerURL", skip_serializing_if = "String::is_empty")]
    pub issuer_url: String,
    #[serde(rename = "redirectURL", skip_serializing_if = "String::is_empty")]
    pub redirect_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group_claim: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username_claim: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantSecretSpec {
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorizationSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<RoleSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub role_bindings: Vec<RoleBindingsSpec>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleSpec {
    pub name: String,
    pub resources: Vec<String>,
    pub tenants: Vec<String>,
    pub permissions: Vec<PermissionType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Read,
    Write,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleBindingsSpec {
    pub name: String,
    pub subjects: Vec<Subject>,
    pub roles: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    pub name: String,
    pub kind: SubjectKind,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    #[default]
    User,
    Group,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HashRingSpec {
    #[serde(rename = "memberlist")]
    pub member_list: MemberListSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemberListSpec {
    #[serde(rename = "enableIPv6", skip_serializing_if = "Option::is_none")]
    pub enable_ipv6: Option<bool>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservabilitySpec {
    pub metrics: MetricsConfigSpec,
    pub grafana: GrafanaConfigSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsConfigSpec {
    #[serde(skip_serializing_if = "is_false")]
    pub create_service_monitors: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub create_prometheus_rules: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrafanaConfigSpec {
    #[serde(skip_serializing_if = "is_false")]
    pub create_datasource: bool,
    /// selects the Grafana instances importing the datasource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_selector: Option<LabelSelector>,
}

/// Per component settings
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoTemplateSpec {
    pub distributor: TempoDistributorSpec,
    pub ingester: TempoComponentSpec,
    pub compactor: TempoComponentSpec,
    pub querier: TempoComponentSpec,
    pub query_frontend: TempoQueryFrontendSpec,
    pub gateway: TempoGatewaySpec,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoComponentSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// overrides the share of the total budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoDistributorSpec {
    #[serde(flatten)]
    pub component: TempoComponentSpec,
    /// TLS of the trace receivers
    pub tls: TlsSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoQueryFrontendSpec {
    #[serde(flatten)]
    pub component: TempoComponentSpec,
    pub jaeger_query: JaegerQuerySpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JaegerQuerySpec {
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    pub ingress: IngressSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoGatewaySpec {
    #[serde(flatten)]
    pub component: TempoComponentSpec,
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    pub ingress: IngressSpec,
}

/// How a component is exposed outside the cluster
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngressType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "ingress")]
    Ingress,
    #[serde(rename = "route")]
    Route,
}

impl IngressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Ingress => "ingress",
            Self::Route => "route",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSpec {
    #[serde(rename = "type", skip_serializing_if = "IngressType::is_none")]
    pub type_: IngressType,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    pub route: RouteSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<TlsRouteTerminationType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsRouteTerminationType {
    Insecure,
    Edge,
    Passthrough,
    Reencrypt,
}

impl TlsRouteTerminationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insecure => "insecure",
            Self::Edge => "edge",
            Self::Passthrough => "passthrough",
            Self::Reencrypt => "reencrypt",
        }
    }
}

impl TempoStackSpec {
    pub fn is_multitenant(&self) -> bool {
        self.tenants.is_some()
    }

    pub fn tenant_mode(&self) -> Option<ModeType> {
        self.tenants.as_ref().map(|tenants| tenants.mode)
    }
}
