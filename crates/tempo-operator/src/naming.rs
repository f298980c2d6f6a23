//! Names and labels of managed objects.
//!
//! Both are pure functions of the instance name and the component name so the same
//! object is always found again by the next reconcile cycle.

use std::collections::BTreeMap;

pub const DISTRIBUTOR: &str = "distributor";
pub const INGESTER: &str = "ingester";
pub const COMPACTOR: &str = "compactor";
pub const QUERIER: &str = "querier";
pub const QUERY_FRONTEND: &str = "query-frontend";
pub const QUERY_FRONTEND_DISCOVERY: &str = "query-frontend-discovery";
pub const GATEWAY: &str = "gateway";
pub const GOSSIP_RING: &str = "gossip-ring";
pub const CA_BUNDLE: &str = "ca-bundle";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_GOSSIP_MEMBER: &str = "tempo-gossip-member";

pub const MANAGED_BY: &str = "tempo-operator";
pub const APP_NAME: &str = "tempo";

pub const PORT_HTTP: i32 = 3200;
pub const PORT_GRPC: i32 = 9095;
pub const PORT_OTLP_GRPC: i32 = 4317;
pub const PORT_OTLP_HTTP: i32 = 4318;
pub const PORT_MEMBERLIST: i32 = 7946;
pub const PORT_INTERNAL_HTTP: i32 = 3101;
pub const PORT_JAEGER_GRPC: i32 = 16685;
pub const PORT_JAEGER_UI: i32 = 16686;
pub const PORT_JAEGER_METRICS: i32 = 16687;
pub const PORT_GATEWAY_HTTP: i32 = 8080;
pub const PORT_GATEWAY_INTERNAL: i32 = 8081;
pub const PORT_GATEWAY_GRPC: i32 = 8090;
pub const PORT_OPA: i32 = 8082;

pub const PORT_NAME_HTTP: &str = "http";
pub const PORT_NAME_GRPC: &str = "grpc";
pub const PORT_NAME_OTLP_GRPC: &str = "otlp-grpc";
pub const PORT_NAME_OTLP_HTTP: &str = "otlp-http";
pub const PORT_NAME_MEMBERLIST: &str = "http-memberlist";
pub const PORT_NAME_JAEGER_GRPC: &str = "jaeger-grpc";
pub const PORT_NAME_JAEGER_UI: &str = "jaeger-ui";
pub const PORT_NAME_JAEGER_METRICS: &str = "jaeger-metrics";
pub const PORT_NAME_PUBLIC: &str = "public";
pub const PORT_NAME_INTERNAL: &str = "internal";
pub const PORT_NAME_GRPC_PUBLIC: &str = "grpc-public";

/// `tempo-<instance>-<component>`
pub fn name(component: &str, instance: &str) -> String {
    format!("tempo-{instance}-{component}")
}

/// name of the shared config map
pub fn config_name(instance: &str) -> String {
    format!("tempo-{instance}")
}

pub fn default_service_account_name(instance: &str) -> String {
    format!("tempo-{instance}")
}

pub fn service_fqdn(namespace: &str, instance: &str, component: &str) -> String {
    format!("{}.{namespace}.svc.cluster.local", name(component, instance))
}

/// secret with the internal serving certificate of a component
pub fn tls_secret_name(component: &str, instance: &str) -> String {
    format!("{}-mtls", name(component, instance))
}

/// config map with the CA bundle injected by the platform
pub fn ca_bundle_name(instance: &str) -> String {
    name(CA_BUNDLE, instance)
}

/// host of the gateway route on an OpenShift cluster
pub fn gateway_route_host(namespace: &str, instance: &str, base_domain: &str) -> String {
    format!("{}-{namespace}.{base_domain}", name(GATEWAY, instance))
}

/// labels shared by every object of an instance, used as ownership selector
pub fn common_labels(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_owned(), APP_NAME.to_owned()),
        (LABEL_INSTANCE.to_owned(), instance.to_owned()),
        (LABEL_MANAGED_BY.to_owned(), MANAGED_BY.to_owned()),
    ])
}

pub fn component_labels(component: &str, instance: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels(instance);
    labels.insert(LABEL_COMPONENT.to_owned(), component.to_owned());
    labels
}

/// label selector string, `k=v` pairs joined by commas
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
