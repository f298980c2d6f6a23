use tokio_util::sync::CancellationToken;
use tracing::debug;

use tempo_operator_metadata::config::ProjectConfig;
use tempo_operator_metadata::quantity::bounded_quantity_value;
use tempo_operator_metadata::stack::{IngressType, TempoStack};

use crate::error::{AdmissionError, FieldError, PlatformError, ValidationErrors};
use crate::naming;
use crate::params::{validate_ca_config_map, validate_storage_secret, validate_tenant_configs};
use crate::platform::{Capabilities, Platform, cancellable};

const ROUTE_API: &str = "route.openshift.io";
const MONITORING_API: &str = "monitoring.coreos.com";
const GRAFANA_API: &str = "grafana.integreatly.org";

/// Rejects instances the operator could not run
pub struct Validator<'a> {
    platform: &'a dyn Platform,
    cancel: &'a CancellationToken,
    config: &'a ProjectConfig,
}

impl<'a> Validator<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        cancel: &'a CancellationToken,
        config: &'a ProjectConfig,
    ) -> Self {
        Self {
            platform,
            cancel,
            config,
        }
    }

    /// every problem found is reported in one error
    pub async fn validate(&self, stack: &TempoStack) -> Result<(), AdmissionError> {
        let name = stack.metadata.name.clone().unwrap_or_default();
        debug!(%name, "validate");

        let mut errors = Vec::new();
        errors.extend(self.validate_service_account(stack).await?);
        errors.extend(self.validate_storage(stack).await?);
        errors.extend(validate_replication_factor(stack));
        errors.extend(validate_resources(stack));
        errors.extend(self.validate_exposure(stack));
        errors.extend(validate_gateway(stack));
        errors.extend(validate_tenants(stack));
        errors.extend(self.validate_capabilities(stack).await?);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { name, errors }.into())
        }
    }

    async fn validate_service_account(
        &self,
        stack: &TempoStack,
    ) -> Result<Vec<FieldError>, PlatformError> {
        let name = stack.metadata.name.as_deref().unwrap_or_default();
        let account = &stack.spec.service_account;
        // the default account is created by the operator itself
        if account.is_empty() || *account == naming::default_service_account_name(name) {
            return Ok(Vec::new());
        }

        let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
        let found = cancellable(
            self.cancel,
            self.platform.get_service_account(namespace, account),
        )
        .await?;
        Ok(match found {
            Some(_) => Vec::new(),
            None => vec![FieldError::invalid(
                "spec.serviceAccount",
                account,
                format!("serviceaccounts \"{account}\" not found"),
            )],
        })
    }

    async fn validate_storage(&self, stack: &TempoStack) -> Result<Vec<FieldError>, PlatformError> {
        let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
        let secret_name = &stack.spec.storage.secret.name;

        let mut errors = match cancellable(
            self.cancel,
            self.platform.get_secret(namespace, secret_name),
        )
        .await?
        {
            Some(secret) => validate_storage_secret(stack, &secret),
            None => vec![FieldError::invalid(
                "spec.storage.secret",
                secret_name,
                format!("secrets \"{secret_name}\" not found"),
            )],
        };

        let ca_name = &stack.spec.storage.tls.ca;
        if !ca_name.is_empty() {
            match cancellable(self.cancel, self.platform.get_config_map(namespace, ca_name)).await? {
                Some(config_map) => errors.extend(validate_ca_config_map(stack, &config_map)),
                None => errors.push(FieldError::invalid(
                    "spec.storage.tls.caName",
                    ca_name,
                    format!("configmaps \"{ca_name}\" not found"),
                )),
            }
        }

        Ok(errors)
    }

    fn validate_exposure(&self, stack: &TempoStack) -> Vec<FieldError> {
        let template = &stack.spec.template;
        let jaeger = &template.query_frontend.jaeger_query;
        let path = "spec.template.queryFrontend.jaegerQuery.ingress.type";
        let route_gate = self.config.gates.openshift.openshift_route;
        let mut errors = Vec::new();

        if jaeger.ingress.type_ != IngressType::None && !jaeger.enabled {
            errors.push(FieldError::invalid(
                path,
                jaeger.ingress.type_.as_str(),
                "Ingress cannot be enabled if jaegerQuery is disabled",
            ));
        }
        if jaeger.ingress.type_ == IngressType::Route && !route_gate {
            errors.push(route_gate_error(path));
        }
        if template.gateway.ingress.type_ == IngressType::Route && !route_gate {
            errors.push(route_gate_error("spec.template.gateway.ingress.type"));
        }
        errors
    }

    /// integrations the instance asks for must be served by the cluster
    async fn validate_capabilities(
        &self,
        stack: &TempoStack,
    ) -> Result<Vec<FieldError>, PlatformError> {
        let spec = &stack.spec;
        let gates = &self.config.gates;

        let mut required = Vec::new();
        let routes = [
            (
                "spec.template.queryFrontend.jaegerQuery.ingress.type",
                spec.template.query_frontend.jaeger_query.ingress.type_,
            ),
            (
                "spec.template.gateway.ingress.type",
                spec.template.gateway.ingress.type_,
            ),
        ];
        for (path, type_) in routes {
            if type_ == IngressType::Route && gates.openshift.openshift_route {
                required.push((path, type_.as_str(), ROUTE_API));
            }
        }
        let metrics = &spec.observability.metrics;
        if metrics.create_service_monitors && gates.prometheus_operator {
            required.push((
                "spec.observability.metrics.createServiceMonitors",
                "true",
                MONITORING_API,
            ));
        }
        if metrics.create_prometheus_rules && gates.prometheus_operator {
            required.push((
                "spec.observability.metrics.createPrometheusRules",
                "true",
                MONITORING_API,
            ));
        }
        if spec.observability.grafana.create_datasource && gates.grafana_operator {
            required.push((
                "spec.observability.grafana.createDatasource",
                "true",
                GRAFANA_API,
            ));
        }

        if required.is_empty() {
            return Ok(Vec::new());
        }
        let capabilities: Capabilities =
            cancellable(self.cancel, self.platform.capabilities()).await?;
        Ok(required
            .into_iter()
            .filter(|(_, _, api)| !capabilities.has(api))
            .map(|(path, value, api)| {
                FieldError::invalid(path, value, format!("the {api} API is not available on this cluster"))
            })
            .collect())
    }
}

fn route_gate_error(path: &str) -> FieldError {
    FieldError::invalid(
        path,
        IngressType::Route.as_str(),
        "Please enable the featureGates.openshift.openshiftRoute feature gate to use Routes",
    )
}

/// ingesters must form a write quorum
fn validate_replication_factor(stack: &TempoStack) -> Vec<FieldError> {
    let factor = stack.spec.replication_factor;
    let replicas = stack.spec.template.ingester.replicas.unwrap_or(1);
    let quorum = factor / 2 + 1;
    if replicas < quorum {
        vec![FieldError::invalid(
            "spec.ReplicationFactor",
            factor,
            format!("replica factor of {factor} requires at least {quorum} ingester replicas"),
        )]
    } else {
        Vec::new()
    }
}

fn validate_resources(stack: &TempoStack) -> Vec<FieldError> {
    let Some(total) = &stack.spec.resources.total else {
        return Vec::new();
    };
    total
        .limits
        .iter()
        .flatten()
        .filter_map(|(resource, quantity)| {
            bounded_quantity_value(quantity).err().map(|err| {
                FieldError::invalid(
                    format!("spec.resources.total.limits.{resource}"),
                    &quantity.0,
                    err.to_string(),
                )
            })
        })
        .collect()
}

fn validate_gateway(stack: &TempoStack) -> Vec<FieldError> {
    let spec = &stack.spec;
    let gateway = &spec.template.gateway;
    if !gateway.enabled {
        return Vec::new();
    }

    let path = "spec.template.gateway.enabled";
    let mut errors = Vec::new();
    if !spec.template.query_frontend.jaeger_query.enabled {
        errors.push(FieldError::invalid(
            path,
            true,
            "gateway require enable jaeger query to work.",
        ));
    }
    if spec.tenants.is_none() {
        errors.push(FieldError::invalid(
            path,
            true,
            "to enable the gateway, please configure tenants",
        ));
    }
    errors
}

fn validate_tenants(stack: &TempoStack) -> Vec<FieldError> {
    let Some(tenants) = &stack.spec.tenants else {
        return Vec::new();
    };
    let mut errors = Vec::new();
    if let Err(detail) = validate_tenant_configs(Some(tenants)) {
        errors.push(FieldError::invalid("spec.tenants", format!("{:?}", tenants.mode), detail));
    }
    if !stack.spec.template.gateway.enabled {
        errors.push(FieldError::invalid(
            "spec.tenants",
            format!("{:?}", tenants.mode),
            "to use multitenancy, please enable the gateway",
        ));
    }
    errors
}

#[cfg(test)]
mod test {

    use std::collections::BTreeMap;

    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;

    use tempo_operator_metadata::stack::{AuthenticationSpec, ModeType, TenantsSpec};

    use crate::platform::MemoryPlatform;

    use super::*;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("observability".to_owned()),
            ..Default::default()
        }
    }

    fn storage_secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: meta("storage"),
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    fn valid_secret() -> Secret {
        storage_secret(&[
            ("endpoint", "http://minio:9000"),
            ("bucket", "tempo"),
            ("access_key_id", "id"),
            ("access_key_secret", "secret"),
        ])
    }

    fn stack() -> TempoStack {
        let mut stack = TempoStack::new("simplest", Default::default());
        stack.metadata.namespace = Some("observability".to_owned());
        stack.spec.storage.secret.name = "storage".to_owned();
        stack.spec.service_account = "tempo-simplest".to_owned();
        stack.spec.replication_factor = 1;
        stack
    }

    async fn validate(
        platform: &MemoryPlatform,
        config: &ProjectConfig,
        stack: &TempoStack,
    ) -> Vec<FieldError> {
        let cancel = CancellationToken::new();
        match Validator::new(platform, &cancel, config).validate(stack).await {
            Ok(()) => Vec::new(),
            Err(AdmissionError::Invalid(errors)) => errors.errors,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    fn details(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.detail.as_str()).collect()
    }

    #[tokio::test]
    async fn test_valid_stack() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;
        assert_eq!(validate(&platform, &ProjectConfig::default(), &stack()).await, vec![]);
    }

    #[tokio::test]
    async fn test_storage_secret_missing_keys() {
        let platform = MemoryPlatform::new();
        platform.insert(storage_secret(&[("unrelated", "x")])).await;
        let errors = validate(&platform, &ProjectConfig::default(), &stack()).await;
        assert_eq!(
            details(&errors),
            vec![
                "storage secret must contain \"endpoint\" field",
                "storage secret must contain \"bucket\" field",
                "storage secret must contain \"access_key_id\" field",
                "storage secret must contain \"access_key_secret\" field",
            ]
        );
        assert!(errors.iter().all(|e| e.path == "spec.storage.secret"));
    }

    #[tokio::test]
    async fn test_replication_factor() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;
        let config = ProjectConfig::default();

        for (replicas, valid) in [(1, false), (2, true), (3, true)] {
            let mut stack = stack();
            stack.spec.replication_factor = 3;
            stack.spec.template.ingester.replicas = Some(replicas);
            let errors = validate(&platform, &config, &stack).await;
            if valid {
                assert_eq!(errors, vec![]);
            } else {
                assert_eq!(
                    errors,
                    vec![FieldError::invalid(
                        "spec.ReplicationFactor",
                        3,
                        "replica factor of 3 requires at least 2 ingester replicas"
                    )]
                );
            }
        }
    }

    #[tokio::test]
    async fn test_ingress_and_route() {
        let platform = MemoryPlatform::new().with_api_groups([ROUTE_API]);
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        stack.spec.template.query_frontend.jaeger_query.ingress.type_ = IngressType::Ingress;
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(details(&errors), vec!["Ingress cannot be enabled if jaegerQuery is disabled"]);

        let jaeger = &mut stack.spec.template.query_frontend.jaeger_query;
        jaeger.enabled = true;
        jaeger.ingress.type_ = IngressType::Route;
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(
            details(&errors),
            vec!["Please enable the featureGates.openshift.openshiftRoute feature gate to use Routes"]
        );

        let mut config = ProjectConfig::default();
        config.gates.openshift.openshift_route = true;
        assert_eq!(validate(&platform, &config, &stack).await, vec![]);
    }

    #[tokio::test]
    async fn test_route_api_unavailable() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        let jaeger = &mut stack.spec.template.query_frontend.jaeger_query;
        jaeger.enabled = true;
        jaeger.ingress.type_ = IngressType::Route;
        let mut config = ProjectConfig::default();
        config.gates.openshift.openshift_route = true;

        let errors = validate(&platform, &config, &stack).await;
        assert_eq!(
            details(&errors),
            vec!["the route.openshift.io API is not available on this cluster"]
        );
    }

    #[tokio::test]
    async fn test_gateway() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        stack.spec.template.gateway.enabled = true;
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(
            details(&errors),
            vec![
                "gateway require enable jaeger query to work.",
                "to enable the gateway, please configure tenants",
            ]
        );

        stack.spec.template.query_frontend.jaeger_query.enabled = true;
        stack.spec.tenants = Some(TenantsSpec {
            mode: ModeType::OpenShift,
            authentication: vec![AuthenticationSpec {
                tenant_name: "dev".to_owned(),
                tenant_id: "1".to_owned(),
                oidc: None,
            }],
            authorization: None,
        });
        assert_eq!(validate(&platform, &ProjectConfig::default(), &stack).await, vec![]);
    }

    #[tokio::test]
    async fn test_tenants_need_gateway() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        stack.spec.tenants = Some(TenantsSpec {
            mode: ModeType::Static,
            authentication: Vec::new(),
            authorization: None,
        });
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(
            details(&errors),
            vec![
                "spec.tenants.authentication is required in static mode",
                "to use multitenancy, please enable the gateway",
            ]
        );
    }

    #[tokio::test]
    async fn test_custom_service_account() {
        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        stack.spec.service_account = "custom".to_owned();
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(details(&errors), vec!["serviceaccounts \"custom\" not found"]);

        platform
            .insert(ServiceAccount {
                metadata: meta("custom"),
                ..Default::default()
            })
            .await;
        assert_eq!(validate(&platform, &ProjectConfig::default(), &stack).await, vec![]);
    }

    #[tokio::test]
    async fn test_resource_budget_bounds() {
        use k8s_openapi::api::core::v1::ResourceRequirements;
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

        let platform = MemoryPlatform::new();
        platform.insert(valid_secret()).await;

        let mut stack = stack();
        stack.spec.resources.total = Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_owned(), Quantity("2".to_owned())),
                ("memory".to_owned(), Quantity("1E".to_owned())),
            ])),
            ..Default::default()
        });
        let errors = validate(&platform, &ProjectConfig::default(), &stack).await;
        assert_eq!(details(&errors), vec!["quantity '1E' is out of range"]);
        assert_eq!(errors[0].path, "spec.resources.total.limits.memory");

        stack.spec.resources.total = Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_owned(), Quantity("2".to_owned())),
                ("memory".to_owned(), Quantity("8Gi".to_owned())),
            ])),
            ..Default::default()
        });
        assert_eq!(validate(&platform, &ProjectConfig::default(), &stack).await, vec![]);
    }
}
