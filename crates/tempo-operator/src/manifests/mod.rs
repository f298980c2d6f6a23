//!
//! # Manifest builder
//!
//! Computes the complete desired object set of one instance from its resolved
//! parameters and rendered configuration. Building is a pure function: the same
//! inputs always give the same objects in the same order, which keeps the diff of
//! an unchanged instance empty.
//!
mod exposure;
mod gateway;
mod observability;
mod pod;
mod resources;
mod tempo;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{debug, instrument};

use tempo_operator_metadata::config::FeatureGates;
use tempo_operator_metadata::stack::TempoStackSpec;

use crate::converge::owner_reference;
use crate::error::ManifestError;
use crate::naming;
use crate::objects::ManagedObject;
use crate::params::Params;
use crate::templates::ConfigFiles;

/// annotation asking the platform to issue a serving certificate into a secret
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";
/// annotation asking the platform to inject its CA bundle into a config map
pub const INJECT_CA_BUNDLE_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

/// Everything shared by the builders of one instance
struct Context<'a> {
    params: &'a Params,
    spec: &'a TempoStackSpec,
    instance: &'a str,
    namespace: &'a str,
    gates: &'a FeatureGates,
    config_hash: &'a str,
}

impl<'a> Context<'a> {
    fn new(params: &'a Params, config: &'a ConfigFiles) -> Self {
        Self {
            params,
            spec: &params.stack.spec,
            instance: params.instance(),
            namespace: params.namespace(),
            gates: &params.config.gates,
            config_hash: &config.hash,
        }
    }

    fn meta(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.to_owned()),
            labels: Some(labels),
            ..Default::default()
        }
    }

    fn name(&self, component: &str) -> String {
        naming::name(component, self.instance)
    }

    fn labels(&self, component: &str) -> BTreeMap<String, String> {
        naming::component_labels(component, self.instance)
    }

    fn service_account(&self) -> String {
        if self.spec.service_account.is_empty() {
            naming::default_service_account_name(self.instance)
        } else {
            self.spec.service_account.clone()
        }
    }

    /// components talk to each other over TLS
    fn internal_tls(&self) -> bool {
        self.gates.http_encryption || self.gates.grpc_encryption
    }

    /// the platform issues the internal certificates
    fn serving_certs(&self) -> bool {
        self.internal_tls() && self.gates.openshift.serving_certs_service
    }
}

/// desired object set of an instance
#[instrument(skip_all, fields(tempo = %params.instance()))]
pub fn build(
    params: &Params,
    config: &ConfigFiles,
    gateway_config: Option<&ConfigFiles>,
) -> Result<Vec<ManagedObject>, ManifestError> {
    let ctx = Context::new(params, config);
    let mut objects = Vec::new();

    if ctx.service_account() == naming::default_service_account_name(ctx.instance) {
        objects.push(ManagedObject::from(ServiceAccount {
            metadata: ctx.meta(ctx.service_account(), naming::common_labels(ctx.instance)),
            ..Default::default()
        }));
    }

    objects.push(ManagedObject::from(ConfigMap {
        metadata: ctx.meta(
            naming::config_name(ctx.instance),
            naming::common_labels(ctx.instance),
        ),
        data: Some(config.data.clone()),
        ..Default::default()
    }));

    objects.extend(tempo::distributor(&ctx)?);
    objects.extend(tempo::ingester(&ctx)?);
    objects.extend(tempo::compactor(&ctx)?);
    objects.extend(tempo::querier(&ctx)?);
    objects.extend(tempo::query_frontend(&ctx)?);
    objects.push(tempo::gossip_ring(&ctx));

    if ctx.spec.template.gateway.enabled {
        let gateway_config = gateway_config.ok_or(ManifestError::MissingGatewayConfig)?;
        objects.extend(gateway::gateway(&ctx, gateway_config)?);
        objects.extend(exposure::gateway(&ctx));
    } else {
        objects.extend(exposure::jaeger_query(&ctx));
    }

    if ctx.serving_certs() {
        objects.push(tempo::ca_bundle(&ctx));
    }

    objects.extend(observability::build(&ctx)?);

    if let Some(owner) = owner_reference(&params.stack) {
        for object in &mut objects {
            object.metadata_mut().owner_references = Some(vec![owner.clone()]);
        }
    }

    debug!(objects = objects.len(), "manifests built");
    Ok(objects)
}
