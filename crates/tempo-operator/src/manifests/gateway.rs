use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use tempo_operator_metadata::stack::ModeType;

use crate::error::ManifestError;
use crate::naming::{self, *};
use crate::objects::ManagedObject;
use crate::templates::{
    CONFIG_HASH_ANNOTATION, ConfigFiles, GATEWAY_RBAC, GATEWAY_TENANTS, INTERNAL_TLS_CA_DIR,
    INTERNAL_TLS_CERT_DIR,
};

use super::pod::{self, container_port, service_port};
use super::resources::resources;
use super::{Context, SERVING_CERT_ANNOTATION};

const GATEWAY_CONTAINER: &str = "tempo-gateway";
const OPA_CONTAINER: &str = "tempo-gateway-opa";
const RBAC_VOLUME: &str = "rbac";
const TENANTS_VOLUME: &str = "tenants";
const RBAC_DIR: &str = "/etc/tempo-gateway/cm";
const TENANTS_DIR: &str = "/etc/tempo-gateway/secret";
const PORT_NAME_OPA: &str = "opa";
const OPA_PACKAGE: &str = "tempostack";
const OPA_ADMIN_GROUPS: &str = "system:cluster-admins,cluster-admin,dedicated-admin";

fn gateway_args(ctx: &Context<'_>) -> Vec<String> {
    let distributor = naming::service_fqdn(ctx.namespace, ctx.instance, DISTRIBUTOR);
    let frontend = naming::service_fqdn(ctx.namespace, ctx.instance, QUERY_FRONTEND);
    let mut args = vec![
        format!("--traces.tenant-header={}", crate::templates::TENANT_HEADER),
        format!("--web.listen=0.0.0.0:{PORT_GATEWAY_HTTP}"),
        format!("--web.internal.listen=0.0.0.0:{PORT_GATEWAY_INTERNAL}"),
        format!("--traces.write.endpoint={distributor}:{PORT_OTLP_GRPC}"),
        format!("--traces.read.endpoint=http://{frontend}:{PORT_JAEGER_UI}"),
        format!("--grpc.listen=0.0.0.0:{PORT_GATEWAY_GRPC}"),
        format!("--rbac.config={RBAC_DIR}/{GATEWAY_RBAC}"),
        format!("--tenants.config={TENANTS_DIR}/{GATEWAY_TENANTS}"),
        "--log.level=info".to_owned(),
    ];
    if ctx.internal_tls() {
        args.extend([
            format!("--traces.tls.ca-file={INTERNAL_TLS_CA_DIR}/{}", crate::templates::TLS_CA_FILENAME),
            format!("--traces.tls.cert-file={INTERNAL_TLS_CERT_DIR}/{}", crate::templates::TLS_CERT_FILENAME),
            format!("--traces.tls.key-file={INTERNAL_TLS_CERT_DIR}/{}", crate::templates::TLS_KEY_FILENAME),
        ]);
    }
    args
}

fn opa_container(ctx: &Context<'_>) -> Container {
    let mut args = vec![
        "--log.level=warn".to_owned(),
        format!("--opa.admin-groups={OPA_ADMIN_GROUPS}"),
        format!("--web.listen=:{PORT_OPA}"),
        format!("--web.internal.listen=:{}", PORT_OPA + 1),
        format!("--web.healthchecks.url=http://localhost:{PORT_OPA}"),
        format!("--opa.package={OPA_PACKAGE}"),
    ];
    if let Some(tenants) = &ctx.spec.tenants {
        args.extend(tenants.authentication.iter().map(|tenant| {
            format!(
                "--openshift.mappings={}={}",
                tenant.tenant_name,
                tempo_operator_metadata::GROUP
            )
        }));
    }
    Container {
        name: OPA_CONTAINER.to_owned(),
        image: Some(ctx.spec.images.tempo_gateway_opa.clone()),
        args: Some(args),
        ports: Some(vec![container_port(PORT_NAME_OPA, PORT_OPA)]),
        security_context: Some(pod::container_security_context()),
        ..Default::default()
    }
}

/// gateway deployment, service and configuration
pub(super) fn gateway(
    ctx: &Context<'_>,
    config: &ConfigFiles,
) -> Result<Vec<ManagedObject>, ManifestError> {
    let spec = &ctx.spec.template.gateway;
    let labels = ctx.labels(GATEWAY);
    let name = ctx.name(GATEWAY);

    let gateway = Container {
        name: GATEWAY_CONTAINER.to_owned(),
        image: Some(ctx.spec.images.tempo_gateway.clone()),
        args: Some(gateway_args(ctx)),
        ports: Some(vec![
            container_port(PORT_NAME_PUBLIC, PORT_GATEWAY_HTTP),
            container_port(PORT_NAME_INTERNAL, PORT_GATEWAY_INTERNAL),
            container_port(PORT_NAME_GRPC_PUBLIC, PORT_GATEWAY_GRPC),
        ]),
        readiness_probe: Some(pod::readiness_probe(
            "/ready",
            IntOrString::String(PORT_NAME_INTERNAL.to_owned()),
            false,
        )),
        liveness_probe: Some(pod::readiness_probe(
            "/live",
            IntOrString::String(PORT_NAME_INTERNAL.to_owned()),
            false,
        )),
        resources: resources(ctx.spec, GATEWAY, spec.component.resources.as_ref())?,
        security_context: Some(pod::container_security_context()),
        volume_mounts: Some(vec![
            pod::mount(RBAC_VOLUME, RBAC_DIR, true),
            pod::mount(TENANTS_VOLUME, TENANTS_DIR, true),
        ]),
        ..Default::default()
    };

    let mut containers = vec![gateway];
    if ctx.spec.tenant_mode() == Some(ModeType::OpenShift) {
        containers.push(opa_container(ctx));
    }

    let mut pod = pod::scheduled_pod(
        &spec.component,
        &ctx.service_account(),
        &labels,
        containers,
        vec![
            pod::config_map_volume(RBAC_VOLUME, &name),
            pod::secret_volume(TENANTS_VOLUME, &name),
        ],
    );
    if ctx.internal_tls() {
        pod::mount_config_map(&mut pod, 0, &naming::ca_bundle_name(ctx.instance), INTERNAL_TLS_CA_DIR);
        pod::mount_secret(
            &mut pod,
            0,
            &naming::tls_secret_name(GATEWAY, ctx.instance),
            INTERNAL_TLS_CERT_DIR,
        );
    }

    let deployment = Deployment {
        metadata: ctx.meta(name.clone(), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.component.replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    annotations: Some(BTreeMap::from([(
                        CONFIG_HASH_ANNOTATION.to_owned(),
                        config.hash.clone(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut service_meta = ctx.meta(name.clone(), labels.clone());
    if ctx.serving_certs() {
        service_meta.annotations = Some(BTreeMap::from([(
            SERVING_CERT_ANNOTATION.to_owned(),
            naming::tls_secret_name(GATEWAY, ctx.instance),
        )]));
    }
    let service = k8s_openapi::api::core::v1::Service {
        metadata: service_meta,
        spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
            ports: Some(vec![
                service_port(PORT_NAME_PUBLIC, PORT_GATEWAY_HTTP),
                service_port(PORT_NAME_INTERNAL, PORT_GATEWAY_INTERNAL),
                service_port(PORT_NAME_GRPC_PUBLIC, PORT_GATEWAY_GRPC),
            ]),
            selector: Some(labels.clone()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let rbac = ConfigMap {
        metadata: ctx.meta(name.clone(), labels.clone()),
        data: Some(
            config
                .get(GATEWAY_RBAC)
                .map(|rbac| BTreeMap::from([(GATEWAY_RBAC.to_owned(), rbac.to_owned())]))
                .unwrap_or_default(),
        ),
        ..Default::default()
    };

    // tenants carry client secrets, so they live in a secret
    let tenants = Secret {
        metadata: ctx.meta(name, labels),
        data: Some(
            config
                .get(GATEWAY_TENANTS)
                .map(|tenants| {
                    BTreeMap::from([(
                        GATEWAY_TENANTS.to_owned(),
                        ByteString(tenants.as_bytes().to_vec()),
                    )])
                })
                .unwrap_or_default(),
        ),
        ..Default::default()
    };

    Ok(vec![
        ManagedObject::from(deployment),
        ManagedObject::from(service),
        ManagedObject::from(rbac),
        ManagedObject::from(tenants),
    ])
}
