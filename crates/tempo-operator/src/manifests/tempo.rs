use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use tempo_operator_metadata::stack::TempoComponentSpec;

use crate::error::ManifestError;
use crate::naming::{self, *};
use crate::objects::ManagedObject;
use crate::templates::{
    CONFIG_DIR, CONFIG_HASH_ANNOTATION, INTERNAL_TLS_CA_DIR, INTERNAL_TLS_CERT_DIR,
    RECEIVER_TLS_CA_DIR, RECEIVER_TLS_CERT_DIR, STORAGE_TLS_CA_DIR, STORAGE_TLS_CERT_DIR,
    TEMPO_CONFIG, TEMPO_QUERY_CONFIG, TEMPO_QUERY_FRONTEND_CONFIG,
};

use super::pod::{self, container_port, service_port};
use super::resources::resources;
use super::{Context, INJECT_CA_BUNDLE_ANNOTATION, SERVING_CERT_ANNOTATION};

const TEMPO_CONTAINER: &str = "tempo";
const TEMPO_QUERY_CONTAINER: &str = "tempo-query";
const DATA_VOLUME: &str = "data";
const DEFAULT_STORAGE_SIZE: &str = "10Gi";

/// How one Tempo component runs
struct Component<'a> {
    name: &'static str,
    spec: &'a TempoComponentSpec,
    config_file: &'static str,
    ports: Vec<ContainerPort>,
    /// joins the memberlist ring
    ring_member: bool,
    /// reads or writes the object storage
    storage: bool,
}

fn tempo_container(
    ctx: &Context<'_>,
    component: &Component<'_>,
) -> Result<Container, ManifestError> {
    let probe_port = if ctx.gates.http_encryption {
        IntOrString::Int(PORT_INTERNAL_HTTP)
    } else {
        IntOrString::String(PORT_NAME_HTTP.to_owned())
    };
    Ok(Container {
        name: TEMPO_CONTAINER.to_owned(),
        image: Some(ctx.spec.images.tempo.clone()),
        args: Some(vec![
            format!("-target={}", component.name),
            format!("-config.file={CONFIG_DIR}/{}", component.config_file),
        ]),
        ports: Some(component.ports.clone()),
        readiness_probe: Some(pod::readiness_probe(pod::READINESS_PATH, probe_port, false)),
        resources: resources(ctx.spec, component.name, component.spec.resources.as_ref())?,
        security_context: Some(pod::container_security_context()),
        volume_mounts: Some(vec![
            pod::mount(pod::CONFIG_VOLUME, CONFIG_DIR, true),
            pod::data_mount(if component.name == INGESTER {
                DATA_VOLUME
            } else {
                pod::STORAGE_VOLUME
            }),
        ]),
        ..Default::default()
    })
}

/// pod template of a Tempo component, with every mount its features need
fn tempo_pod(
    ctx: &Context<'_>,
    component: &Component<'_>,
    mut containers: Vec<Container>,
) -> Result<PodTemplateSpec, ManifestError> {
    let labels = ctx.labels(component.name);
    containers.insert(0, tempo_container(ctx, component)?);

    let mut volumes = vec![pod::config_map_volume(
        pod::CONFIG_VOLUME,
        &naming::config_name(ctx.instance),
    )];
    if component.name != INGESTER {
        volumes.push(pod::empty_dir_volume(pod::STORAGE_VOLUME));
    }
    let mut pod = pod::scheduled_pod(
        component.spec,
        &ctx.service_account(),
        &labels,
        containers,
        volumes,
    );

    if component.storage {
        let extra_args = pod::configure_storage(
            &mut pod,
            0,
            &ctx.params.storage,
            &ctx.spec.storage.secret.name,
        );
        append_args(&mut pod, extra_args);
        let storage_tls = &ctx.spec.storage.tls;
        if storage_tls.enabled {
            pod::mount_tls_spec(&mut pod, 0, storage_tls, STORAGE_TLS_CA_DIR, STORAGE_TLS_CERT_DIR);
        }
    }

    if component.name == DISTRIBUTOR {
        let receiver_tls = &ctx.spec.template.distributor.tls;
        if receiver_tls.enabled {
            pod::mount_tls_spec(
                &mut pod,
                0,
                receiver_tls,
                RECEIVER_TLS_CA_DIR,
                RECEIVER_TLS_CERT_DIR,
            );
        }
    }

    if ctx.internal_tls() {
        pod::mount_config_map(
            &mut pod,
            0,
            &naming::ca_bundle_name(ctx.instance),
            INTERNAL_TLS_CA_DIR,
        );
        pod::mount_secret(
            &mut pod,
            0,
            &naming::tls_secret_name(component.name, ctx.instance),
            INTERNAL_TLS_CERT_DIR,
        );
    }

    let mut pod_labels = labels;
    if component.ring_member {
        pod_labels.insert(LABEL_GOSSIP_MEMBER.to_owned(), "true".to_owned());
    }
    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_owned(),
                ctx.config_hash.to_owned(),
            )])),
            ..Default::default()
        }),
        spec: Some(pod),
    })
}

fn append_args(pod: &mut PodSpec, extra: Vec<String>) {
    if extra.is_empty() {
        return;
    }
    if let Some(container) = pod.containers.first_mut() {
        container.args.get_or_insert_with(Vec::new).extend(extra);
    }
}

fn selector(labels: BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    }
}

fn deployment(
    ctx: &Context<'_>,
    component: &Component<'_>,
    extra_containers: Vec<Container>,
) -> Result<ManagedObject, ManifestError> {
    let labels = ctx.labels(component.name);
    Ok(ManagedObject::from(Deployment {
        metadata: ctx.meta(ctx.name(component.name), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(component.spec.replicas.unwrap_or(1)),
            selector: selector(labels),
            template: tempo_pod(ctx, component, extra_containers)?,
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// service of a component, annotated for a serving certificate when the platform issues them
fn service(ctx: &Context<'_>, component: &str, ports: Vec<ServicePort>) -> ManagedObject {
    let labels = ctx.labels(component);
    let mut metadata = ctx.meta(ctx.name(component), labels.clone());
    if ctx.serving_certs() {
        metadata.annotations = Some(BTreeMap::from([(
            SERVING_CERT_ANNOTATION.to_owned(),
            naming::tls_secret_name(component, ctx.instance),
        )]));
    }
    ManagedObject::from(Service {
        metadata,
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(labels),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub(super) fn distributor(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let component = Component {
        name: DISTRIBUTOR,
        spec: &ctx.spec.template.distributor.component,
        config_file: TEMPO_CONFIG,
        ports: vec![
            container_port(PORT_NAME_OTLP_GRPC, PORT_OTLP_GRPC),
            container_port(PORT_NAME_OTLP_HTTP, PORT_OTLP_HTTP),
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port(PORT_NAME_MEMBERLIST, PORT_MEMBERLIST),
        ],
        ring_member: true,
        storage: false,
    };
    Ok(vec![
        deployment(ctx, &component, Vec::new())?,
        service(
            ctx,
            DISTRIBUTOR,
            vec![
                service_port(PORT_NAME_OTLP_GRPC, PORT_OTLP_GRPC),
                service_port(PORT_NAME_OTLP_HTTP, PORT_OTLP_HTTP),
                service_port(PORT_NAME_HTTP, PORT_HTTP),
            ],
        ),
    ])
}

pub(super) fn ingester(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let component = Component {
        name: INGESTER,
        spec: &ctx.spec.template.ingester,
        config_file: TEMPO_CONFIG,
        ports: vec![
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port(PORT_NAME_GRPC, PORT_GRPC),
            container_port(PORT_NAME_MEMBERLIST, PORT_MEMBERLIST),
        ],
        ring_member: true,
        storage: true,
    };
    let labels = ctx.labels(INGESTER);
    let storage_size = ctx
        .spec
        .storage_size
        .clone()
        .unwrap_or_else(|| Quantity(DEFAULT_STORAGE_SIZE.to_owned()));

    let statefulset = StatefulSet {
        metadata: ctx.meta(ctx.name(INGESTER), labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(component.spec.replicas.unwrap_or(1)),
            service_name: ctx.name(INGESTER),
            pod_management_policy: Some("Parallel".to_owned()),
            selector: selector(labels.clone()),
            template: tempo_pod(ctx, &component, Vec::new())?,
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME.to_owned()),
                    labels: Some(labels),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([("storage".to_owned(), storage_size)])),
                        ..Default::default()
                    }),
                    storage_class_name: ctx.spec.storage_class_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(vec![
        ManagedObject::from(statefulset),
        service(
            ctx,
            INGESTER,
            vec![
                service_port(PORT_NAME_HTTP, PORT_HTTP),
                service_port(PORT_NAME_GRPC, PORT_GRPC),
            ],
        ),
    ])
}

pub(super) fn compactor(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let component = Component {
        name: COMPACTOR,
        spec: &ctx.spec.template.compactor,
        config_file: TEMPO_CONFIG,
        ports: vec![
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port(PORT_NAME_MEMBERLIST, PORT_MEMBERLIST),
        ],
        ring_member: true,
        storage: true,
    };
    Ok(vec![
        deployment(ctx, &component, Vec::new())?,
        service(
            ctx,
            COMPACTOR,
            vec![
                service_port(PORT_NAME_HTTP, PORT_HTTP),
                service_port(PORT_NAME_MEMBERLIST, PORT_MEMBERLIST),
            ],
        ),
    ])
}

pub(super) fn querier(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let component = Component {
        name: QUERIER,
        spec: &ctx.spec.template.querier,
        config_file: TEMPO_CONFIG,
        ports: vec![
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port(PORT_NAME_GRPC, PORT_GRPC),
            container_port(PORT_NAME_MEMBERLIST, PORT_MEMBERLIST),
        ],
        ring_member: true,
        storage: true,
    };
    Ok(vec![
        deployment(ctx, &component, Vec::new())?,
        service(
            ctx,
            QUERIER,
            vec![
                service_port(PORT_NAME_HTTP, PORT_HTTP),
                service_port(PORT_NAME_GRPC, PORT_GRPC),
            ],
        ),
    ])
}

/// the Jaeger query UI runs as a sidecar of the query frontend
fn jaeger_query_container(ctx: &Context<'_>) -> Container {
    Container {
        name: TEMPO_QUERY_CONTAINER.to_owned(),
        image: Some(ctx.spec.images.tempo_query.clone()),
        args: Some(vec![
            "--query.base-path=/".to_owned(),
            format!("--grpc-storage-plugin.configuration-file={CONFIG_DIR}/{TEMPO_QUERY_CONFIG}"),
            "--query.bearer-token-propagation=true".to_owned(),
        ]),
        ports: Some(vec![
            container_port(PORT_NAME_JAEGER_GRPC, PORT_JAEGER_GRPC),
            container_port(PORT_NAME_JAEGER_UI, PORT_JAEGER_UI),
            container_port(PORT_NAME_JAEGER_METRICS, PORT_JAEGER_METRICS),
        ]),
        security_context: Some(pod::container_security_context()),
        volume_mounts: Some(vec![
            pod::mount(pod::CONFIG_VOLUME, CONFIG_DIR, true),
            pod::data_mount(pod::STORAGE_VOLUME),
        ]),
        ..Default::default()
    }
}

pub(super) fn query_frontend(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let jaeger = ctx.spec.template.query_frontend.jaeger_query.enabled;
    let component = Component {
        name: QUERY_FRONTEND,
        spec: &ctx.spec.template.query_frontend.component,
        config_file: TEMPO_QUERY_FRONTEND_CONFIG,
        ports: vec![
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port(PORT_NAME_GRPC, PORT_GRPC),
        ],
        ring_member: false,
        storage: true,
    };
    let sidecars = if jaeger {
        vec![jaeger_query_container(ctx)]
    } else {
        Vec::new()
    };

    let mut ports = vec![
        service_port(PORT_NAME_HTTP, PORT_HTTP),
        service_port(PORT_NAME_GRPC, PORT_GRPC),
    ];
    if jaeger {
        ports.extend([
            service_port(PORT_NAME_JAEGER_GRPC, PORT_JAEGER_GRPC),
            service_port(PORT_NAME_JAEGER_UI, PORT_JAEGER_UI),
            service_port(PORT_NAME_JAEGER_METRICS, PORT_JAEGER_METRICS),
        ]);
    }

    let labels = ctx.labels(QUERY_FRONTEND);
    let discovery = Service {
        metadata: ctx.meta(
            ctx.name(QUERY_FRONTEND_DISCOVERY),
            ctx.labels(QUERY_FRONTEND_DISCOVERY),
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_owned()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![
                service_port(PORT_NAME_HTTP, PORT_HTTP),
                service_port(PORT_NAME_GRPC, PORT_GRPC),
            ]),
            selector: Some(labels),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(vec![
        deployment(ctx, &component, sidecars)?,
        service(ctx, QUERY_FRONTEND, ports),
        ManagedObject::from(discovery),
    ])
}

/// headless service every ring member joins through
pub(super) fn gossip_ring(ctx: &Context<'_>) -> ManagedObject {
    let mut selector = naming::common_labels(ctx.instance);
    selector.insert(LABEL_GOSSIP_MEMBER.to_owned(), "true".to_owned());
    ManagedObject::from(Service {
        metadata: ctx.meta(ctx.name(GOSSIP_RING), ctx.labels(GOSSIP_RING)),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_owned()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME_MEMBERLIST.to_owned()),
                port: PORT_MEMBERLIST,
                protocol: Some("TCP".to_owned()),
                target_port: Some(IntOrString::String(PORT_NAME_MEMBERLIST.to_owned())),
                ..Default::default()
            }]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// config map the platform fills with its service CA
pub(super) fn ca_bundle(ctx: &Context<'_>) -> ManagedObject {
    let mut metadata = ctx.meta(
        naming::ca_bundle_name(ctx.instance),
        naming::common_labels(ctx.instance),
    );
    metadata.annotations = Some(BTreeMap::from([(
        INJECT_CA_BUNDLE_ANNOTATION.to_owned(),
        "true".to_owned(),
    )]));
    ManagedObject::from(ConfigMap {
        metadata,
        ..Default::default()
    })
}
