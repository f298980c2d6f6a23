//! Building blocks shared by every pod the operator runs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, HTTPGetAction, PodAffinityTerm, PodAntiAffinity, PodSpec, Probe,
    SeccompProfile, SecretKeySelector, SecretVolumeSource, SecurityContext, ServicePort, Volume,
    VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use tempo_operator_metadata::stack::{TempoComponentSpec, TlsSpec};

use crate::params::StorageParams;
use crate::templates::DATA_DIR;

pub(super) const CONFIG_VOLUME: &str = "tempo-conf";
pub(super) const STORAGE_VOLUME: &str = "tempo-tmp-storage";
pub(super) const GCS_SECRET_VOLUME: &str = "storage-gcs-credentials";
pub(super) const GCS_SECRET_DIR: &str = "/etc/storage/secrets";

pub(super) const READINESS_PATH: &str = "/ready";
const TCP: &str = "TCP";

pub(super) fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_owned()),
        container_port: port,
        protocol: Some(TCP.to_owned()),
        ..Default::default()
    }
}

/// service port targeting the container port of the same name
pub(super) fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        protocol: Some(TCP.to_owned()),
        target_port: Some(IntOrString::String(name.to_owned())),
        ..Default::default()
    }
}

pub(super) fn readiness_probe(path: &str, port: IntOrString, https: bool) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_owned()),
            port,
            scheme: https.then(|| "HTTPS".to_owned()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(15),
        timeout_seconds: Some(1),
        ..Default::default()
    }
}

/// restricted container security context
pub(super) fn container_security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_owned()]),
            ..Default::default()
        }),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(true),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// spread replicas of a component across nodes
pub(super) fn default_affinity(labels: &BTreeMap<String, String>) -> Affinity {
    let term = |topology_key: &str, weight: i32| WeightedPodAffinityTerm {
        weight,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            }),
            topology_key: topology_key.to_owned(),
            ..Default::default()
        },
    };
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                term("failure-domain.beta.kubernetes.io/zone", 100),
                term("kubernetes.io/hostname", 75),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_owned(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_owned()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub(super) fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_owned(),
        mount_path: path.to_owned(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

/// mount a config map into one container of a pod
pub(super) fn mount_config_map(pod: &mut PodSpec, container: usize, config_map: &str, dir: &str) {
    let volume = push_volume(pod, config_map_volume(config_map, config_map));
    add_mount(pod, container, &volume, dir);
}

/// mount a secret into one container of a pod
pub(super) fn mount_secret(pod: &mut PodSpec, container: usize, secret: &str, dir: &str) {
    let volume = push_volume(pod, secret_volume(secret, secret));
    add_mount(pod, container, &volume, dir);
}

/// CA config map and certificate secret of a TLS setting
pub(super) fn mount_tls_spec(
    pod: &mut PodSpec,
    container: usize,
    tls: &TlsSpec,
    ca_dir: &str,
    cert_dir: &str,
) {
    if !tls.ca.is_empty() {
        mount_config_map(pod, container, &tls.ca, ca_dir);
    }
    if !tls.cert.is_empty() {
        mount_secret(pod, container, &tls.cert, cert_dir);
    }
}

fn add_mount(pod: &mut PodSpec, container: usize, volume: &str, dir: &str) {
    if let Some(container) = pod.containers.get_mut(container) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(mount(volume, dir, true));
    }
}

/// add `volume` unless the pod has it already, returning the name to mount
///
/// The same config map or secret may back several mounts. A config map and a
/// secret sharing a name get distinct volumes.
fn push_volume(pod: &mut PodSpec, mut volume: Volume) -> String {
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    if volumes
        .iter()
        .any(|existing| existing.name == volume.name && !same_source(existing, &volume))
    {
        volume.name = format!("{}-{}", volume.name, source_kind(&volume));
    }
    let name = volume.name.clone();
    if !volumes.iter().any(|existing| existing.name == name) {
        volumes.push(volume);
    }
    name
}

fn same_source(a: &Volume, b: &Volume) -> bool {
    a.config_map == b.config_map && a.secret == b.secret && a.empty_dir == b.empty_dir
}

fn source_kind(volume: &Volume) -> &'static str {
    if volume.secret.is_some() {
        "secret"
    } else if volume.config_map.is_some() {
        "configmap"
    } else {
        "volume"
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// pass object storage credentials to a Tempo container
///
/// Returns extra arguments the container needs.
pub(super) fn configure_storage(
    pod: &mut PodSpec,
    container: usize,
    storage: &StorageParams,
    secret: &str,
) -> Vec<String> {
    let mut args = Vec::new();
    let env = match storage {
        StorageParams::S3(_) => vec![
            secret_env("AWS_ACCESS_KEY_ID", secret, "access_key_id"),
            secret_env("AWS_SECRET_ACCESS_KEY", secret, "access_key_secret"),
        ],
        StorageParams::Azure(_) => {
            args.push("-config.expand-env=true".to_owned());
            vec![secret_env("AZURE_STORAGE_KEY", secret, "account_key")]
        }
        StorageParams::Gcs(_) => {
            mount_secret_as(pod, container, GCS_SECRET_VOLUME, secret, GCS_SECRET_DIR);
            vec![EnvVar {
                name: "GOOGLE_APPLICATION_CREDENTIALS".to_owned(),
                value: Some(format!("{GCS_SECRET_DIR}/key.json")),
                ..Default::default()
            }]
        }
    };
    if let Some(container) = pod.containers.get_mut(container) {
        container.env.get_or_insert_with(Vec::new).extend(env);
    }
    args
}

fn mount_secret_as(pod: &mut PodSpec, container: usize, volume: &str, secret: &str, dir: &str) {
    let volume = push_volume(pod, secret_volume(volume, secret));
    add_mount(pod, container, &volume, dir);
}

/// pod spec scheduling fields taken from a component
pub(super) fn scheduled_pod(
    component: &TempoComponentSpec,
    service_account: &str,
    labels: &BTreeMap<String, String>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> PodSpec {
    PodSpec {
        service_account_name: Some(service_account.to_owned()),
        node_selector: (!component.node_selector.is_empty())
            .then(|| component.node_selector.clone()),
        tolerations: (!component.tolerations.is_empty()).then(|| component.tolerations.clone()),
        affinity: Some(default_affinity(labels)),
        containers,
        volumes: Some(volumes),
        ..Default::default()
    }
}

/// data directory mount of a Tempo container
pub(super) fn data_mount(volume: &str) -> VolumeMount {
    mount(volume, DATA_DIR, false)
}
