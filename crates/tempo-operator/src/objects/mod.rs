//!
//! # Managed objects
//!
//! Closed set of resource kinds the operator may own. Each kind is described once in
//! a kind indexed table which is used both to address the API server and to decide
//! whether a kind is listed at all (integration kinds are gated).
//!
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, GroupVersionKind};
use serde_json::Value;

use tempo_operator_metadata::config::FeatureGates;
use tempo_operator_metadata::integrations::{GrafanaDatasource, PrometheusRule, Route, ServiceMonitor};

/// Optional platform integration a kind depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integration {
    OpenShiftRoute,
    PrometheusOperator,
    GrafanaOperator,
}

impl Integration {
    pub fn enabled(&self, gates: &FeatureGates) -> bool {
        match self {
            Self::OpenShiftRoute => gates.openshift.openshift_route,
            Self::PrometheusOperator => gates.prometheus_operator,
            Self::GrafanaOperator => gates.grafana_operator,
        }
    }
}

#[derive(Debug)]
pub struct KindDescriptor {
    pub kind: ManagedKind,
    pub group: &'static str,
    pub version: &'static str,
    pub name: &'static str,
    pub plural: &'static str,
    pub gate: Option<Integration>,
}

impl KindDescriptor {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_owned()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

macro_rules! managed_objects {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// Kinds the operator can own
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum ManagedKind {
            $($variant),*
        }

        impl ManagedKind {
            pub const ALL: &'static [ManagedKind] = &[$(ManagedKind::$variant),*];
        }

        /// One desired or live object
        #[derive(Debug, Clone, PartialEq)]
        pub enum ManagedObject {
            $($variant($ty)),*
        }

        impl ManagedObject {
            pub fn kind(&self) -> ManagedKind {
                match self {
                    $(Self::$variant(_) => ManagedKind::$variant),*
                }
            }

            pub fn metadata(&self) -> &ObjectMeta {
                match self {
                    $(Self::$variant(obj) => &obj.metadata),*
                }
            }

            pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(Self::$variant(obj) => &mut obj.metadata),*
                }
            }

            /// wire form, including apiVersion and kind
            pub fn to_value(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(Self::$variant(obj) => serde_json::to_value(obj)),*
                }
            }

            pub fn from_value(kind: ManagedKind, value: Value) -> Result<Self, serde_json::Error> {
                match kind {
                    $(ManagedKind::$variant => serde_json::from_value::<$ty>(value).map(Self::$variant)),*
                }
            }
        }

        $(
            impl From<$ty> for ManagedObject {
                fn from(obj: $ty) -> Self {
                    Self::$variant(obj)
                }
            }
        )*
    };
}

managed_objects! {
    ConfigMap => ConfigMap,
    Secret => Secret,
    ServiceAccount => ServiceAccount,
    Service => Service,
    Deployment => Deployment,
    StatefulSet => StatefulSet,
    Ingress => Ingress,
    Route => Route,
    ServiceMonitor => ServiceMonitor,
    PrometheusRule => PrometheusRule,
    GrafanaDatasource => GrafanaDatasource,
}

/// indexed by `ManagedKind as usize`
static KINDS: [KindDescriptor; 11] = [
    KindDescriptor {
        kind: ManagedKind::ConfigMap,
        group: "",
        version: "v1",
        name: "ConfigMap",
        plural: "configmaps",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::Secret,
        group: "",
        version: "v1",
        name: "Secret",
        plural: "secrets",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::ServiceAccount,
        group: "",
        version: "v1",
        name: "ServiceAccount",
        plural: "serviceaccounts",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::Service,
        group: "",
        version: "v1",
        name: "Service",
        plural: "services",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::Deployment,
        group: "apps",
        version: "v1",
        name: "Deployment",
        plural: "deployments",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::StatefulSet,
        group: "apps",
        version: "v1",
        name: "StatefulSet",
        plural: "statefulsets",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::Ingress,
        group: "networking.k8s.io",
        version: "v1",
        name: "Ingress",
        plural: "ingresses",
        gate: None,
    },
    KindDescriptor {
        kind: ManagedKind::Route,
        group: "route.openshift.io",
        version: "v1",
        name: "Route",
        plural: "routes",
        gate: Some(Integration::OpenShiftRoute),
    },
    KindDescriptor {
        kind: ManagedKind::ServiceMonitor,
        group: "monitoring.coreos.com",
        version: "v1",
        name: "ServiceMonitor",
        plural: "servicemonitors",
        gate: Some(Integration::PrometheusOperator),
    },
    KindDescriptor {
        kind: ManagedKind::PrometheusRule,
        group: "monitoring.coreos.com",
        version: "v1",
        name: "PrometheusRule",
        plural: "prometheusrules",
        gate: Some(Integration::PrometheusOperator),
    },
    KindDescriptor {
        kind: ManagedKind::GrafanaDatasource,
        group: "grafana.integreatly.org",
        version: "v1beta1",
        name: "GrafanaDatasource",
        plural: "grafanadatasources",
        gate: Some(Integration::GrafanaOperator),
    },
];

impl ManagedKind {
    pub fn descriptor(self) -> &'static KindDescriptor {
        &KINDS[self as usize]
    }

    pub fn api_resource(self) -> ApiResource {
        let desc = self.descriptor();
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(desc.group, desc.version, desc.name),
            desc.plural,
        )
    }

    /// kinds which are listed for ownership under the given gates
    pub fn owned_kinds(gates: &FeatureGates) -> impl Iterator<Item = ManagedKind> + '_ {
        Self::ALL
            .iter()
            .copied()
            .filter(move |kind| kind.descriptor().gate.is_none_or(|gate| gate.enabled(gates)))
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().name)
    }
}

/// Identity of a managed object
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: ManagedKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ManagedKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl ManagedObject {
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind(), self.namespace(), self.name())
    }

    /// `Some(ready)` for workloads, `None` for everything else
    pub fn workload_ready(&self) -> Option<bool> {
        match self {
            Self::Deployment(deployment) => {
                let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0);
                Some(ready >= desired)
            }
            Self::StatefulSet(statefulset) => {
                let desired = statefulset.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = statefulset
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0);
                Some(ready >= desired)
            }
            _ => None,
        }
    }
}
