//! Ingress and Route objects exposing the query UI or the gateway.

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec as K8IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use tempo_operator_metadata::integrations::{
    Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
};
use tempo_operator_metadata::stack::{IngressSpec, IngressType, TlsRouteTerminationType};

use crate::naming::{GATEWAY, PORT_NAME_JAEGER_UI, PORT_NAME_PUBLIC, QUERY_FRONTEND};
use crate::objects::ManagedObject;

use super::Context;

/// Ingress or Route for the Jaeger UI, when requested
pub(super) fn jaeger_query(ctx: &Context<'_>) -> Option<ManagedObject> {
    let jaeger = &ctx.spec.template.query_frontend.jaeger_query;
    if !jaeger.enabled {
        return None;
    }
    expose(ctx, QUERY_FRONTEND, PORT_NAME_JAEGER_UI, &jaeger.ingress)
}

/// Ingress or Route for the gateway, when requested
pub(super) fn gateway(ctx: &Context<'_>) -> Option<ManagedObject> {
    expose(ctx, GATEWAY, PORT_NAME_PUBLIC, &ctx.spec.template.gateway.ingress)
}

fn expose(
    ctx: &Context<'_>,
    component: &str,
    port: &str,
    ingress: &IngressSpec,
) -> Option<ManagedObject> {
    match ingress.type_ {
        IngressType::None => None,
        IngressType::Ingress => Some(ManagedObject::from(build_ingress(ctx, component, port, ingress))),
        IngressType::Route => Some(ManagedObject::from(build_route(ctx, component, port, ingress))),
    }
}

fn build_ingress(ctx: &Context<'_>, component: &str, port: &str, ingress: &IngressSpec) -> Ingress {
    let mut metadata = ctx.meta(ctx.name(component), ctx.labels(component));
    if !ingress.annotations.is_empty() {
        metadata.annotations = Some(ingress.annotations.clone());
    }

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: ctx.name(component),
            port: Some(ServiceBackendPort {
                name: Some(port.to_owned()),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    // without a host every request reaches the default backend
    let spec = if ingress.host.is_empty() {
        K8IngressSpec {
            ingress_class_name: ingress.ingress_class_name.clone(),
            default_backend: Some(backend),
            ..Default::default()
        }
    } else {
        K8IngressSpec {
            ingress_class_name: ingress.ingress_class_name.clone(),
            rules: Some(vec![IngressRule {
                host: Some(ingress.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        backend,
                        path: Some("/".to_owned()),
                        path_type: "Prefix".to_owned(),
                    }],
                }),
            }]),
            ..Default::default()
        }
    };

    Ingress {
        metadata,
        spec: Some(spec),
        ..Default::default()
    }
}

fn build_route(ctx: &Context<'_>, component: &str, port: &str, ingress: &IngressSpec) -> Route {
    let mut metadata = ctx.meta(ctx.name(component), ctx.labels(component));
    if !ingress.annotations.is_empty() {
        metadata.annotations = Some(ingress.annotations.clone());
    }
    let termination = ingress
        .route
        .termination
        .unwrap_or(TlsRouteTerminationType::Edge);

    Route {
        metadata,
        spec: RouteSpec {
            host: ingress.host.clone(),
            to: RouteTargetReference {
                kind: "Service".to_owned(),
                name: ctx.name(component),
                weight: None,
            },
            port: Some(RoutePort {
                target_port: IntOrString::String(port.to_owned()),
            }),
            tls: Some(TlsConfig {
                termination: termination.as_str().to_owned(),
                insecure_edge_termination_policy: String::new(),
            }),
            wildcard_policy: String::new(),
        },
    }
}
