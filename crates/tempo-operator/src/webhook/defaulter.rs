use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use tempo_operator_metadata::GoDuration;
use tempo_operator_metadata::config::ImagesSpec;
use tempo_operator_metadata::quantity::quantity_value;
use tempo_operator_metadata::stack::{IngressSpec, IngressType, TempoStack, TlsRouteTerminationType};

use crate::error::DefaultingError;
use crate::naming;

const DEFAULT_RETENTION_HOURS: u64 = 48;
const DEFAULT_STORAGE_SIZE: &str = "10Gi";
const DEFAULT_RESULT_LIMIT: i32 = 20;

/// Fills unset fields of an instance
pub struct Defaulter<'a> {
    images: &'a ImagesSpec,
}

impl<'a> Defaulter<'a> {
    pub fn new(images: &'a ImagesSpec) -> Self {
        Self { images }
    }

    pub fn default(&self, stack: &mut TempoStack) -> Result<(), DefaultingError> {
        let name = stack.metadata.name.clone().unwrap_or_default();
        debug!(%name, "default");
        let spec = &mut stack.spec;

        if spec.images.tempo.is_empty() && self.images.tempo.is_empty() {
            return Err(DefaultingError::NoDefaultTempoImage);
        }
        if spec.images.tempo_query.is_empty() && self.images.tempo_query.is_empty() {
            return Err(DefaultingError::NoDefaultTempoQueryImage);
        }
        spec.images.fill_from(self.images);

        if spec.service_account.is_empty() {
            spec.service_account = naming::default_service_account_name(&name);
        }

        if spec.replication_factor == 0 {
            spec.replication_factor = 1;
        }

        if spec.retention.global.traces.is_zero() {
            spec.retention.global.traces = GoDuration::from_hours(DEFAULT_RETENTION_HOURS);
        }

        let size_unset = match &spec.storage_size {
            None => true,
            Some(size) => quantity_value(size).is_ok_and(|bytes| bytes <= 0.0),
        };
        if size_unset {
            spec.storage_size = Some(Quantity(DEFAULT_STORAGE_SIZE.to_owned()));
        }

        spec.limit_spec
            .global
            .query
            .max_search_bytes_per_trace
            .get_or_insert(0);
        spec.search_spec
            .default_result_limit
            .get_or_insert(DEFAULT_RESULT_LIMIT);

        spec.template.distributor.component.replicas.get_or_insert(1);
        spec.template.ingester.replicas.get_or_insert(1);

        default_termination(&mut spec.template.query_frontend.jaeger_query.ingress);
        default_termination(&mut spec.template.gateway.ingress);

        Ok(())
    }
}

fn default_termination(ingress: &mut IngressSpec) {
    if ingress.type_ == IngressType::Route {
        ingress
            .route
            .termination
            .get_or_insert(TlsRouteTerminationType::Edge);
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    fn images() -> ImagesSpec {
        ImagesSpec {
            tempo: "docker.io/grafana/tempo:x.y.z".to_owned(),
            tempo_query: "docker.io/grafana/tempo-query:x.y.z".to_owned(),
            tempo_gateway: "docker.io/observatorium/gateway:1.2.3".to_owned(),
            tempo_gateway_opa: String::new(),
        }
    }

    #[test]
    fn test_fills_defaults() {
        let images = images();
        let mut stack = TempoStack::new("test", Default::default());
        Defaulter::new(&images).default(&mut stack).expect("defaulted");

        let spec = &stack.spec;
        assert_eq!(spec.images, images);
        assert_eq!(spec.service_account, "tempo-test");
        assert_eq!(spec.replication_factor, 1);
        assert_eq!(spec.retention.global.traces.to_string(), "48h0m0s");
        assert_eq!(spec.storage_size, Some(Quantity("10Gi".to_owned())));
        assert_eq!(spec.limit_spec.global.query.max_search_bytes_per_trace, Some(0));
        assert_eq!(spec.search_spec.default_result_limit, Some(20));
        assert_eq!(spec.template.distributor.component.replicas, Some(1));
        assert_eq!(spec.template.ingester.replicas, Some(1));
        assert_eq!(spec.template.query_frontend.jaeger_query.ingress.route.termination, None);
    }

    #[test]
    fn test_keeps_set_values() {
        let images = images();
        let mut stack = TempoStack::new("test", Default::default());
        stack.spec.replication_factor = 2;
        stack.spec.images.tempo = "docker.io/grafana/tempo:1.2.3".to_owned();
        stack.spec.retention.global.traces = GoDuration::from_hours(1);
        stack.spec.storage_size = Some(Quantity("1Gi".to_owned()));
        stack.spec.service_account = "custom".to_owned();

        let expected = {
            let mut expected = stack.clone();
            expected.spec.images.fill_from(&images);
            expected
        };
        Defaulter::new(&images).default(&mut stack).expect("defaulted");

        assert_eq!(stack.spec.images, expected.spec.images);
        assert_eq!(stack.spec.replication_factor, 2);
        assert_eq!(stack.spec.retention.global.traces.to_string(), "1h0m0s");
        assert_eq!(stack.spec.storage_size, Some(Quantity("1Gi".to_owned())));
        assert_eq!(stack.spec.service_account, "custom");
    }

    #[test]
    fn test_zero_storage_size() {
        let images = images();
        let mut stack = TempoStack::new("test", Default::default());
        stack.spec.storage_size = Some(Quantity("0Gi".to_owned()));
        Defaulter::new(&images).default(&mut stack).expect("defaulted");
        assert_eq!(stack.spec.storage_size, Some(Quantity("10Gi".to_owned())));
    }

    #[test]
    fn test_route_termination() {
        let images = images();
        let mut stack = TempoStack::new("test", Default::default());
        let jaeger = &mut stack.spec.template.query_frontend.jaeger_query;
        jaeger.enabled = true;
        jaeger.ingress.type_ = IngressType::Route;
        Defaulter::new(&images).default(&mut stack).expect("defaulted");
        assert_eq!(
            stack.spec.template.query_frontend.jaeger_query.ingress.route.termination,
            Some(TlsRouteTerminationType::Edge)
        );
    }

    #[test]
    fn test_missing_images() {
        let mut stack = TempoStack::new("test", Default::default());
        let err = Defaulter::new(&ImagesSpec::default())
            .default(&mut stack)
            .expect_err("no tempo image");
        assert_eq!(err, DefaultingError::NoDefaultTempoImage);
        assert_eq!(
            err.to_string(),
            "please specify a tempo image in the CR or in the operator configuration"
        );

        let images = ImagesSpec {
            tempo: "docker.io/grafana/tempo:x.y.z".to_owned(),
            ..Default::default()
        };
        let err = Defaulter::new(&images)
            .default(&mut stack)
            .expect_err("no tempo-query image");
        assert_eq!(err, DefaultingError::NoDefaultTempoQueryImage);
    }
}
