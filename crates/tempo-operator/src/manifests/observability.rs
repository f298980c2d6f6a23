//! Objects handed to the prometheus and grafana operators.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use tempo_operator_metadata::integrations::{
    Endpoint, GrafanaDatasource, GrafanaDatasourceInternal, GrafanaDatasourceSpec,
    NamespaceSelector, PrometheusRule, PrometheusRuleSpec, Rule, RuleGroup, SafeTlsConfig,
    ServiceMonitor, ServiceMonitorSpec,
};

use crate::error::ManifestError;
use crate::naming::{self, *};
use crate::objects::ManagedObject;
use crate::templates::TLS_CA_FILENAME;

use super::Context;

const METRICS_PATH: &str = "/metrics";
const PROMETHEUS_CA_DIR: &str = "/etc/prometheus/configmaps";

pub(super) fn build(ctx: &Context<'_>) -> Result<Vec<ManagedObject>, ManifestError> {
    let metrics = &ctx.spec.observability.metrics;
    let mut objects = Vec::new();

    if ctx.gates.prometheus_operator && metrics.create_service_monitors {
        let mut components = vec![DISTRIBUTOR, INGESTER, COMPACTOR, QUERIER, QUERY_FRONTEND];
        if ctx.spec.template.gateway.enabled {
            components.push(GATEWAY);
        }
        objects.extend(
            components
                .into_iter()
                .map(|component| ManagedObject::from(service_monitor(ctx, component))),
        );
    }

    if ctx.gates.prometheus_operator && metrics.create_prometheus_rules {
        objects.push(ManagedObject::from(prometheus_rule(ctx)));
    }

    if ctx.gates.grafana_operator && ctx.spec.observability.grafana.create_datasource {
        objects.push(ManagedObject::from(datasource(ctx)));
    }

    Ok(objects)
}

fn service_monitor(ctx: &Context<'_>, component: &str) -> ServiceMonitor {
    let labels = ctx.labels(component);
    let port = if component == GATEWAY {
        PORT_NAME_INTERNAL
    } else {
        PORT_NAME_HTTP
    };

    // the gateway's internal port never serves TLS
    let https = ctx.gates.http_encryption && component != GATEWAY;
    let tls_config = https.then(|| SafeTlsConfig {
        ca_file: format!(
            "{PROMETHEUS_CA_DIR}/{}/{TLS_CA_FILENAME}",
            naming::ca_bundle_name(ctx.instance)
        ),
        server_name: naming::service_fqdn(ctx.namespace, ctx.instance, component),
        ..Default::default()
    });

    ServiceMonitor {
        metadata: ctx.meta(ctx.name(component), labels.clone()),
        spec: ServiceMonitorSpec {
            endpoints: vec![Endpoint {
                port: port.to_owned(),
                path: METRICS_PATH.to_owned(),
                scheme: if https { "https" } else { "http" }.to_owned(),
                tls_config,
                relabelings: Vec::new(),
            }],
            namespace_selector: NamespaceSelector {
                match_names: vec![ctx.namespace.to_owned()],
            },
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
        },
    }
}

fn alert(name: &str, expr: String, for_: &str, severity: &str, summary: &str) -> Rule {
    Rule {
        alert: name.to_owned(),
        expr,
        for_: for_.to_owned(),
        labels: BTreeMap::from([("severity".to_owned(), severity.to_owned())]),
        annotations: BTreeMap::from([("summary".to_owned(), summary.to_owned())]),
    }
}

fn prometheus_rule(ctx: &Context<'_>) -> PrometheusRule {
    let selector = format!(
        "namespace=\"{}\", job=~\"{}-.*\"",
        ctx.namespace,
        naming::config_name(ctx.instance)
    );
    let rules = vec![
        alert(
            "TempoRequestErrors",
            format!(
                "100 * sum(rate(tempo_request_duration_seconds_count{{status_code=~\"5..\", {selector}}}[1m])) by (route) \
                 / sum(rate(tempo_request_duration_seconds_count{{{selector}}}[1m])) by (route) > 10"
            ),
            "15m",
            "critical",
            "Tempo is returning errors on more than 10% of requests.",
        ),
        alert(
            "TempoCompactionsFailing",
            format!("sum(increase(tempodb_compaction_errors_total{{{selector}}}[1h])) > 2"),
            "5m",
            "critical",
            "Tempo compactions are failing.",
        ),
        alert(
            "TempoIngesterFlushesFailing",
            format!("sum(increase(tempo_ingester_failed_flushes_total{{{selector}}}[1h])) > 2"),
            "5m",
            "critical",
            "Tempo ingesters fail to flush traces to storage.",
        ),
        alert(
            "TempoDistributorUnhealthy",
            format!("max(tempo_ring_members{{state=\"Unhealthy\", name=\"distributor\", {selector}}}) > 0"),
            "15m",
            "warning",
            "Tempo has unhealthy distributors.",
        ),
    ];

    PrometheusRule {
        metadata: ctx.meta(
            format!("{}-prometheus-rule", naming::config_name(ctx.instance)),
            naming::common_labels(ctx.instance),
        ),
        spec: PrometheusRuleSpec {
            groups: vec![RuleGroup {
                name: "tempo_alerts".to_owned(),
                rules,
            }],
        },
    }
}

/// datasource pointing at the query frontend, or at the gateway when it fronts the instance
fn datasource(ctx: &Context<'_>) -> GrafanaDatasource {
    let url = if ctx.spec.template.gateway.enabled {
        let tenant = ctx
            .spec
            .tenants
            .as_ref()
            .and_then(|t| t.authentication.first())
            .map(|t| t.tenant_name.as_str())
            .unwrap_or_default();
        format!(
            "https://{}:{PORT_GATEWAY_HTTP}/api/traces/v1/{tenant}/tempo",
            naming::service_fqdn(ctx.namespace, ctx.instance, GATEWAY)
        )
    } else {
        let scheme = if ctx.gates.http_encryption { "https" } else { "http" };
        format!(
            "{scheme}://{}:{PORT_HTTP}",
            naming::service_fqdn(ctx.namespace, ctx.instance, QUERY_FRONTEND)
        )
    };

    GrafanaDatasource {
        metadata: ctx.meta(
            naming::config_name(ctx.instance),
            naming::common_labels(ctx.instance),
        ),
        spec: GrafanaDatasourceSpec {
            datasource: GrafanaDatasourceInternal {
                name: naming::config_name(ctx.instance),
                type_: "tempo".to_owned(),
                access: "proxy".to_owned(),
                url,
                json_data: None,
                secure_json_data: None,
            },
            instance_selector: ctx
                .spec
                .observability
                .grafana
                .instance_selector
                .clone()
                .unwrap_or_default(),
            values_from: Vec::new(),
            allow_cross_namespace_import: true,
        },
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use crate::manifests::test::{build_all, params};

    use super::*;

    fn monitored() -> crate::params::Params {
        let mut params = params();
        params.config.gates.prometheus_operator = true;
        params.config.gates.grafana_operator = true;
        params.stack.spec.observability.metrics.create_service_monitors = true;
        params.stack.spec.observability.metrics.create_prometheus_rules = true;
        params.stack.spec.observability.grafana.create_datasource = true;
        params
    }

    #[test]
    fn test_service_monitor_scheme() {
        let mut params = monitored();
        params.config.gates.http_encryption = true;
        let objects = build_all(&params);
        let monitor = objects
            .iter()
            .find_map(|o| match o {
                ManagedObject::ServiceMonitor(m)
                    if m.metadata.name.as_deref() == Some("tempo-simplest-querier") =>
                {
                    Some(m)
                }
                _ => None,
            })
            .expect("querier monitor");
        let endpoint = &monitor.spec.endpoints[0];
        assert_eq!(endpoint.scheme, "https");
        assert_eq!(
            endpoint.tls_config.as_ref().map(|t| t.server_name.as_str()),
            Some("tempo-simplest-querier.observability.svc.cluster.local")
        );
        assert_eq!(monitor.spec.namespace_selector.match_names, vec!["observability"]);
    }

    #[test]
    fn test_datasource_url() {
        let objects = build_all(&monitored());
        let datasource = objects
            .iter()
            .find_map(|o| match o {
                ManagedObject::GrafanaDatasource(d) => Some(d),
                _ => None,
            })
            .expect("datasource");
        assert_eq!(
            datasource.spec.datasource.url,
            "http://tempo-simplest-query-frontend.observability.svc.cluster.local:3200"
        );
        assert!(datasource.spec.allow_cross_namespace_import);
    }

    #[test]
    fn test_rule_selects_instance_jobs() {
        let objects = build_all(&monitored());
        let rule = objects
            .iter()
            .find_map(|o| match o {
                ManagedObject::PrometheusRule(r) => Some(r),
                _ => None,
            })
            .expect("rule");
        assert_eq!(rule.metadata.name.as_deref(), Some("tempo-simplest-prometheus-rule"));
        assert!(
            rule.spec.groups[0]
                .rules
                .iter()
                .all(|r| r.expr.contains("job=~\"tempo-simplest-.*\""))
        );
    }
}
