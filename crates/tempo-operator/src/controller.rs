//!
//! # Controller
//!
//! Drives reconcile cycles from change notifications on TempoStack instances and the
//! objects they own. Cycles of one instance never overlap; distinct instances run
//! concurrently up to the worker count.
//!
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use tempo_operator_metadata::config::FeatureGates;
use tempo_operator_metadata::integrations::{GrafanaDatasource, PrometheusRule, Route, ServiceMonitor};
use tempo_operator_metadata::stack::TempoStack;

use crate::error::ReconcileError;
use crate::objects::ManagedKind;
use crate::reconcile::{Next, Reconciler};

const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// where the controller looks for instances
#[derive(Debug, Clone, Default)]
pub struct WatchScope {
    /// all namespaces when unset
    pub namespace: Option<String>,
    pub workers: u16,
    /// integration kinds are only watched when enabled
    pub gates: FeatureGates,
}

impl WatchScope {
    fn api<K>(&self, client: &Client) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        }
    }
}

impl From<Next> for Action {
    fn from(next: Next) -> Self {
        match next {
            Next::AwaitChange => Action::await_change(),
            Next::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

async fn reconcile(
    stack: Arc<TempoStack>,
    reconciler: Arc<Reconciler>,
) -> Result<Action, ReconcileError> {
    Ok(reconciler.reconcile(&stack).await.into())
}

/// cycles handle their own errors, this only covers the impossible case
fn error_policy(_stack: Arc<TempoStack>, err: &ReconcileError, _: Arc<Reconciler>) -> Action {
    warn!(%err, "reconcile returned an error");
    Action::requeue(ERROR_REQUEUE)
}

fn owned<K>(controller: Controller<TempoStack>, scope: &WatchScope, client: &Client) -> Controller<TempoStack>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    controller.owns(scope.api::<K>(client), watcher::Config::default())
}

/// watch the objects of `kind` owned by instances
fn watch_owned(
    controller: Controller<TempoStack>,
    kind: ManagedKind,
    scope: &WatchScope,
    client: &Client,
) -> Controller<TempoStack> {
    debug!(%kind, "watching owned objects");
    match kind {
        ManagedKind::ConfigMap => owned::<ConfigMap>(controller, scope, client),
        ManagedKind::Secret => owned::<Secret>(controller, scope, client),
        ManagedKind::ServiceAccount => owned::<ServiceAccount>(controller, scope, client),
        ManagedKind::Service => owned::<Service>(controller, scope, client),
        ManagedKind::Deployment => owned::<Deployment>(controller, scope, client),
        ManagedKind::StatefulSet => owned::<StatefulSet>(controller, scope, client),
        ManagedKind::Ingress => owned::<Ingress>(controller, scope, client),
        ManagedKind::Route => owned::<Route>(controller, scope, client),
        ManagedKind::ServiceMonitor => owned::<ServiceMonitor>(controller, scope, client),
        ManagedKind::PrometheusRule => owned::<PrometheusRule>(controller, scope, client),
        ManagedKind::GrafanaDatasource => owned::<GrafanaDatasource>(controller, scope, client),
    }
}

/// kinds with an owner watch, the same set a cycle lists for pruning
fn watched_kinds(gates: &FeatureGates) -> Vec<ManagedKind> {
    ManagedKind::owned_kinds(gates).collect()
}

/// run until a shutdown signal arrives
pub async fn run(client: Client, reconciler: Arc<Reconciler>, scope: WatchScope) {
    info!(namespace = ?scope.namespace, workers = scope.workers, "starting tempo controller");

    let mut controller = Controller::new(scope.api::<TempoStack>(&client), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(scope.workers));
    for kind in watched_kinds(&scope.gates) {
        controller = watch_owned(controller, kind, &scope, &client);
    }

    let cancel = reconciler.cancel_token().clone();
    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            if let Err(err) = result {
                warn!(%err, "controller event failed");
            }
        })
        .await;

    // abandon cycles still waiting on the cluster
    cancel.cancel();
    info!("tempo controller stopped");
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_integration_watches_follow_gates() {
        let mut gates = FeatureGates::default();
        assert_eq!(
            watched_kinds(&gates),
            vec![
                ManagedKind::ConfigMap,
                ManagedKind::Secret,
                ManagedKind::ServiceAccount,
                ManagedKind::Service,
                ManagedKind::Deployment,
                ManagedKind::StatefulSet,
                ManagedKind::Ingress,
            ]
        );

        gates.openshift.openshift_route = true;
        gates.prometheus_operator = true;
        gates.grafana_operator = true;
        assert_eq!(watched_kinds(&gates), ManagedKind::ALL.to_vec());
    }
}
