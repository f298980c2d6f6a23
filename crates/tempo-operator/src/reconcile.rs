//!
//! # Reconcile cycle
//!
//! One cycle for one instance: upgrade, default, resolve parameters, render
//! configuration, build the desired set, converge, then record the outcome in the
//! status. Every cycle starts from scratch; the only state kept between cycles is
//! the number of consecutive transient failures of each instance, used for backoff.
//!
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use tempo_operator_metadata::config::ProjectConfig;
use tempo_operator_metadata::stack::{ManagementStateType, TempoStack};

use crate::converge::{ConvergeReport, ConvergenceEngine};
use crate::error::ReconcileError;
use crate::manifests;
use crate::naming;
use crate::params;
use crate::platform::Platform;
use crate::status::{Outcome, StatusRefresher};
use crate::templates::TemplateRegistry;
use crate::upgrade::UpgradeChain;
use crate::webhook::Defaulter;

const BASE_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// consecutive transient failures before the instance is reported as failed
const FAILED_AFTER: u32 = 3;
/// re-check of workloads still rolling out
const PENDING_REQUEUE: Duration = Duration::from_secs(30);

/// When the instance should be looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// only on the next change of the instance or an owned object
    AwaitChange,
    RequeueAfter(Duration),
}

/// delay before retrying after `failures` consecutive transient failures
pub fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    BASE_BACKOFF
        .saturating_mul(2u32.pow(exponent))
        .min(MAX_BACKOFF)
}

/// Result of a completed cycle
#[derive(Debug)]
pub struct Cycle {
    pub report: ConvergeReport,
    pub outcome: Outcome,
}

type InstanceKey = (String, String);

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    config: ProjectConfig,
    templates: TemplateRegistry,
    upgrades: UpgradeChain,
    cancel: CancellationToken,
    failures: Mutex<HashMap<InstanceKey, u32>>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn Platform>, config: ProjectConfig) -> Result<Self, ReconcileError> {
        let upgrades = UpgradeChain::new()
            .map_err(|err| ReconcileError::Invariant(format!("invalid operator version: {err}")))?;
        Ok(Self {
            platform,
            config,
            templates: TemplateRegistry::new()?,
            upgrades,
            cancel: CancellationToken::new(),
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_upgrades(mut self, upgrades: UpgradeChain) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// cancelling it abandons every running cycle
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// consecutive transient failures recorded for an instance
    pub async fn failures(&self, namespace: &str, name: &str) -> u32 {
        let key = (namespace.to_owned(), name.to_owned());
        self.failures.lock().await.get(&key).copied().unwrap_or_default()
    }

    /// run one cycle and record its outcome
    pub async fn reconcile(&self, stack: &TempoStack) -> Next {
        let name = stack.metadata.name.clone().unwrap_or_default();
        let namespace = stack.metadata.namespace.clone().unwrap_or_default();
        let span = info_span!("reconcile", tempo = %name, namespace = %namespace);

        async move {
            if stack.spec.management_state == ManagementStateType::Unmanaged {
                debug!("skipping unmanaged instance");
                return Next::AwaitChange;
            }
            if stack.metadata.deletion_timestamp.is_some() {
                debug!("skipping instance being deleted");
                return Next::AwaitChange;
            }

            let cancel = self.cancel.child_token();
            let key = (namespace.clone(), name.clone());
            match self.cycle(stack.clone(), &cancel).await {
                Ok(cycle) => {
                    self.failures.lock().await.remove(&key);
                    info!(report = %cycle.report, "reconciled");
                    self.record(&cancel, &key, &cycle.outcome).await;
                    match cycle.outcome {
                        Outcome::Pending => Next::RequeueAfter(PENDING_REQUEUE),
                        _ => Next::AwaitChange,
                    }
                }
                Err(ReconcileError::Configuration(err)) => {
                    self.failures.lock().await.remove(&key);
                    warn!(reason = %err.reason, %err, "configuration error");
                    self.record(&cancel, &key, &Outcome::Configuration(err)).await;
                    Next::AwaitChange
                }
                Err(err @ ReconcileError::Transient(_)) => {
                    let failures = {
                        let mut tracker = self.failures.lock().await;
                        let count = tracker.entry(key.clone()).or_default();
                        *count += 1;
                        *count
                    };
                    let delay = backoff(failures);
                    warn!(failures, %err, ?delay, "transient failure, retrying");
                    if failures >= FAILED_AFTER {
                        self.record(&cancel, &key, &Outcome::Failed(err.to_string()))
                            .await;
                    }
                    Next::RequeueAfter(delay)
                }
                Err(err @ ReconcileError::Invariant(_)) => {
                    self.failures.lock().await.remove(&key);
                    error!(%err, spec = ?stack.spec, "reconcile failed");
                    self.record(&cancel, &key, &Outcome::Failed(err.to_string()))
                        .await;
                    Next::AwaitChange
                }
            }
        }
        .instrument(span)
        .await
    }

    /// the cycle itself, without status handling
    pub async fn cycle(
        &self,
        stack: TempoStack,
        cancel: &CancellationToken,
    ) -> Result<Cycle, ReconcileError> {
        let platform = self.platform.as_ref();

        let mut stack = self.upgrades.run(platform, cancel, stack).await?;
        // upgrades may clear fields that admission had filled
        Defaulter::new(&self.config.images).default(&mut stack)?;
        let params = params::resolve(platform, cancel, &stack, &self.config).await?;

        let config = self.templates.render_config(&params)?;
        let gateway = self.templates.render_gateway(&params)?;
        debug!(hash = %config.hash, "configuration rendered");

        let desired = manifests::build(&params, &config, gateway.as_ref())?;
        let selector = naming::common_labels(params.instance());
        let report = ConvergenceEngine::new(platform, cancel)
            .converge(params.namespace(), &selector, &params.config.gates, &desired)
            .await?;

        let outcome = if report.is_ready() {
            Outcome::Ready
        } else {
            Outcome::Pending
        };
        Ok(Cycle { report, outcome })
    }

    async fn record(&self, cancel: &CancellationToken, key: &InstanceKey, outcome: &Outcome) {
        let (namespace, name) = key;
        if let Err(err) = StatusRefresher::new(self.platform.as_ref(), cancel)
            .refresh(namespace, name, outcome)
            .await
        {
            warn!(%err, "failed to update status");
        }
    }
}

#[cfg(test)]
mod test {

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_backoff() {
        assert_eq!(backoff(1), Duration::from_secs(5));
        assert_eq!(backoff(2), Duration::from_secs(10));
        assert_eq!(backoff(4), Duration::from_secs(40));
        assert_eq!(backoff(7), Duration::from_secs(300));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(300));
    }
}
