//!
//! # Status
//!
//! Projects the outcome of a reconcile cycle into the instance's status conditions.
//! Exactly one condition is `True` after a refresh. Writes go through the status sub
//! resource with optimistic concurrency: on a conflict the instance is read again and
//! the conditions recomputed from the fresh copy.
//!
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use tempo_operator_metadata::stack::{
    ConditionReason, ConditionStatus, TempoStack, TempoStackStatus,
};

use crate::error::{ConfigurationError, PlatformError};
use crate::platform::{Platform, cancellable};

const MAX_ATTEMPTS: usize = 5;
const TRUE: &str = "True";
const FALSE: &str = "False";

/// Outcome of one reconcile cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    /// converged, workloads still rolling out
    Pending,
    Configuration(ConfigurationError),
    /// repeated transient failures
    Failed(String),
}

impl Outcome {
    fn condition(&self) -> (ConditionStatus, ConditionReason, String) {
        match self {
            Self::Ready => (
                ConditionStatus::Ready,
                ConditionReason::Ready,
                "All components are operational".to_owned(),
            ),
            Self::Pending => (
                ConditionStatus::Pending,
                ConditionReason::PendingComponents,
                "TempoStack components are pending on dependencies".to_owned(),
            ),
            Self::Configuration(err) => (
                ConditionStatus::ConfigurationError,
                err.reason,
                err.message.clone(),
            ),
            Self::Failed(message) => (
                ConditionStatus::Failed,
                ConditionReason::FailedReconciliation,
                message.clone(),
            ),
        }
    }
}

/// conditions after `outcome`, `None` when nothing changes
pub fn next_conditions(
    current: &[Condition],
    outcome: &Outcome,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Option<Vec<Condition>> {
    let (active, reason, message) = outcome.condition();
    let mut next = Vec::with_capacity(ConditionStatus::ALL.len());

    for type_ in ConditionStatus::ALL {
        let existing = current.iter().find(|c| c.type_ == type_.as_str());
        if type_ == active {
            let transition = match existing {
                Some(c) if c.status == TRUE => c.last_transition_time.clone(),
                _ => Time(now),
            };
            next.push(Condition {
                type_: type_.as_str().to_owned(),
                status: TRUE.to_owned(),
                reason: reason.as_str().to_owned(),
                message: message.clone(),
                observed_generation: generation,
                last_transition_time: transition,
            });
        } else if let Some(existing) = existing {
            let mut condition = existing.clone();
            if condition.status != FALSE {
                condition.status = FALSE.to_owned();
                condition.last_transition_time = Time(now);
            }
            next.push(condition);
        }
    }

    (next != current).then_some(next)
}

/// tag of the tempo image, reported as the running tempo version
fn tempo_version(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or_default();
    let name = without_digest.rsplit('/').next().unwrap_or_default();
    name.split_once(':')
        .map(|(_, tag)| tag.to_owned())
        .unwrap_or_default()
}

/// Writes reconcile outcomes into instance status
pub struct StatusRefresher<'a> {
    platform: &'a dyn Platform,
    cancel: &'a CancellationToken,
}

impl<'a> StatusRefresher<'a> {
    pub fn new(platform: &'a dyn Platform, cancel: &'a CancellationToken) -> Self {
        Self { platform, cancel }
    }

    /// record `outcome`, returning the written instance if anything changed
    #[instrument(skip(self, outcome))]
    pub async fn refresh(
        &self,
        namespace: &str,
        name: &str,
        outcome: &Outcome,
    ) -> Result<Option<TempoStack>, PlatformError> {
        self.refresh_at(namespace, name, outcome, Utc::now()).await
    }

    pub async fn refresh_at(
        &self,
        namespace: &str,
        name: &str,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<Option<TempoStack>, PlatformError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(mut stack) =
                cancellable(self.cancel, self.platform.get_stack(namespace, name)).await?
            else {
                debug!("instance is gone, skipping status");
                return Ok(None);
            };

            let status = stack.status.get_or_insert_with(TempoStackStatus::default);
            let version = tempo_version(&stack.spec.images.tempo);
            let conditions =
                next_conditions(&status.conditions, outcome, stack.metadata.generation, now);
            if conditions.is_none() && status.tempo_version == version {
                debug!("status unchanged");
                return Ok(None);
            }
            if let Some(conditions) = conditions {
                status.conditions = conditions;
            }
            status.tempo_version = version;

            match cancellable(self.cancel, self.platform.replace_stack_status(&stack)).await {
                Ok(written) => {
                    debug!(condition = ?outcome.condition().0, "status updated");
                    return Ok(Some(written));
                }
                Err(err) if err.is_conflict() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, "status conflict, retrying with latest version");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
