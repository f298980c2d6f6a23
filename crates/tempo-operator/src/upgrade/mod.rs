//!
//! # Upgrades
//!
//! One time changes applied to instances created by an older operator. Each entry
//! is keyed by the operator version introducing it and runs when the instance's
//! recorded version is older. After the chain the instance records the running
//! version, so a later cycle finds nothing to do.
//!
mod v0_5_0;

use async_trait::async_trait;
use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use tempo_operator_metadata::operator_version;
use tempo_operator_metadata::stack::TempoStack;

use crate::error::{PlatformError, ReconcileError};
use crate::platform::{Platform, cancellable};

/// One version gated change
#[async_trait]
pub trait Upgrade: Send + Sync {
    /// operator version introducing the change
    fn version(&self) -> Version;

    /// change the instance in place, deleting live objects if needed
    async fn apply(
        &self,
        platform: &dyn Platform,
        cancel: &CancellationToken,
        stack: &mut TempoStack,
    ) -> Result<(), PlatformError>;
}

/// Upgrades in ascending version order
pub struct UpgradeChain {
    running: Version,
    upgrades: Vec<Box<dyn Upgrade>>,
}

impl UpgradeChain {
    /// the built in upgrades, targeting the compiled in operator version
    pub fn new() -> Result<Self, semver::Error> {
        let running = Version::parse(operator_version())?;
        Ok(Self::with_upgrades(running, vec![Box::new(v0_5_0::V0_5_0)]))
    }

    pub fn with_upgrades(running: Version, mut upgrades: Vec<Box<dyn Upgrade>>) -> Self {
        upgrades.sort_by_key(|upgrade| upgrade.version());
        Self { running, upgrades }
    }

    pub fn running(&self) -> &Version {
        &self.running
    }

    /// bring `stack` up to the running version, returning the persisted instance
    #[instrument(skip_all, fields(running = %self.running))]
    pub async fn run(
        &self,
        platform: &dyn Platform,
        cancel: &CancellationToken,
        mut stack: TempoStack,
    ) -> Result<TempoStack, ReconcileError> {
        let recorded = stack
            .status
            .as_ref()
            .map(|status| status.operator_version.clone())
            .unwrap_or_default();

        // a fresh instance has nothing to upgrade
        if recorded.is_empty() {
            debug!("recording operator version of new instance");
            return self.record_version(platform, cancel, stack).await;
        }

        let stored = Version::parse(&recorded).map_err(|err| {
            ReconcileError::Invariant(format!("invalid status.operatorVersion {recorded}: {err}"))
        })?;
        if stored >= self.running {
            return Ok(stack);
        }

        let original = stack.spec.clone();
        for upgrade in self.pending(&stored) {
            info!(from = %stored, version = %upgrade.version(), "upgrading instance");
            upgrade.apply(platform, cancel, &mut stack).await?;
        }

        if stack.spec != original {
            stack = cancellable(cancel, platform.replace_stack(&stack)).await?;
        }
        self.record_version(platform, cancel, stack).await
    }

    fn pending<'a>(&'a self, stored: &'a Version) -> impl Iterator<Item = &'a dyn Upgrade> + 'a {
        self.upgrades
            .iter()
            .map(Box::as_ref)
            .filter(move |upgrade| {
                let version = upgrade.version();
                *stored < version && version <= self.running
            })
    }

    async fn record_version(
        &self,
        platform: &dyn Platform,
        cancel: &CancellationToken,
        mut stack: TempoStack,
    ) -> Result<TempoStack, ReconcileError> {
        stack.status.get_or_insert_with(Default::default).operator_version =
            self.running.to_string();
        Ok(cancellable(cancel, platform.replace_stack_status(&stack)).await?)
    }
}

#[cfg(test)]
mod test {

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;

    use tempo_operator_metadata::stack::TempoStackStatus;

    use crate::naming::{INGESTER, component_labels};
    use crate::objects::{ManagedKind, ObjectKey};
    use crate::platform::MemoryPlatform;

    use super::*;

    struct Counting {
        version: Version,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Upgrade for Counting {
        fn version(&self) -> Version {
            self.version.clone()
        }

        async fn apply(
            &self,
            _platform: &dyn Platform,
            _cancel: &CancellationToken,
            stack: &mut TempoStack,
        ) -> Result<(), PlatformError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            stack.spec.storage_class_name = Some(format!("upgraded-{}", self.version));
            Ok(())
        }
    }

    fn stack(recorded: &str) -> TempoStack {
        let mut stack = TempoStack::new("simplest", Default::default());
        stack.metadata.namespace = Some("observability".to_owned());
        stack.spec.images.tempo = "docker.io/grafana/tempo:1.5.0".to_owned();
        stack.status = Some(TempoStackStatus {
            operator_version: recorded.to_owned(),
            ..Default::default()
        });
        stack
    }

    fn chain(runs: &Arc<AtomicUsize>) -> UpgradeChain {
        UpgradeChain::with_upgrades(
            Version::new(0, 3, 0),
            vec![
                Box::new(Counting {
                    version: Version::new(0, 3, 0),
                    runs: runs.clone(),
                }),
                Box::new(Counting {
                    version: Version::new(0, 2, 0),
                    runs: runs.clone(),
                }),
                Box::new(Counting {
                    version: Version::new(0, 4, 0),
                    runs: runs.clone(),
                }),
            ],
        )
    }

    #[tokio::test]
    async fn test_applies_pending_in_order() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert_stack(stack("0.1.0")).await;
        let runs = Arc::new(AtomicUsize::new(0));

        let upgraded = chain(&runs)
            .run(&platform, &CancellationToken::new(), stored)
            .await
            .expect("upgraded");

        // 0.2.0 then 0.3.0, 0.4.0 is newer than the running version
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(upgraded.spec.storage_class_name.as_deref(), Some("upgraded-0.3.0"));
        let persisted = platform.stack("observability", "simplest").await.expect("stack");
        assert_eq!(persisted.spec.storage_class_name.as_deref(), Some("upgraded-0.3.0"));
        assert_eq!(persisted.status.expect("status").operator_version, "0.3.0");
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert_stack(stack("0.1.0")).await;
        let runs = Arc::new(AtomicUsize::new(0));
        let chain = chain(&runs);
        let cancel = CancellationToken::new();

        let upgraded = chain.run(&platform, &cancel, stored).await.expect("upgraded");
        let again = chain.run(&platform, &cancel, upgraded.clone()).await.expect("noop");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(again, upgraded);
    }

    #[tokio::test]
    async fn test_new_instance_is_only_stamped() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert_stack(stack("")).await;
        let runs = Arc::new(AtomicUsize::new(0));

        let stamped = chain(&runs)
            .run(&platform, &CancellationToken::new(), stored)
            .await
            .expect("stamped");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(stamped.status.expect("status").operator_version, "0.3.0");
    }

    #[tokio::test]
    async fn test_v0_5_0_recreates_ingesters() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert_stack(stack("0.4.0")).await;
        platform
            .insert(StatefulSet {
                metadata: ObjectMeta {
                    name: Some("tempo-simplest-ingester".to_owned()),
                    namespace: Some("observability".to_owned()),
                    labels: Some(component_labels(INGESTER, "simplest")),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await;

        let chain =
            UpgradeChain::with_upgrades(Version::new(0, 5, 0), vec![Box::new(v0_5_0::V0_5_0)]);
        let upgraded = chain
            .run(&platform, &CancellationToken::new(), stored)
            .await
            .expect("upgraded");

        assert_eq!(upgraded.spec.images, Default::default());
        let key = ObjectKey::new(
            ManagedKind::StatefulSet,
            "observability",
            "tempo-simplest-ingester",
        );
        assert!(platform.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_recorded_version() {
        let platform = MemoryPlatform::new();
        let stored = platform.insert_stack(stack("not-a-version")).await;
        let runs = Arc::new(AtomicUsize::new(0));
        let err = chain(&runs)
            .run(&platform, &CancellationToken::new(), stored)
            .await
            .expect_err("invalid");
        assert!(matches!(err, ReconcileError::Invariant(_)));
    }
}
