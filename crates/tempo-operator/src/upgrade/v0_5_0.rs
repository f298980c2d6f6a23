use async_trait::async_trait;
use semver::Version;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tempo_operator_metadata::config::ImagesSpec;
use tempo_operator_metadata::stack::TempoStack;

use crate::error::PlatformError;
use crate::naming::{self, INGESTER};
use crate::objects::ManagedKind;
use crate::platform::{Platform, cancellable};

use super::Upgrade;

/// The ingester pod management policy changed and it cannot be updated in place, so
/// the ingesters are deleted and recreated by the same cycle. Images moved out of
/// `spec.images` into the operator configuration.
pub(super) struct V0_5_0;

#[async_trait]
impl Upgrade for V0_5_0 {
    fn version(&self) -> Version {
        Version::new(0, 5, 0)
    }

    async fn apply(
        &self,
        platform: &dyn Platform,
        cancel: &CancellationToken,
        stack: &mut TempoStack,
    ) -> Result<(), PlatformError> {
        let instance = stack.metadata.name.as_deref().unwrap_or_default();
        let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
        let labels = naming::component_labels(INGESTER, instance);

        let ingesters = cancellable(
            cancel,
            platform.list_owned(ManagedKind::StatefulSet, namespace, &labels),
        )
        .await?;
        for ingester in ingesters {
            info!(ingester = ingester.name(), "deleting ingester (will be re-created)");
            cancellable(cancel, platform.delete(&ingester.key())).await?;
        }

        stack.spec.images = ImagesSpec::default();
        Ok(())
    }
}
