//!
//! # Admission
//!
//! Defaulting and validation of `TempoStack` instances before they are persisted.
//! The transport in front of it is not part of this crate. The `generate` command
//! runs the same defaulting so its output matches what the cluster would store.
//!
mod defaulter;
mod validator;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use tempo_operator_metadata::config::ProjectConfig;
use tempo_operator_metadata::stack::TempoStack;

use crate::error::AdmissionError;
use crate::platform::Platform;

pub use self::defaulter::Defaulter;
pub use self::validator::Validator;

/// default then validate an instance, returning what would be stored
#[instrument(skip_all, fields(tempo = stack.metadata.name.as_deref().unwrap_or_default()))]
pub async fn admit(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    config: &ProjectConfig,
    mut stack: TempoStack,
) -> Result<TempoStack, AdmissionError> {
    Defaulter::new(&config.images).default(&mut stack)?;
    Validator::new(platform, cancel, config)
        .validate(&stack)
        .await?;
    debug!("admitted");
    Ok(stack)
}
