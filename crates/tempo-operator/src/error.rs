use std::fmt;

use thiserror::Error;

use tempo_operator_metadata::quantity::QuantityError;
use tempo_operator_metadata::stack::ConditionReason;

/// Failures talking to the platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// transport or API server failure
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
    /// optimistic concurrency check failed
    #[error("conflict writing {0}: object was modified")]
    Conflict(String),
    /// create found an object of the same name
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// caller abandoned the cycle
    #[error("operation cancelled")]
    Cancelled,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// platform could not answer, try again later
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Kube(kube::Error::Api(response)) => {
                response.code == 409 && response.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}

/// User fixable problem, recorded in the status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub reason: ConditionReason,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(reason: ConditionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Outcome of a failed reconcile cycle
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transient(#[from] PlatformError),
    /// the operator produced or received something it never should
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl ReconcileError {
    /// retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<TemplateError> for ReconcileError {
    fn from(err: TemplateError) -> Self {
        Self::Invariant(err.to_string())
    }
}

/// Template registry failures
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to load template {name}: {source}")]
    Load {
        name: &'static str,
        source: minijinja::Error,
    },
    #[error("failed to render {name}: {source}")]
    Render {
        name: &'static str,
        source: minijinja::Error,
    },
}

/// The desired set could not be built from the instance
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid resources.total: {0}")]
    Resources(#[from] QuantityError),
    /// the gateway is enabled but no tenants configuration was rendered
    #[error("gateway is enabled without a rendered tenants configuration")]
    MissingGatewayConfig,
}

impl From<ManifestError> for ReconcileError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Resources(_) => Self::Configuration(ConfigurationError::new(
                ConditionReason::InvalidSpec,
                err.to_string(),
            )),
            ManifestError::MissingGatewayConfig => Self::Invariant(err.to_string()),
        }
    }
}

/// Failures filling defaults at admission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefaultingError {
    #[error("please specify a tempo image in the CR or in the operator configuration")]
    NoDefaultTempoImage,
    #[error("please specify a tempo-query image in the CR or in the operator configuration")]
    NoDefaultTempoQueryImage,
}

impl From<DefaultingError> for ReconcileError {
    fn from(err: DefaultingError) -> Self {
        Self::Configuration(ConfigurationError::new(
            ConditionReason::InvalidSpec,
            err.to_string(),
        ))
    }
}

/// One invalid field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub value: String,
    pub detail: String,
}

impl FieldError {
    pub fn invalid(path: impl Into<String>, value: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: Invalid value: \"{}\": {}",
            self.path, self.value, self.detail
        )
    }
}

/// All invalid fields of one object, reported together
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors {
    pub name: String,
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// details joined the way condition messages expect them
    pub fn details(&self) -> String {
        join_details(&self.errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempoStack.tempo.grafana.com \"{}\" is invalid: ", self.name)?;
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single}");
        }
        f.write_str("[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str("]")
    }
}

/// Rejection of an instance at admission
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Defaulting(#[from] DefaultingError),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    /// a referenced object could not be looked up
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub fn join_details(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|err| err.detail.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Loading or validating the operator configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read controller config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse controller config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("controller config validation failed: {0}")]
    Validation(#[from] tempo_operator_metadata::config::ProjectConfigError),
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_validation_errors_display() {
        let errors = ValidationErrors {
            name: "simplest".to_owned(),
            errors: vec![
                FieldError::invalid("spec.ReplicationFactor", 3, "replica factor of 3 requires at least 2 ingester replicas"),
                FieldError::invalid("spec.serviceAccount", "abc", "service account not found"),
            ],
        };
        assert_eq!(
            errors.to_string(),
            "TempoStack.tempo.grafana.com \"simplest\" is invalid: [spec.ReplicationFactor: Invalid value: \"3\": replica factor of 3 requires at least 2 ingester replicas, spec.serviceAccount: Invalid value: \"abc\": service account not found]"
        );
        assert_eq!(
            errors.details(),
            "replica factor of 3 requires at least 2 ingester replicas, service account not found"
        );
    }

    #[test]
    fn test_classification() {
        let transient = ReconcileError::from(PlatformError::Unavailable("timeout".to_owned()));
        assert!(transient.is_transient());

        let config = ReconcileError::from(ConfigurationError::new(
            ConditionReason::InvalidStorageConfig,
            "invalid storage secret",
        ));
        assert!(!config.is_transient());
        assert_eq!(config.to_string(), "invalid storage secret");

        assert!(PlatformError::Conflict("x".to_owned()).is_conflict());
    }
}
