use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use serde::{Deserialize, Serialize};

/// Observed state reported back by the operator
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempoStackStatus {
    /// operator version which last upgraded the instance
    #[serde(skip_serializing_if = "String::is_empty")]
    pub operator_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tempo_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl TempoStackStatus {
    pub fn condition(&self, type_: ConditionStatus) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_.as_str())
    }

    /// the condition currently `True`, if any
    pub fn active_condition(&self) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.status == "True")
    }
}

/// Condition types, exactly one is `True` at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    Ready,
    ConfigurationError,
    Failed,
    Pending,
}

impl ConditionStatus {
    pub const ALL: [ConditionStatus; 4] = [
        Self::Ready,
        Self::ConfigurationError,
        Self::Failed,
        Self::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::ConfigurationError => "ConfigurationError",
            Self::Failed => "Failed",
            Self::Pending => "Pending",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine readable cause attached to a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionReason {
    Ready,
    FailedReconciliation,
    PendingComponents,
    InvalidStorageConfig,
    InvalidTenantsConfiguration,
    MissingGatewayTenantSecret,
    InvalidTLSProfile,
    CouldNotGetOpenShiftBaseDomain,
    CouldNotGetOpenShiftTLSPolicy,
    InvalidSpec,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::FailedReconciliation => "FailedReconciliation",
            Self::PendingComponents => "PendingComponents",
            Self::InvalidStorageConfig => "InvalidStorageConfig",
            Self::InvalidTenantsConfiguration => "InvalidTenantsConfiguration",
            Self::MissingGatewayTenantSecret => "MissingGatewayTenantSecret",
            Self::InvalidTLSProfile => "InvalidTLSProfile",
            Self::CouldNotGetOpenShiftBaseDomain => "CouldNotGetOpenShiftBaseDomain",
            Self::CouldNotGetOpenShiftTLSPolicy => "CouldNotGetOpenShiftTLSPolicy",
            Self::InvalidSpec => "InvalidSpec",
        }
    }
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
