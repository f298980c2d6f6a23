//!
//! # Project configuration
//!
//! Operator wide settings: the default container images and the feature gates which
//! switch platform integrations on and off.
//!
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::GoDuration;
use crate::is_false;

pub const ENV_TEMPO_IMAGE: &str = "RELATED_IMAGE_TEMPO";
pub const ENV_TEMPO_QUERY_IMAGE: &str = "RELATED_IMAGE_TEMPO_QUERY";
pub const ENV_TEMPO_GATEWAY_IMAGE: &str = "RELATED_IMAGE_TEMPO_GATEWAY";
pub const ENV_TEMPO_GATEWAY_OPA_IMAGE: &str = "RELATED_IMAGE_TEMPO_GATEWAY_OPA";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectConfigError {
    #[error(
        "invalid value '{0}' for setting featureGates.tlsProfile (valid values: Old, Intermediate and Modern)"
    )]
    InvalidTlsProfile(String),
    #[error("invalid value '{image}': please set the {env} environment variable to a valid container image")]
    InvalidImage { image: String, env: &'static str },
}

/// Container images used for each managed container
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImagesSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tempo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tempo_query: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tempo_gateway: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tempo_gateway_opa: String,
}

impl ImagesSpec {
    /// images paired with the environment variable providing their default
    pub fn with_env_names(&self) -> [(&str, &'static str); 4] {
        [
            (self.tempo.as_str(), ENV_TEMPO_IMAGE),
            (self.tempo_query.as_str(), ENV_TEMPO_QUERY_IMAGE),
            (self.tempo_gateway.as_str(), ENV_TEMPO_GATEWAY_IMAGE),
            (self.tempo_gateway_opa.as_str(), ENV_TEMPO_GATEWAY_OPA_IMAGE),
        ]
    }

    /// fill unset images from `defaults`
    pub fn fill_from(&mut self, defaults: &ImagesSpec) {
        let pairs = [
            (&mut self.tempo, &defaults.tempo),
            (&mut self.tempo_query, &defaults.tempo_query),
            (&mut self.tempo_gateway, &defaults.tempo_gateway),
            (&mut self.tempo_gateway_opa, &defaults.tempo_gateway_opa),
        ];
        for (image, default) in pairs {
            if image.is_empty() {
                image.clone_from(default);
            }
        }
    }
}

/// Named TLS security profile
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsProfileType {
    Old,
    Intermediate,
    #[default]
    Modern,
}

impl TlsProfileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Old => "Old",
            Self::Intermediate => "Intermediate",
            Self::Modern => "Modern",
        }
    }
}

impl fmt::Display for TlsProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsProfileType {
    type Err = ProjectConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Old" => Ok(Self::Old),
            "Intermediate" => Ok(Self::Intermediate),
            "Modern" => Ok(Self::Modern),
            other => Err(ProjectConfigError::InvalidTlsProfile(other.to_owned())),
        }
    }
}

/// Feature gates only meaningful on OpenShift clusters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenShiftFeatureGates {
    /// annotate services so the platform CA issues serving certificates
    #[serde(skip_serializing_if = "is_false")]
    pub serving_certs_service: bool,
    /// allow Route objects instead of Ingress
    #[serde(rename = "openshiftRoute", skip_serializing_if = "is_false")]
    pub openshift_route: bool,
    /// domain used for gateway redirect URLs, derived from the cluster when empty
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_domain: String,
    /// take the TLS profile from the cluster API server
    #[serde(rename = "clusterTLSPolicy", skip_serializing_if = "is_false")]
    pub cluster_tls_policy: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuiltInCertManagement {
    #[serde(skip_serializing_if = "is_false")]
    pub enabled: bool,
    #[serde(rename = "caValidity", skip_serializing_if = "GoDuration::is_zero")]
    pub ca_cert_validity: GoDuration,
    #[serde(rename = "caRefresh", skip_serializing_if = "GoDuration::is_zero")]
    pub ca_cert_refresh: GoDuration,
    #[serde(skip_serializing_if = "GoDuration::is_zero")]
    pub cert_validity: GoDuration,
    #[serde(skip_serializing_if = "GoDuration::is_zero")]
    pub cert_refresh: GoDuration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureGates {
    pub openshift: OpenShiftFeatureGates,
    #[serde(rename = "builtInCertManagement")]
    pub built_in_cert_management: BuiltInCertManagement,
    #[serde(skip_serializing_if = "is_false")]
    pub http_encryption: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub grpc_encryption: bool,
    /// one of Old, Intermediate or Modern
    #[serde(rename = "tlsProfile")]
    pub tls_profile: String,
    #[serde(skip_serializing_if = "is_false")]
    pub prometheus_operator: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub grafana_operator: bool,
}

/// Operator configuration file
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub images: ImagesSpec,
    #[serde(rename = "featureGates")]
    pub gates: FeatureGates,
}

impl ProjectConfig {
    /// check the loaded configuration, reporting the first problem found
    pub fn validate(&self) -> Result<(), ProjectConfigError> {
        self.gates.tls_profile.parse::<TlsProfileType>()?;

        for (image, env) in self.images.with_env_names() {
            if !image.is_empty() && !is_valid_image_reference(image) {
                return Err(ProjectConfigError::InvalidImage {
                    image: image.to_owned(),
                    env,
                });
            }
        }

        Ok(())
    }
}

/// check `[registry/]path[:tag][@algorithm:digest]`
pub fn is_valid_image_reference(reference: &str) -> bool {
    let (name_and_tag, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };

    if let Some(digest) = digest {
        let Some((algorithm, hex)) = digest.split_once(':') else {
            return false;
        };
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
        if !algorithm_ok || hex.len() < 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
    }

    // a colon after the last slash separates the tag
    let last_slash = name_and_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
        Some(i) => (
            &name_and_tag[..last_slash + i],
            Some(&name_and_tag[last_slash + i + 1..]),
        ),
        None => (name_and_tag, None),
    };

    if let Some(tag) = tag {
        let valid_tag = !tag.is_empty()
            && tag.len() <= 128
            && tag
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));
        if !valid_tag {
            return false;
        }
    }

    if name.is_empty() {
        return false;
    }

    let mut components = name.split('/').peekable();
    let mut first = true;
    while let Some(component) = components.next() {
        let is_registry = first
            && components.peek().is_some()
            && (component.contains('.') || component.contains(':') || component == "localhost");
        first = false;
        let valid = if is_registry {
            !component.is_empty()
                && component
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || ".-:".contains(c))
        } else {
            is_valid_path_component(component)
        };
        if !valid {
            return false;
        }
    }

    true
}

fn is_valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    alnum(first)
        && alnum(last)
        && bytes
            .iter()
            .all(|b| alnum(b) || matches!(b, b'.' | b'_' | b'-'))
}

#[cfg(test)]
mod test {

    use super::*;

    fn valid_images() -> ImagesSpec {
        ImagesSpec {
            tempo: "docker.io/grafana/tempo:latest".to_owned(),
            tempo_query: "docker.io/grafana/tempo-query:latest".to_owned(),
            tempo_gateway: "quay.io/observatorium/api:latest".to_owned(),
            tempo_gateway_opa: "quay.io/observatorium/opa-openshift:latest".to_owned(),
        }
    }

    #[test]
    fn test_validate_tls_profile() {
        let mut config = ProjectConfig {
            images: valid_images(),
            ..Default::default()
        };
        config.gates.tls_profile = "Modern".to_owned();
        assert_eq!(config.validate(), Ok(()));

        config.gates.tls_profile = "abc".to_owned();
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "invalid value 'abc' for setting featureGates.tlsProfile (valid values: Old, Intermediate and Modern)"
        );

        let empty = ProjectConfig::default();
        assert_eq!(
            empty.validate().unwrap_err().to_string(),
            "invalid value '' for setting featureGates.tlsProfile (valid values: Old, Intermediate and Modern)"
        );
    }

    #[test]
    fn test_validate_images() {
        let mut config = ProjectConfig {
            images: valid_images(),
            ..Default::default()
        };
        config.gates.tls_profile = "Modern".to_owned();
        config.images.tempo = "abc@def".to_owned();

        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "invalid value 'abc@def': please set the RELATED_IMAGE_TEMPO environment variable to a valid container image"
        );
    }

    #[test]
    fn test_image_reference() {
        assert!(is_valid_image_reference("docker.io/grafana/tempo:1.5.0"));
        assert!(is_valid_image_reference("tempo"));
        assert!(is_valid_image_reference("localhost:5000/tempo:dev"));
        assert!(is_valid_image_reference(
            "quay.io/observatorium/api@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"
        ));
        assert!(!is_valid_image_reference("abc@def"));
        assert!(!is_valid_image_reference("Docker/Tempo"));
        assert!(!is_valid_image_reference("tempo:"));
        assert!(!is_valid_image_reference(""));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
images:
  tempo: docker.io/grafana/tempo:2.0.0
featureGates:
  openshift:
    openshiftRoute: true
    clusterTLSPolicy: true
  builtInCertManagement:
    enabled: true
    caValidity: 43830h
  tlsProfile: Old
  prometheusOperator: true
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.images.tempo, "docker.io/grafana/tempo:2.0.0");
        assert!(config.gates.openshift.openshift_route);
        assert!(config.gates.openshift.cluster_tls_policy);
        assert!(config.gates.built_in_cert_management.enabled);
        assert_eq!(
            config.gates.built_in_cert_management.ca_cert_validity,
            GoDuration::from_hours(43830)
        );
        assert_eq!(config.gates.tls_profile, "Old");
        assert!(config.gates.prometheus_operator);
        assert!(!config.gates.grafana_operator);
    }
}
