//!
//! # Operator configuration loading
//!
//! Settings are applied in the following sequence:
//!     1) default values
//!     2) configuration file, if provided
//!     3) image environment variables for images the file leaves unset
//!
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use tempo_operator_metadata::config::{
    ENV_TEMPO_GATEWAY_IMAGE, ENV_TEMPO_GATEWAY_OPA_IMAGE, ENV_TEMPO_IMAGE, ENV_TEMPO_QUERY_IMAGE,
    ImagesSpec, ProjectConfig, TlsProfileType,
};

use crate::error::ConfigError;

/// load from `path` and the process environment
pub fn load(path: Option<&Path>) -> Result<ProjectConfig, ConfigError> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// load with an explicit environment lookup
pub fn load_with_env(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ProjectConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "loading controller config");
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            parse(&content)?
        }
        None => ProjectConfig::default(),
    };

    let from_env = ImagesSpec {
        tempo: env(ENV_TEMPO_IMAGE).unwrap_or_default(),
        tempo_query: env(ENV_TEMPO_QUERY_IMAGE).unwrap_or_default(),
        tempo_gateway: env(ENV_TEMPO_GATEWAY_IMAGE).unwrap_or_default(),
        tempo_gateway_opa: env(ENV_TEMPO_GATEWAY_OPA_IMAGE).unwrap_or_default(),
    };
    config.images.fill_from(&from_env);

    if config.gates.tls_profile.is_empty() {
        config.gates.tls_profile = TlsProfileType::default().to_string();
    }

    config.validate()?;
    debug!(?config, "controller config loaded");
    Ok(config)
}

/// an empty document is the default configuration
fn parse(content: &str) -> Result<ProjectConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

#[cfg(test)]
mod test {

    use std::collections::HashMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| vars.get(name).map(|value| (*value).to_owned())
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_with_env(
            None,
            env(&[
                (ENV_TEMPO_IMAGE, "docker.io/grafana/tempo:2.3.1"),
                (ENV_TEMPO_QUERY_IMAGE, "docker.io/grafana/tempo-query:2.3.1"),
            ]),
        )
        .expect("config");

        assert_eq!(config.images.tempo, "docker.io/grafana/tempo:2.3.1");
        assert_eq!(config.images.tempo_query, "docker.io/grafana/tempo-query:2.3.1");
        assert_eq!(config.images.tempo_gateway, "");
        assert_eq!(config.gates.tls_profile, "Modern");
    }

    #[test]
    fn test_file_wins_over_env() {
        let mut file = tempfile::NamedTempFile::new().expect("file");
        writeln!(
            file,
            "images:\n  tempo: quay.io/grafana/tempo:1.0.0\nfeatureGates:\n  tlsProfile: Old\n  httpEncryption: true"
        )
        .expect("write");

        let config = load_with_env(
            Some(file.path()),
            env(&[(ENV_TEMPO_IMAGE, "docker.io/grafana/tempo:2.3.1")]),
        )
        .expect("config");
        assert_eq!(config.images.tempo, "quay.io/grafana/tempo:1.0.0");
        assert_eq!(config.gates.tls_profile, "Old");
        assert!(config.gates.http_encryption);
    }

    #[test]
    fn test_invalid_settings() {
        let mut file = tempfile::NamedTempFile::new().expect("file");
        writeln!(file, "featureGates:\n  tlsProfile: abc").expect("write");
        let err = load_with_env(Some(file.path()), env(&[])).expect_err("invalid profile");
        assert_eq!(
            err.to_string(),
            "controller config validation failed: invalid value 'abc' for setting featureGates.tlsProfile (valid values: Old, Intermediate and Modern)"
        );

        let err = load_with_env(None, env(&[(ENV_TEMPO_GATEWAY_IMAGE, "abc@def")]))
            .expect_err("invalid image");
        assert_eq!(
            err.to_string(),
            "controller config validation failed: invalid value 'abc@def': please set the RELATED_IMAGE_TEMPO_GATEWAY environment variable to a valid container image"
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("dir");
        let err = load_with_env(Some(&dir.path().join("missing.yaml")), env(&[]))
            .expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
