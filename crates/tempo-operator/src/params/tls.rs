use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tempo_operator_metadata::config::{FeatureGates, TlsProfileType};
use tempo_operator_metadata::stack::ConditionReason;

use crate::error::{ConfigurationError, PlatformError, ReconcileError};
use crate::platform::{ClusterTlsProfile, Platform, cancellable};

const VERSION_TLS10: &str = "VersionTLS10";
const VERSION_TLS11: &str = "VersionTLS11";
const VERSION_TLS12: &str = "VersionTLS12";
const VERSION_TLS13: &str = "VersionTLS13";

/// OpenSSL cipher names with their IANA equivalent
const OPENSSL_TO_IANA: &[(&str, &str)] = &[
    ("TLS_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256"),
    ("TLS_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384"),
    ("TLS_CHACHA20_POLY1305_SHA256", "TLS_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-ECDSA-AES128-GCM-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-RSA-AES128-GCM-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"),
    ("ECDHE-ECDSA-AES256-GCM-SHA384", "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-RSA-AES256-GCM-SHA384", "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384"),
    ("ECDHE-ECDSA-CHACHA20-POLY1305", "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-RSA-CHACHA20-POLY1305", "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256"),
    ("ECDHE-ECDSA-AES128-SHA256", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-RSA-AES128-SHA256", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256"),
    ("ECDHE-ECDSA-AES128-SHA", "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-RSA-AES128-SHA", "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"),
    ("ECDHE-ECDSA-AES256-SHA", "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA"),
    ("ECDHE-RSA-AES256-SHA", "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA"),
    ("AES128-GCM-SHA256", "TLS_RSA_WITH_AES_128_GCM_SHA256"),
    ("AES256-GCM-SHA384", "TLS_RSA_WITH_AES_256_GCM_SHA384"),
    ("AES128-SHA256", "TLS_RSA_WITH_AES_128_CBC_SHA256"),
    ("AES128-SHA", "TLS_RSA_WITH_AES_128_CBC_SHA"),
    ("AES256-SHA", "TLS_RSA_WITH_AES_256_CBC_SHA"),
    ("DES-CBC3-SHA", "TLS_RSA_WITH_3DES_EDE_CBC_SHA"),
];

const MODERN_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
];

const INTERMEDIATE_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
];

const OLD_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
    "DHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES128-SHA256",
    "ECDHE-RSA-AES128-SHA256",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-ECDSA-AES256-SHA384",
    "ECDHE-RSA-AES256-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-AES128-SHA256",
    "DHE-RSA-AES256-SHA256",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA256",
    "AES256-SHA256",
    "AES128-SHA",
    "AES256-SHA",
    "DES-CBC3-SHA",
];

/// Minimum protocol version and ordered cipher suites used by every TLS endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsProfile {
    /// `VersionTLS1x`
    pub min_tls_version: String,
    /// OpenSSL names, in preference order
    pub ciphers: Vec<String>,
}

impl Default for TlsProfile {
    fn default() -> Self {
        Self::named(TlsProfileType::Modern)
    }
}

impl TlsProfile {
    pub fn named(profile: TlsProfileType) -> Self {
        let (min_tls_version, ciphers) = match profile {
            TlsProfileType::Old => (VERSION_TLS10, OLD_CIPHERS),
            TlsProfileType::Intermediate => (VERSION_TLS12, INTERMEDIATE_CIPHERS),
            TlsProfileType::Modern => (VERSION_TLS13, MODERN_CIPHERS),
        };
        Self {
            min_tls_version: min_tls_version.to_owned(),
            ciphers: ciphers.iter().map(|c| (*c).to_owned()).collect(),
        }
    }

    /// `1.0`, `1.1`, `1.2` or `1.3`
    pub fn min_version_short(&self) -> Option<&'static str> {
        match self.min_tls_version.as_str() {
            VERSION_TLS10 => Some("1.0"),
            VERSION_TLS11 => Some("1.1"),
            VERSION_TLS12 => Some("1.2"),
            VERSION_TLS13 => Some("1.3"),
            _ => None,
        }
    }

    /// IANA names of the ciphers, dropping those without one
    pub fn iana_ciphers(&self) -> Vec<&'static str> {
        self.ciphers
            .iter()
            .filter_map(|cipher| {
                OPENSSL_TO_IANA
                    .iter()
                    .find(|(openssl, _)| openssl == cipher)
                    .map(|(_, iana)| *iana)
            })
            .collect()
    }
}

/// map the API server profile, unknown types are reported as unavailable
fn from_cluster(profile: Option<ClusterTlsProfile>) -> Result<TlsProfile, PlatformError> {
    let Some(profile) = profile else {
        debug!("cluster has no TLS profile, using Intermediate");
        return Ok(TlsProfile::named(TlsProfileType::Intermediate));
    };

    match profile.type_.as_str() {
        "" | "Intermediate" => Ok(TlsProfile::named(TlsProfileType::Intermediate)),
        "Old" => Ok(TlsProfile::named(TlsProfileType::Old)),
        "Modern" => Ok(TlsProfile::named(TlsProfileType::Modern)),
        "Custom" => {
            let custom = TlsProfile {
                min_tls_version: profile.min_tls_version,
                ciphers: profile.ciphers,
            };
            if custom.min_version_short().is_none() {
                return Err(PlatformError::Unavailable(format!(
                    "cluster TLS profile has unknown minimum version '{}'",
                    custom.min_tls_version
                )));
            }
            Ok(custom)
        }
        other => Err(PlatformError::Unavailable(format!(
            "unknown cluster TLS profile type '{other}'"
        ))),
    }
}

/// TLS profile for this cycle.
///
/// Lookup failures against the cluster are retried later, an invalid profile name
/// in the operator configuration is for the user to fix.
pub async fn resolve_tls_profile(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    gates: &FeatureGates,
) -> Result<TlsProfile, ReconcileError> {
    if gates.openshift.cluster_tls_policy {
        let cluster = cancellable(cancel, platform.cluster_tls_profile()).await?;
        let profile = from_cluster(cluster)?;
        info!(min_version = %profile.min_tls_version, "using cluster TLS profile");
        return Ok(profile);
    }

    let profile_type = gates.tls_profile.parse::<TlsProfileType>().map_err(|err| {
        ConfigurationError::new(ConditionReason::InvalidTLSProfile, err.to_string())
    })?;
    Ok(TlsProfile::named(profile_type))
}

#[cfg(test)]
mod test {

    use crate::platform::{MemoryPlatform, Operation};

    use super::*;

    #[test]
    fn test_modern_profile() {
        let profile = TlsProfile::named(TlsProfileType::Modern);
        assert_eq!(profile.min_tls_version, "VersionTLS13");
        assert_eq!(profile.min_version_short(), Some("1.3"));
        assert_eq!(
            profile.iana_ciphers(),
            vec![
                "TLS_AES_128_GCM_SHA256",
                "TLS_AES_256_GCM_SHA384",
                "TLS_CHACHA20_POLY1305_SHA256"
            ]
        );
    }

    #[test]
    fn test_intermediate_drops_unmapped_ciphers() {
        let profile = TlsProfile::named(TlsProfileType::Intermediate);
        let iana = profile.iana_ciphers();
        assert_eq!(iana.len(), 9);
        assert!(iana.iter().all(|cipher| cipher.starts_with("TLS_")));
        assert_eq!(profile.min_version_short(), Some("1.2"));
    }

    #[tokio::test]
    async fn test_invalid_profile_name() {
        let platform = MemoryPlatform::new();
        let gates = FeatureGates {
            tls_profile: "Bogus".to_owned(),
            ..Default::default()
        };

        let err = resolve_tls_profile(&platform, &CancellationToken::new(), &gates)
            .await
            .expect_err("invalid");
        let ReconcileError::Configuration(err) = err else {
            panic!("expected a configuration error");
        };
        assert_eq!(err.reason, ConditionReason::InvalidTLSProfile);
        assert_eq!(
            err.message,
            "invalid value 'Bogus' for setting featureGates.tlsProfile (valid values: Old, Intermediate and Modern)"
        );
    }

    #[tokio::test]
    async fn test_cluster_profile() {
        let mut gates = FeatureGates::default();
        gates.openshift.cluster_tls_policy = true;
        let cancel = CancellationToken::new();

        let platform = MemoryPlatform::new();
        let profile = resolve_tls_profile(&platform, &cancel, &gates)
            .await
            .expect("default");
        assert_eq!(profile.min_tls_version, "VersionTLS12");

        let platform = MemoryPlatform::new().with_cluster_tls_profile(ClusterTlsProfile {
            type_: "Custom".to_owned(),
            ciphers: vec!["ECDHE-RSA-AES128-GCM-SHA256".to_owned()],
            min_tls_version: "VersionTLS12".to_owned(),
        });
        let profile = resolve_tls_profile(&platform, &cancel, &gates)
            .await
            .expect("custom");
        assert_eq!(profile.iana_ciphers(), vec!["TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"]);

        let platform = MemoryPlatform::new().with_cluster_tls_profile(ClusterTlsProfile {
            type_: "Paranoid".to_owned(),
            ..Default::default()
        });
        let err = resolve_tls_profile(&platform, &cancel, &gates)
            .await
            .expect_err("unknown");
        assert!(err.is_transient());

        let platform = MemoryPlatform::new();
        platform
            .fail_next(
                Operation::ClusterTlsProfile,
                PlatformError::Unavailable("timeout".to_owned()),
            )
            .await;
        let err = resolve_tls_profile(&platform, &cancel, &gates)
            .await
            .expect_err("unreachable");
        assert!(err.is_transient());
    }
}
