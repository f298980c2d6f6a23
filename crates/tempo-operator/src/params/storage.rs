use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use tempo_operator_metadata::stack::{ConditionReason, ObjectStorageSecretType, TempoStack};

use crate::error::{ConfigurationError, FieldError, ReconcileError, join_details};
use crate::platform::{Platform, cancellable, secret_keys, secret_value};

/// key of the CA bundle in the storage CA config map
pub const STORAGE_CA_KEY: &str = "service-ca.crt";

const SECRET_PATH: &str = "spec.storage.secret";
const CA_PATH: &str = "spec.storage.tls.caName";

pub const S3_ENDPOINT: &str = "endpoint";
pub const S3_BUCKET: &str = "bucket";
pub const S3_ACCESS_KEY_ID: &str = "access_key_id";
pub const S3_ACCESS_KEY_SECRET: &str = "access_key_secret";
pub const AZURE_CONTAINER: &str = "container";
pub const AZURE_ACCOUNT_NAME: &str = "account_name";
pub const AZURE_ACCOUNT_KEY: &str = "account_key";
pub const GCS_BUCKET: &str = "bucketname";
pub const GCS_KEY_JSON: &str = "key.json";

fn required_keys(type_: ObjectStorageSecretType) -> &'static [&'static str] {
    match type_ {
        ObjectStorageSecretType::S3 => &[S3_ENDPOINT, S3_BUCKET, S3_ACCESS_KEY_ID, S3_ACCESS_KEY_SECRET],
        ObjectStorageSecretType::Azure => &[AZURE_CONTAINER, AZURE_ACCOUNT_NAME, AZURE_ACCOUNT_KEY],
        ObjectStorageSecretType::Gcs => &[GCS_BUCKET, GCS_KEY_JSON],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Params {
    /// `host[:port]` without scheme
    pub endpoint: String,
    pub bucket: String,
    /// endpoint uses plain http
    pub insecure: bool,
    /// file name of the CA inside the storage CA directory
    pub ca_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureParams {
    pub container: String,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsParams {
    pub bucket: String,
}

/// Resolved object storage location, exactly one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageParams {
    S3(S3Params),
    Azure(AzureParams),
    Gcs(GcsParams),
}

impl StorageParams {
    pub fn backend(&self) -> ObjectStorageSecretType {
        match self {
            Self::S3(_) => ObjectStorageSecretType::S3,
            Self::Azure(_) => ObjectStorageSecretType::Azure,
            Self::Gcs(_) => ObjectStorageSecretType::Gcs,
        }
    }

    /// parameters used when no secret can be read, for offline rendering
    pub fn placeholder(type_: ObjectStorageSecretType) -> Self {
        match type_ {
            ObjectStorageSecretType::S3 => Self::S3(S3Params {
                endpoint: "minio:9000".to_owned(),
                bucket: "tempo".to_owned(),
                insecure: true,
                ca_filename: None,
            }),
            ObjectStorageSecretType::Azure => Self::Azure(AzureParams {
                container: "tempo".to_owned(),
                account_name: "tempo".to_owned(),
            }),
            ObjectStorageSecretType::Gcs => Self::Gcs(GcsParams {
                bucket: "tempo".to_owned(),
            }),
        }
    }
}

/// check a storage secret has every key its backend needs.
///
/// All problems are reported together.
pub fn validate_storage_secret(stack: &TempoStack, secret: &Secret) -> Vec<FieldError> {
    let name = &stack.spec.storage.secret.name;
    let keys = secret_keys(secret);
    if keys.is_empty() {
        return vec![FieldError::invalid(SECRET_PATH, name, "storage secret is empty")];
    }

    let mut errors: Vec<FieldError> = required_keys(stack.spec.storage.secret.type_)
        .iter()
        .filter(|key| !keys.contains(**key))
        .map(|key| {
            FieldError::invalid(
                SECRET_PATH,
                name,
                format!("storage secret must contain \"{key}\" field"),
            )
        })
        .collect();

    if stack.spec.storage.secret.type_ == ObjectStorageSecretType::S3 {
        if let Some(endpoint) = secret_value(secret, S3_ENDPOINT) {
            if parse_endpoint(&endpoint).is_none() {
                errors.push(FieldError::invalid(
                    SECRET_PATH,
                    name,
                    "\"endpoint\" field of storage secret must be a valid URL",
                ));
            }
        }
    }

    errors
}

pub fn validate_ca_config_map(stack: &TempoStack, config_map: &ConfigMap) -> Vec<FieldError> {
    let has_ca = config_map
        .data
        .as_ref()
        .is_some_and(|data| data.contains_key(STORAGE_CA_KEY));
    if has_ca {
        Vec::new()
    } else {
        vec![FieldError::invalid(
            CA_PATH,
            &stack.spec.storage.tls.ca,
            format!("CA ConfigMap must contain a '{STORAGE_CA_KEY}' key"),
        )]
    }
}

/// absolute http or https URL with a host
fn parse_endpoint(endpoint: &str) -> Option<Url> {
    let url = Url::parse(endpoint).ok()?;
    let scheme_ok = matches!(url.scheme(), "http" | "https");
    (scheme_ok && url.host_str().is_some()).then_some(url)
}

fn s3_params(stack: &TempoStack, secret: &Secret) -> S3Params {
    let raw = secret_value(secret, S3_ENDPOINT).unwrap_or_default();
    let (endpoint, insecure) = match parse_endpoint(&raw) {
        Some(url) => {
            let host = url.host_str().unwrap_or_default();
            let endpoint = match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            };
            (endpoint, url.scheme() == "http")
        }
        None => (raw, false),
    };

    S3Params {
        endpoint,
        bucket: secret_value(secret, S3_BUCKET).unwrap_or_default(),
        insecure,
        ca_filename: (!stack.spec.storage.tls.ca.is_empty()).then(|| STORAGE_CA_KEY.to_owned()),
    }
}

fn invalid_storage(message: String) -> ReconcileError {
    ConfigurationError::new(ConditionReason::InvalidStorageConfig, message).into()
}

/// read and check the storage secret and the optional CA config map
pub async fn resolve_storage(
    platform: &dyn Platform,
    cancel: &CancellationToken,
    stack: &TempoStack,
) -> Result<StorageParams, ReconcileError> {
    let namespace = stack.metadata.namespace.as_deref().unwrap_or_default();
    let secret_name = &stack.spec.storage.secret.name;

    let secret = cancellable(cancel, platform.get_secret(namespace, secret_name))
        .await?
        .ok_or_else(|| {
            invalid_storage(format!(
                "could not fetch storage secret: secrets \"{secret_name}\" not found"
            ))
        })?;

    let errors = validate_storage_secret(stack, &secret);
    if !errors.is_empty() {
        return Err(invalid_storage(format!(
            "invalid storage secret: {}",
            join_details(&errors)
        )));
    }

    let ca_name = &stack.spec.storage.tls.ca;
    if !ca_name.is_empty() {
        let config_map = cancellable(cancel, platform.get_config_map(namespace, ca_name))
            .await?
            .ok_or_else(|| {
                invalid_storage(format!(
                    "could not fetch CA config map: configmaps \"{ca_name}\" not found"
                ))
            })?;
        let errors = validate_ca_config_map(stack, &config_map);
        if !errors.is_empty() {
            return Err(invalid_storage(format!(
                "invalid CA config map: {}",
                join_details(&errors)
            )));
        }
    }

    let params = match stack.spec.storage.secret.type_ {
        ObjectStorageSecretType::S3 => StorageParams::S3(s3_params(stack, &secret)),
        ObjectStorageSecretType::Azure => StorageParams::Azure(AzureParams {
            container: secret_value(&secret, AZURE_CONTAINER).unwrap_or_default(),
            account_name: secret_value(&secret, AZURE_ACCOUNT_NAME).unwrap_or_default(),
        }),
        ObjectStorageSecretType::Gcs => StorageParams::Gcs(GcsParams {
            bucket: secret_value(&secret, GCS_BUCKET).unwrap_or_default(),
        }),
    };
    debug!(backend = %params.backend(), "storage resolved");
    Ok(params)
}

#[cfg(test)]
mod test {

    use std::collections::BTreeMap;

    use k8s_openapi::ByteString;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;

    use crate::platform::MemoryPlatform;

    use super::*;

    fn stack(type_: ObjectStorageSecretType) -> TempoStack {
        let mut stack = TempoStack::new("simplest", Default::default());
        stack.metadata.namespace = Some("default".to_owned());
        stack.spec.storage.secret.name = "storage".to_owned();
        stack.spec.storage.secret.type_ = type_;
        stack
    }

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("storage".to_owned()),
                namespace: Some("default".to_owned()),
                ..Default::default()
            },
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_missing_key_is_reported() {
        let stack = stack(ObjectStorageSecretType::S3);
        let errors = validate_storage_secret(&stack, &secret(&[("unrelated", "x")]));
        let details: Vec<_> = errors.iter().map(|e| e.detail.as_str()).collect();
        assert_eq!(
            details,
            vec![
                "storage secret must contain \"endpoint\" field",
                "storage secret must contain \"bucket\" field",
                "storage secret must contain \"access_key_id\" field",
                "storage secret must contain \"access_key_secret\" field",
            ]
        );
        assert!(errors.iter().all(|e| e.path == "spec.storage.secret"));
    }

    #[test]
    fn test_empty_and_malformed() {
        let stack = stack(ObjectStorageSecretType::S3);
        let errors = validate_storage_secret(&stack, &Secret::default());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "storage secret is empty");

        let errors = validate_storage_secret(
            &stack,
            &secret(&[
                ("endpoint", "minio:9000"),
                ("bucket", "tempo"),
                ("access_key_id", "id"),
                ("access_key_secret", "secret"),
            ]),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].detail,
            "\"endpoint\" field of storage secret must be a valid URL"
        );
    }

    #[test]
    fn test_azure_and_gcs_keys() {
        let errors = validate_storage_secret(
            &stack(ObjectStorageSecretType::Azure),
            &secret(&[("container", "c"), ("account_name", "a")]),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail, "storage secret must contain \"account_key\" field");

        let errors = validate_storage_secret(
            &stack(ObjectStorageSecretType::Gcs),
            &secret(&[("bucketname", "b"), ("key.json", "{}")]),
        );
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_s3() {
        let platform = MemoryPlatform::new();
        platform
            .insert(secret(&[
                ("endpoint", "http://minio.minio.svc:9000"),
                ("bucket", "tempo"),
                ("access_key_id", "id"),
                ("access_key_secret", "secret"),
            ]))
            .await;

        let params = resolve_storage(
            &platform,
            &CancellationToken::new(),
            &stack(ObjectStorageSecretType::S3),
        )
        .await
        .expect("resolved");
        assert_eq!(
            params,
            StorageParams::S3(S3Params {
                endpoint: "minio.minio.svc:9000".to_owned(),
                bucket: "tempo".to_owned(),
                insecure: true,
                ca_filename: None,
            })
        );
    }

    #[tokio::test]
    async fn test_resolve_reports_configuration_errors() {
        let platform = MemoryPlatform::new();
        let cancel = CancellationToken::new();
        let mut stack = stack(ObjectStorageSecretType::S3);

        let err = resolve_storage(&platform, &cancel, &stack)
            .await
            .expect_err("missing");
        let ReconcileError::Configuration(err) = err else {
            panic!("expected a configuration error");
        };
        assert_eq!(err.reason, ConditionReason::InvalidStorageConfig);
        assert_eq!(
            err.message,
            "could not fetch storage secret: secrets \"storage\" not found"
        );

        platform
            .insert(secret(&[
                ("endpoint", "https://s3.amazonaws.com"),
                ("bucket", "tempo"),
                ("access_key_id", "id"),
                ("access_key_secret", "secret"),
            ]))
            .await;
        stack.spec.storage.tls.ca = "storage-ca".to_owned();
        platform
            .insert(ConfigMap {
                metadata: ObjectMeta {
                    name: Some("storage-ca".to_owned()),
                    namespace: Some("default".to_owned()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([("ca.crt".to_owned(), "pem".to_owned())])),
                ..Default::default()
            })
            .await;

        let err = resolve_storage(&platform, &cancel, &stack)
            .await
            .expect_err("bad ca");
        assert_eq!(
            err.to_string(),
            "invalid CA config map: CA ConfigMap must contain a 'service-ca.crt' key"
        );
    }
}
