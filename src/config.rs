//! Provisioner configuration decoding and validation.
//!
//! The host hands the provisioner one or more raw key/value maps (template
//! expressions already resolved). They are merged left to right, decoded
//! into a flat [`RawConfig`] that rejects unknown keys, and validated into a
//! [`ProvisionerConfig`] that is ready to use.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::time::Duration;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::warn;
use url::Url;

use crate::duration::parse_duration;
use crate::error::{ErrorKind, ProvisionError};

/// Timeout applied to the storage fetch when none (or an unusable one) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Flat view of every key the provisioner accepts.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    // Build metadata injected by the host.
    #[serde(default)]
    packer_build_name: Option<String>,
    #[serde(default)]
    packer_builder_type: Option<String>,
    #[serde(default)]
    packer_debug: bool,
    #[serde(default)]
    packer_force: bool,
    #[serde(default)]
    packer_on_error: Option<String>,
    #[serde(default)]
    packer_user_variables: BTreeMap<String, String>,
    #[serde(default)]
    packer_sensitive_variables: Vec<String>,

    // Shared cloud access block.
    #[serde(default)]
    access_key: String,
    #[serde(default)]
    secret_key: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    custom_endpoint_s3: Option<String>,

    #[serde(default)]
    bucket: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    local_path: String,
    #[serde(default)]
    timeout: String,
}

/// Credentials and endpoint settings for the storage session.
///
/// The `Debug` implementation masks the secret fields.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccessConfig {
    pub access_key: String,
    pub secret_key: String,
    /// Session token for temporary credentials.
    pub token: String,
    /// Region override; the environment (or `us-east-1`) is used when unset.
    pub region: Option<String>,
    /// Endpoint for S3-compatible services such as MinIO.
    pub custom_endpoint_s3: Option<Url>,
}

impl AccessConfig {
    /// Returns the non-empty credential values that must never be logged.
    pub fn sensitive_values(&self) -> impl Iterator<Item = &str> {
        [
            self.access_key.as_str(),
            self.secret_key.as_str(),
            self.token.as_str(),
        ]
        .into_iter()
        .filter(|v| !v.is_empty())
    }
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "<sensitive>" }
}

impl fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessConfig")
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("token", &mask(&self.token))
            .field("region", &self.region)
            .field("custom_endpoint_s3", &self.custom_endpoint_s3.as_ref().map(Url::as_str))
            .finish()
    }
}

/// Build metadata supplied by the host for every provisioner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub build_name: Option<String>,
    pub builder_type: Option<String>,
    pub debug: bool,
    pub force: bool,
    pub on_error: Option<String>,
    pub user_variables: BTreeMap<String, String>,
    /// Names of user variables whose values are sensitive.
    pub sensitive_variables: Vec<String>,
}

impl BuildInfo {
    /// Returns the non-empty values of user variables flagged as sensitive.
    pub fn sensitive_values(&self) -> impl Iterator<Item = &str> {
        self.sensitive_variables
            .iter()
            .filter_map(|name| self.user_variables.get(name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Validated provisioner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Bucket holding the object.
    pub bucket: String,
    /// Key of the object within the bucket (config key `key`).
    pub object_key: String,
    /// Destination path on the target.
    pub local_path: Utf8PathBuf,
    /// Upper bound for the storage fetch. Always positive.
    pub timeout: Duration,
    pub access: AccessConfig,
    pub build: BuildInfo,
}

impl ProvisionerConfig {
    /// Merges, decodes and validates the host-supplied raw maps.
    ///
    /// Fails with [`ErrorKind::InvalidArgument`] when decoding fails or when
    /// `bucket`, `key` or `local_path` is empty, checked in that order.
    pub fn decode(raws: &[Value]) -> Result<Self, ProvisionError> {
        let merged = merge_raws(raws)?;
        let raw: RawConfig = serde_yaml::from_value(Value::Mapping(merged)).map_err(|e| {
            ProvisionError::wrap(ErrorKind::InvalidArgument, e, "unable to decode options")
        })?;

        if raw.bucket.is_empty() {
            return Err(ProvisionError::invalid_argument("`bucket` is required"));
        }
        if raw.key.is_empty() {
            return Err(ProvisionError::invalid_argument("`key` is required"));
        }
        if raw.local_path.is_empty() {
            return Err(ProvisionError::invalid_argument("`local_path` is required"));
        }

        let custom_endpoint_s3 = match raw.custom_endpoint_s3.as_deref() {
            None | Some("") => None,
            Some(endpoint) => Some(Url::parse(endpoint).map_err(|e| {
                ProvisionError::wrap(
                    ErrorKind::InvalidArgument,
                    e,
                    format!("`custom_endpoint_s3` is not a valid URL: {}", endpoint),
                )
            })?),
        };

        Ok(Self {
            bucket: raw.bucket,
            object_key: raw.key,
            local_path: Utf8PathBuf::from(raw.local_path),
            timeout: resolve_timeout(&raw.timeout),
            access: AccessConfig {
                access_key: raw.access_key,
                secret_key: raw.secret_key,
                token: raw.token,
                region: raw.region.filter(|r| !r.is_empty()),
                custom_endpoint_s3,
            },
            build: BuildInfo {
                build_name: raw.packer_build_name,
                builder_type: raw.packer_builder_type,
                debug: raw.packer_debug,
                force: raw.packer_force,
                on_error: raw.packer_on_error,
                user_variables: raw.packer_user_variables,
                sensitive_variables: raw.packer_sensitive_variables,
            },
        })
    }

    /// Returns every value that must be registered for log redaction.
    pub fn sensitive_values(&self) -> impl Iterator<Item = &str> {
        self.access
            .sensitive_values()
            .chain(self.build.sensitive_values())
    }
}

/// Resolves the configured timeout string.
///
/// An empty string selects [`DEFAULT_TIMEOUT`]. Unparsable, zero or negative
/// values fall back to the default as well, with a warning.
fn resolve_timeout(raw: &str) -> Duration {
    if raw.is_empty() {
        return DEFAULT_TIMEOUT;
    }
    match parse_duration(raw) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        Ok(_) => {
            warn!("timeout {:?} is zero, using default of {:?}", raw, DEFAULT_TIMEOUT);
            DEFAULT_TIMEOUT
        }
        Err(e) => {
            warn!("{}, using default timeout of {:?}", e, DEFAULT_TIMEOUT);
            DEFAULT_TIMEOUT
        }
    }
}

/// Merges raw maps left to right; later keys override earlier ones.
///
/// `null` entries are skipped. Any other non-mapping value is a decode error.
pub fn merge_raws(raws: &[Value]) -> Result<Mapping, ProvisionError> {
    let mut merged = Mapping::new();
    for (index, raw) in raws.iter().enumerate() {
        match raw {
            Value::Null => continue,
            Value::Mapping(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(ProvisionError::invalid_argument(format!(
                    "unable to decode options: raw configuration {} is not a map (got {})",
                    index + 1,
                    value_type_name(other)
                )));
            }
        }
    }
    Ok(merged)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "map",
        Value::Tagged(_) => "tagged value",
    }
}

/// Loads raw configuration maps from a YAML file.
///
/// The document may be a single map or a sequence of maps, the latter being
/// treated as several raws in order.
pub fn load_raws(path: &Utf8Path) -> anyhow::Result<Vec<Value>> {
    let file = File::open(path).with_context(|| format!("failed to load file: {}", path))?;
    let reader = BufReader::new(file);
    let document: Value = serde_yaml::from_reader(reader)
        .with_context(|| format!("failed to parse yaml: {}", path))?;
    Ok(match document {
        Value::Sequence(raws) => raws,
        other => vec![other],
    })
}
