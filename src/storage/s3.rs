//! S3 session factory using [`object_store::aws::AmazonS3Builder`].
//!
//! Works with AWS S3, MinIO, and any S3-compatible service.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::{CredentialProvider, RetryConfig};
use tracing::debug;

use super::{ObjectBody, SessionFactory, StorageSession, get_from_store};
use crate::config::AccessConfig;

/// Opens S3 sessions from the provisioner's access configuration.
///
/// By default the standard `AWS_*` environment variables seed the client
/// (region, instance credentials, endpoint), and explicitly configured
/// values take precedence. Opening a session resolves the credentials, so a
/// missing credential source is reported before any object is requested.
#[derive(Debug, Clone)]
pub struct S3SessionFactory {
    from_env: bool,
    metadata_endpoint: Option<String>,
    retry: Option<RetryConfig>,
}

impl Default for S3SessionFactory {
    fn default() -> Self {
        Self {
            from_env: true,
            metadata_endpoint: None,
            retry: None,
        }
    }
}

impl S3SessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignores `AWS_*` environment variables.
    pub fn without_env() -> Self {
        Self {
            from_env: false,
            ..Self::default()
        }
    }

    /// Overrides the instance metadata endpoint used for instance credentials.
    #[must_use]
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the retry policy for credential and object requests.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    fn builder(&self, access: &AccessConfig) -> Result<AmazonS3Builder> {
        match (access.access_key.is_empty(), access.secret_key.is_empty()) {
            (false, true) => bail!("access_key is set but secret_key is missing"),
            (true, false) => bail!("secret_key is set but access_key is missing"),
            _ => {}
        }
        if !access.token.is_empty() && access.access_key.is_empty() {
            bail!("token requires access_key and secret_key");
        }

        let mut builder = if self.from_env {
            AmazonS3Builder::from_env()
        } else {
            AmazonS3Builder::new()
        };

        if let Some(endpoint) = &self.metadata_endpoint {
            builder = builder.with_metadata_endpoint(endpoint);
        }
        if let Some(retry) = &self.retry {
            builder = builder.with_retry(retry.clone());
        }

        if let Some(region) = &access.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &access.custom_endpoint_s3 {
            builder = builder.with_endpoint(endpoint.as_str());
            if endpoint.scheme() == "http" {
                builder = builder.with_allow_http(true);
            }
        }

        if !access.access_key.is_empty() {
            builder = builder
                .with_access_key_id(&access.access_key)
                .with_secret_access_key(&access.secret_key);
        }

        if !access.token.is_empty() {
            builder = builder.with_token(&access.token);
        }

        Ok(builder)
    }
}

#[async_trait]
impl SessionFactory for S3SessionFactory {
    async fn session(&self, access: &AccessConfig, bucket: &str) -> Result<Box<dyn StorageSession>> {
        let store = self
            .builder(access)?
            .with_bucket_name(bucket)
            .build()
            .with_context(|| format!("failed to configure s3 client for bucket {}", bucket))?;

        store
            .credentials()
            .get_credential()
            .await
            .context("no valid credential sources found")?;

        debug!(
            bucket,
            region = ?access.region,
            endpoint = ?access.custom_endpoint_s3.as_ref().map(|u| u.as_str()),
            static_credentials = !access.access_key.is_empty(),
            "opened s3 session"
        );
        Ok(Box::new(S3Session {
            store,
            bucket: bucket.to_string(),
        }))
    }
}

/// S3 session bound to a single bucket with resolved credentials.
#[derive(Debug)]
pub struct S3Session {
    store: AmazonS3,
    bucket: String,
}

#[async_trait]
impl StorageSession for S3Session {
    async fn get_object(&self, key: &str) -> Result<ObjectBody> {
        get_from_store(&self.store, key)
            .await
            .with_context(|| format!("GET s3://{}/{}", self.bucket, key))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use url::Url;

    fn access(access_key: &str, secret_key: &str, token: &str) -> AccessConfig {
        AccessConfig {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            token: token.to_string(),
            region: Some("eu-central-1".to_string()),
            custom_endpoint_s3: None,
        }
    }

    /// Factory whose instance-credential lookup fails fast against a closed port.
    fn unreachable_metadata() -> S3SessionFactory {
        S3SessionFactory::without_env()
            .with_metadata_endpoint("http://127.0.0.1:1")
            .with_retry(RetryConfig {
                max_retries: 0,
                retry_timeout: Duration::from_secs(1),
                ..Default::default()
            })
    }

    #[tokio::test]
    async fn session_with_static_credentials() {
        let factory = S3SessionFactory::without_env();
        assert!(factory.session(&access("AKIAEXAMPLE", "secret", ""), "b").await.is_ok());
    }

    #[tokio::test]
    async fn session_with_session_token() {
        let factory = S3SessionFactory::without_env();
        assert!(factory.session(&access("ASIAEXAMPLE", "secret", "token"), "b").await.is_ok());
    }

    #[tokio::test]
    async fn session_without_credential_source_fails() {
        let mut cfg = access("", "", "");
        cfg.custom_endpoint_s3 = Some(Url::parse("http://127.0.0.1:1").unwrap());

        let err = unreachable_metadata().session(&cfg, "b").await.err().unwrap();
        assert_eq!(err.to_string(), "no valid credential sources found");
    }

    #[tokio::test]
    async fn session_rejects_missing_secret() {
        let factory = S3SessionFactory::without_env();
        let err = factory.session(&access("AKIAEXAMPLE", "", ""), "b").await.err().unwrap();
        assert_eq!(err.to_string(), "access_key is set but secret_key is missing");
    }

    #[tokio::test]
    async fn session_rejects_missing_access_key() {
        let factory = S3SessionFactory::without_env();
        let err = factory.session(&access("", "secret", ""), "b").await.err().unwrap();
        assert_eq!(err.to_string(), "secret_key is set but access_key is missing");
    }

    #[tokio::test]
    async fn session_rejects_lone_token() {
        let factory = S3SessionFactory::without_env();
        assert!(factory.session(&access("", "", "token"), "b").await.is_err());
    }

    #[tokio::test]
    async fn session_with_custom_endpoint() {
        let factory = S3SessionFactory::without_env();
        let mut cfg = access("minio", "minio123", "");
        cfg.custom_endpoint_s3 = Some(Url::parse("http://localhost:9000").unwrap());
        assert!(factory.session(&cfg, "artifacts").await.is_ok());
    }
}
