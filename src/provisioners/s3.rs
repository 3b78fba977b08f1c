//! S3 provisioner implementation.
//!
//! Downloads one object from an S3-compatible bucket and uploads it onto the
//! build target through the host's communicator. The pipeline is linear:
//! open a session, fetch the object under a deadline, relay the body. Any
//! failing step aborts the whole operation and nothing is retried.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Provisioner;
use super::cancel::CancellableReader;
use crate::communicator::Communicator;
use crate::config::ProvisionerConfig;
use crate::error::ProvisionError;
use crate::redact::SecretFilter;
use crate::storage::{ObjectBody, SessionFactory, StorageSession};
use crate::ui::Ui;

/// File-like provisioner sourcing its content from object storage.
pub struct S3Provisioner {
    sessions: Arc<dyn SessionFactory>,
    secrets: Arc<dyn SecretFilter>,
    config: Option<ProvisionerConfig>,
}

impl S3Provisioner {
    /// Creates an unprepared provisioner.
    ///
    /// # Arguments
    /// * `sessions` - Opens storage sessions from the configured credentials
    /// * `secrets` - Receives credential values so they never reach the logs
    pub fn new(sessions: Arc<dyn SessionFactory>, secrets: Arc<dyn SecretFilter>) -> Self {
        Self {
            sessions,
            secrets,
            config: None,
        }
    }

    /// Returns the validated configuration once `prepare` has succeeded.
    pub fn config(&self) -> Option<&ProvisionerConfig> {
        self.config.as_ref()
    }
}

/// Fetches the configured object, bounded by the timeout and the parent token.
#[tracing::instrument(skip_all, fields(bucket = %config.bucket, key = %config.object_key))]
async fn fetch_object(
    session: &dyn StorageSession,
    config: &ProvisionerConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<ObjectBody> {
    let request = tokio::time::timeout(config.timeout, session.get_object(&config.object_key));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("build step cancelled while fetching object"),
        result = request => match result {
            Ok(body) => {
                let body = body?;
                debug!(size = ?body.size(), "object fetched");
                Ok(body)
            }
            Err(_) => bail!(
                "fetching s3://{}/{} timed out after {:?}",
                config.bucket,
                config.object_key,
                config.timeout
            ),
        },
    }
}

#[async_trait]
impl Provisioner for S3Provisioner {
    fn prepare(&mut self, raws: &[Value]) -> Result<(), ProvisionError> {
        let config = ProvisionerConfig::decode(raws)?;

        for value in config.sensitive_values() {
            self.secrets.register_sensitive_value(value);
        }

        debug!(
            bucket = %config.bucket,
            key = %config.object_key,
            local_path = %config.local_path,
            timeout = ?config.timeout,
            "s3 provisioner prepared"
        );
        self.config = Some(config);
        Ok(())
    }

    async fn provision(
        &self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        comm: &dyn Communicator,
    ) -> Result<(), ProvisionError> {
        let config = self.config.as_ref().ok_or_else(|| {
            ProvisionError::invalid_argument("provisioner must be prepared before provisioning")
        })?;

        ui.say("Provisioning from S3...");

        let result = self.relay(config, cancel, ui, comm).await;
        if let Err(e) = &result {
            ui.error(&e.to_string());
        }
        result
    }
}

impl S3Provisioner {
    /// Opens the session, fetches the object and streams it to `comm`.
    async fn relay(
        &self,
        config: &ProvisionerConfig,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        comm: &dyn Communicator,
    ) -> Result<(), ProvisionError> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ProvisionError::temporary(
                    anyhow!("build step cancelled while opening session"),
                    "no storage session",
                ));
            }
            session = self.sessions.session(&config.access, &config.bucket) => {
                session.map_err(|e| ProvisionError::auth_required(e, "no storage session"))?
            }
        };

        let mut body = fetch_object(session.as_ref(), config, cancel)
            .await
            .map_err(|e| ProvisionError::temporary(e, "unable to download object from storage"))?;

        ui.message(&format!(
            "Uploading s3://{}/{} => {}",
            config.bucket, config.object_key, config.local_path
        ));

        // The body is released when it goes out of scope, on success or failure.
        let mut reader = CancellableReader::new(&mut body, cancel.clone());
        let written = comm
            .upload(&config.local_path, &mut reader)
            .await
            .map_err(|e| ProvisionError::temporary(e, "unable to upload file"))?;

        info!(
            communicator = comm.name(),
            bytes = written,
            "s3 provisioner completed successfully"
        );
        Ok(())
    }
}
