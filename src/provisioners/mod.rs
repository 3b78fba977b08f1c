//! Provisioners module for customizing the image under construction.
//!
//! A provisioner is driven by the host in two steps: [`Provisioner::prepare`]
//! validates the raw configuration once, then [`Provisioner::provision`]
//! runs against the build target exactly once.

use async_trait::async_trait;
use serde_yaml::Value;
use tokio_util::sync::CancellationToken;

use crate::communicator::Communicator;
use crate::error::ProvisionError;
use crate::ui::Ui;

mod cancel;
pub mod s3;

pub use s3::S3Provisioner;

/// Trait for provisioner implementations.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Decodes and validates the host-supplied raw configuration maps.
    ///
    /// No network action may happen here.
    fn prepare(&mut self, raws: &[Value]) -> Result<(), ProvisionError>;

    /// Executes the provisioner against the build target.
    ///
    /// # Arguments
    /// * `cancel` - Parent cancellation token of the build step
    /// * `ui` - Sink for human-readable progress messages
    /// * `comm` - Remote-write collaborator for the build target
    ///
    /// # Returns
    /// Result indicating success or failure of the provisioning step.
    async fn provision(
        &self,
        cancel: &CancellationToken,
        ui: &dyn Ui,
        comm: &dyn Communicator,
    ) -> Result<(), ProvisionError>;
}
