//! Communicator module for writing files onto the build target.
//!
//! The host owns the real transport (SSH, WinRM, a container runtime) and
//! hands the provisioner a [`Communicator`]. This crate only ships
//! [`RootfsCommunicator`], which targets a local root filesystem directory.

mod rootfs;

use anyhow::Result;
use async_trait::async_trait;
use camino::Utf8Path;
use tokio::io::AsyncRead;

pub use rootfs::RootfsCommunicator;

/// Trait for remote-write collaborators.
///
/// Implementations must be `Send + Sync` so one communicator can serve
/// several provisioners of the same build.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Returns the name of this communicator, for logging.
    fn name(&self) -> &'static str;

    /// Streams `src` to `dst` on the target.
    ///
    /// # Arguments
    /// * `dst` - Destination path as seen from inside the target
    /// * `src` - Byte stream to write; read until EOF
    ///
    /// # Returns
    /// The number of bytes written.
    async fn upload(&self, dst: &Utf8Path, src: &mut (dyn AsyncRead + Send + Unpin))
    -> Result<u64>;
}
