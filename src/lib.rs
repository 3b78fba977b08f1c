pub mod cli;
pub mod communicator;
pub mod config;
pub mod duration;
pub mod error;
pub mod provisioners;
pub mod redact;
pub mod storage;
pub mod ui;

pub use error::{ErrorKind, ProvisionError};

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::communicator::RootfsCommunicator;
use crate::provisioners::{Provisioner, S3Provisioner};
use crate::redact::{LogSecretFilter, RedactingMakeWriter};
use crate::storage::{S3SessionFactory, SessionFactory};
use crate::ui::TracingUi;

/// Installs the global tracing subscriber.
///
/// Every formatted event passes through `secrets`, so values registered by
/// a provisioner are masked even if they end up in an error message.
pub fn init_logging(log_level: cli::LogLevel, secrets: LogSecretFilter) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(filter)
            .with_writer(RedactingMakeWriter::new(secrets, std::io::stderr))
            .finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Loads and prepares an S3 provisioner from a YAML file.
fn prepare_provisioner(
    file: &camino::Utf8Path,
    sessions: Arc<dyn SessionFactory>,
    secrets: LogSecretFilter,
) -> Result<S3Provisioner> {
    let raws = config::load_raws(file)
        .with_context(|| format!("failed to load provisioner configuration from {}", file))?;
    let mut provisioner = S3Provisioner::new(sessions, Arc::new(secrets));
    provisioner
        .prepare(&raws)
        .context("provisioner validation failed")?;
    Ok(provisioner)
}

/// Prepares the provisioner and relays the object into `opts.rootfs`.
///
/// Cancelling `cancel` aborts the fetch, or the upload if it already started.
pub async fn run_apply(
    opts: &cli::ApplyArgs,
    sessions: Arc<dyn SessionFactory>,
    secrets: LogSecretFilter,
    cancel: CancellationToken,
) -> Result<()> {
    let provisioner = prepare_provisioner(&opts.common.file, sessions, secrets)?;
    let communicator = RootfsCommunicator::new(opts.rootfs.clone())?;

    let ui = match provisioner
        .config()
        .and_then(|c| c.build.build_name.as_deref())
    {
        Some(name) => TracingUi::with_prefix(name),
        None => TracingUi::default(),
    };

    provisioner
        .provision(&cancel, &ui, &communicator)
        .await
        .context("failed to run s3 provisioner")?;

    info!("provisioning completed successfully");
    Ok(())
}

pub fn run_validate(opts: &cli::ValidateArgs, secrets: LogSecretFilter) -> Result<()> {
    let provisioner =
        prepare_provisioner(&opts.common.file, Arc::new(S3SessionFactory::new()), secrets)?;
    info!("validation successful:\n{:#?}", provisioner.config());
    Ok(())
}
