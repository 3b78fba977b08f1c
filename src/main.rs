use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use s3_provisioner::cli::{self, Cli, Commands};
use s3_provisioner::redact::LogSecretFilter;
use s3_provisioner::storage::S3SessionFactory;
use s3_provisioner::{init_logging, run_apply, run_validate};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;

    let log_level = match &args.command {
        Commands::Apply(opts) => opts.common.log_level,
        Commands::Validate(opts) => opts.common.log_level,
        Commands::Completions(opts) => {
            let mut cmd = Cli::command();
            clap_complete::generate(opts.shell, &mut cmd, env!("CARGO_PKG_NAME"), &mut io::stdout());
            return Ok(());
        }
    };

    let secrets = LogSecretFilter::new();
    init_logging(log_level, secrets.clone())?;

    let result = match &args.command {
        Commands::Apply(opts) => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling provisioner");
                    on_interrupt.cancel();
                }
            });
            run_apply(opts, Arc::new(S3SessionFactory::new()), secrets, cancel).await
        }
        Commands::Validate(opts) => run_validate(opts, secrets),
        Commands::Completions(_) => unreachable!("handled before logging setup"),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
