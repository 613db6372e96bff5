//! deskdock - host bridge for the USB companion display

use clap::Parser;
use tracing_subscriber::EnvFilter;

use deskdock_cli::{cli::Cli, commands::CommandRunner, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = AppConfig::load(&cli)?;

    CommandRunner::execute(cli, config).await?;
    Ok(())
}

/// Setup logging based on verbosity level, or `RUST_LOG` when it is set
fn setup_logging(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .init();
        return;
    }

    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
