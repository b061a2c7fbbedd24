//! relaynode - host binary for the self-update pipeline.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relaynode_cli::{Cli, Commands};
use relaynode_update::CURRENT_VERSION;

fn init_logging(cli: &Cli) {
    let env_level = std::env::var("RELAYNODE_LOG_LEVEL").ok();
    let log_level = cli.effective_log_level(env_level.as_deref());

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(log_level.as_filter_str())
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Version => {
            println!("relaynode {}", CURRENT_VERSION);
            Ok(())
        }
        Commands::Update(update_cli) => update_cli.run().await,
    }
}
