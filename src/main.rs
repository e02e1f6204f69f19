use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

use product_renewal::app_state::AppState;
use product_renewal::commands::{self, Command};
use product_renewal::config::AppConfig;

#[derive(Parser)]
#[command(name = "apw")]
#[command(about = "Queue, renew and inspect product data", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {e}");
            process::exit(2);
        }
    };

    let state = match AppState::connect(&config).await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = commands::run(args.command, &state.coordinator, &mut stdout).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
