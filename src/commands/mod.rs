//! Operator commands for product renewal.
//!
//! Each command delegates to the [`RenewalCoordinator`] and writes plain
//! messages to the given sink.

use clap::Subcommand;
use std::io::Write;

use crate::models::product::{Overrides, ProductKey};
use crate::models::renewal::RenewalRun;
use crate::services::coordinator::{RenewalCoordinator, RenewalError};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue products for renewal (all stale products when no keys are given)
    QueueProductRenewal {
        /// Product keys to queue regardless of their freshness
        keys: Vec<String>,
    },
    /// Queue stale products and process the renewal queue
    RunProductRenewal,
    /// Show the number of products due for renewal
    Stale,
    /// Show the overrides stored for a product
    #[command(after_help = "Example: apw overrides AE91ECBUDA")]
    Overrides {
        /// Product key (ASIN)
        key: String,
    },
    /// Reset all renewal times so every product is stale
    ResetAllRenewals,
    /// Start tracking products for renewal
    Track {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show pending and claimed renewal queue items
    QueueStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Renewal(#[from] RenewalError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn parse_keys(raw: &[String]) -> Result<Vec<ProductKey>, RenewalError> {
    raw.iter()
        .map(|k| ProductKey::parse(k).map_err(RenewalError::from))
        .collect()
}

async fn sweep(coordinator: &RenewalCoordinator, raw_keys: &[String]) -> Result<u64, RenewalError> {
    let keys = parse_keys(raw_keys)?;
    let keys = (!keys.is_empty()).then_some(keys.as_slice());
    coordinator.queue_renewal_sweep(keys).await
}

async fn lookup_overrides(
    coordinator: &RenewalCoordinator,
    raw_key: &str,
) -> Result<Option<Overrides>, RenewalError> {
    let key = ProductKey::parse(raw_key)?;
    coordinator.get_overrides(&key).await
}

/// Run one command against the coordinator.
///
/// Errors already reported to the operator are returned so the binary can
/// exit non-zero.
pub async fn run(
    command: Command,
    coordinator: &RenewalCoordinator,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match command {
        Command::QueueProductRenewal { keys } => queue_product_renewal(coordinator, &keys, out).await,
        Command::RunProductRenewal => run_product_renewal(coordinator, out).await,
        Command::Stale => {
            let outdated = coordinator.count_stale().await?;
            writeln!(out, "There are {outdated} products waiting for renewal.")?;
            Ok(())
        }
        Command::Overrides { key } => overrides(coordinator, &key, out).await,
        Command::ResetAllRenewals => {
            coordinator.reset_all().await?;
            writeln!(out, "All products have been marked for renewal.")?;
            Ok(())
        }
        Command::Track { keys } => {
            let keys = parse_keys(&keys)?;
            let added = coordinator.track(&keys).await?;
            writeln!(out, "{added} new products are now tracked.")?;
            Ok(())
        }
        Command::QueueStatus => {
            let depth = coordinator.queue_depth().await?;
            writeln!(
                out,
                "Queue has {} pending and {} claimed items.",
                depth.pending, depth.claimed
            )?;
            Ok(())
        }
    }
}

async fn queue_product_renewal(
    coordinator: &RenewalCoordinator,
    raw_keys: &[String],
    out: &mut impl Write,
) -> Result<(), CommandError> {
    match sweep(coordinator, raw_keys).await {
        Ok(count) => {
            writeln!(out, "{count} products have been queued for renewal.")?;
            Ok(())
        }
        Err(e) => {
            writeln!(out, "An unrecoverable error has occurred:")?;
            writeln!(out, "{e}")?;
            Err(e.into())
        }
    }
}

async fn run_product_renewal(coordinator: &RenewalCoordinator, out: &mut impl Write) -> Result<(), CommandError> {
    match coordinator.run_renewal().await? {
        RenewalRun::NothingToUpdate => {
            writeln!(out, "There is nothing to update.")?;
        }
        RenewalRun::Completed { drain, remaining_stale, .. } => {
            if drain.suspended() {
                writeln!(out, "Processing was suspended by the product source.")?;
            }
            if remaining_stale > 0 {
                writeln!(out, "There are {remaining_stale} products still remaining.")?;
            } else {
                writeln!(out, "All items have been processed.")?;
            }
        }
    }
    Ok(())
}

async fn overrides(coordinator: &RenewalCoordinator, raw_key: &str, out: &mut impl Write) -> Result<(), CommandError> {
    match lookup_overrides(coordinator, raw_key).await {
        Ok(Some(overrides)) => {
            writeln!(out, "The following overrides were found for: {raw_key}")?;
            let pretty = serde_json::to_string_pretty(&overrides)
                .unwrap_or_else(|_| format!("{overrides:?}"));
            writeln!(out, "{pretty}")?;
            Ok(())
        }
        Ok(None) => {
            writeln!(out, "No product with ASIN {raw_key} has been found.")?;
            Ok(())
        }
        Err(e) => {
            writeln!(out, "An unexpected error has occurred:")?;
            writeln!(out, "{e}")?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn test_parses_kebab_case_commands() {
        let cli = Cli::try_parse_from(["apw", "queue-product-renewal", "A1", "B2"]).unwrap();
        assert!(matches!(cli.command, Command::QueueProductRenewal { keys } if keys == ["A1", "B2"]));

        let cli = Cli::try_parse_from(["apw", "reset-all-renewals"]).unwrap();
        assert!(matches!(cli.command, Command::ResetAllRenewals));
    }

    #[test]
    fn test_track_requires_keys() {
        assert!(Cli::try_parse_from(["apw", "track"]).is_err());
        assert!(Cli::try_parse_from(["apw", "overrides"]).is_err());
    }

    #[test]
    fn test_parse_keys_rejects_invalid() {
        let err = parse_keys(&["A1".to_string(), "not a key".to_string()]).unwrap_err();
        assert!(matches!(err, RenewalError::InvalidKey(_)));
    }
}
