//! Prints the encryption system status as JSON.
//!
//! Exits non-zero unless every probe passes.

use anyhow::Context;
use ehr_transit::EncryptionContext;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let context = EncryptionContext::from_env().context("failed to load encryption config")?;
    let status = context.system_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.all_passed {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!("{}", status.health.summary());
        Ok(ExitCode::FAILURE)
    }
}
