//! lnk tenancy service entry point
//!
//! Loads configuration, connects to Postgres and applies pending
//! migrations. Exits non-zero if any step fails.

use anyhow::Context;
use lnk_billing::BillingConfig;
use lnk_tenancy::{AppState, Config, LogFormat};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("loading configuration")?;
    init_tracing(config.log_format);

    let billing_config = BillingConfig::from_env().context("loading billing configuration")?;
    tracing::info!(
        trial_days = billing_config.trial_days,
        invoice_due_days = billing_config.invoice_due_days,
        "starting lnk tenancy"
    );

    let state = AppState::connect(config, billing_config)
        .await
        .context("initialising application state")?;

    tracing::info!(
        max_connections = state.config.database_max_connections,
        invitation_expiry_days = state.config.invitation_expiry_days,
        "lnk tenancy ready"
    );
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
