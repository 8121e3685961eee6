//! loy-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, sets up tracing,
//! connects Postgres, and runs the reconciliation scheduler until SIGINT.
//! The engine itself is not reachable over the network; its only surface is
//! this start/stop lifecycle.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loy_accrual::AccrualClient;
use loy_config::Config;
use loy_db::PgStore;
use loy_reconcile::{ReconcileEngine, ReconcileScheduler};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = Config::parse();

    let pool = loy_db::connect(&cfg.database_url).await?;
    loy_db::bootstrap_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let accrual = Arc::new(AccrualClient::new(cfg.accrual_url.clone()));
    let engine = ReconcileEngine::new(store, accrual);

    info!(
        interval_secs = cfg.poll_interval_secs,
        accrual_url = %cfg.accrual_url,
        "starting reconcile scheduler"
    );
    let scheduler = ReconcileScheduler::spawn(engine, cfg.poll_interval());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received; letting the in-flight tick finish");
    scheduler.shutdown().await;
    info!("reconcile scheduler stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
