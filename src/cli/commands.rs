use chrono::DateTime;
use serde_json::Value;

use crate::app::{AppContext, ReadsyncError, Result};
use crate::daemon::DaemonConfig;
use crate::domain::{ConnectivityStatus, PositionRecord};

pub async fn run_daemon(
    ctx: &AppContext,
    retry_interval: Option<&str>,
    no_initial_drain: bool,
) -> Result<()> {
    let mut config = ctx.config.daemon_config()?;
    if let Some(interval) = retry_interval {
        config.retry_interval_secs = DaemonConfig::parse_interval(interval)
            .map_err(ReadsyncError::Other)?;
    }
    config.initial_drain = !no_initial_drain;

    ctx.daemon(config).run().await
}

pub async fn ingest(ctx: &AppContext, json: &str) -> Result<()> {
    let message: Value = serde_json::from_str(json)?;

    ctx.refresh_connectivity().await;
    let response = ctx.engine.handle_message(message).await;

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

pub async fn drain(ctx: &AppContext) -> Result<()> {
    if ctx.refresh_connectivity().await == ConnectivityStatus::Offline {
        println!(
            "Sync service unreachable, {} updates pending",
            ctx.engine.pending_count()
        );
        return Ok(());
    }

    let report = ctx.engine.reconcile().await;
    println!(
        "Drain complete: {} synced, {} rejected, {} retried, {} dropped",
        report.synced, report.rejected, report.retried, report.exhausted
    );

    let pending = ctx.engine.pending_count();
    if pending > 0 {
        println!("{} updates still pending", pending);
    }
    Ok(())
}

pub async fn status(ctx: &AppContext) -> Result<()> {
    ctx.refresh_connectivity().await;
    let status = ctx.engine.status();

    println!("Sync service: {}", status.connectivity.status);
    println!("Pending updates: {}", status.pending);
    println!(
        "Positions: {} ({} unsynced, {} bytes)",
        status.positions.count, status.unsynced_positions, status.positions.bytes
    );
    if status.positions.nearing_capacity {
        println!("Position store is nearly full; run `readsync prune`");
    }
    Ok(())
}

pub fn list_positions(ctx: &AppContext, unsynced_only: bool) -> Result<()> {
    let records = if unsynced_only {
        ctx.engine.unsynced_positions()
    } else {
        ctx.engine.positions()
    };

    if records.is_empty() {
        println!("No positions");
        return Ok(());
    }

    for record in records {
        println!("{}", format_position(&record));
    }
    Ok(())
}

pub fn prune(ctx: &AppContext) -> Result<()> {
    let removed = ctx.engine.remove_synced_positions();
    println!("Removed {} synced positions", removed);
    Ok(())
}

fn format_position(record: &PositionRecord) -> String {
    let marker = if record.synced { " " } else { "●" };

    let date = DateTime::from_timestamp_millis(record.timestamp as i64)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "                ".to_string());

    let title = record.series_title.as_deref().unwrap_or(&record.series_id);

    format!(
        "{} {} {} ch.{} @ {}",
        marker, date, title, record.chapter, record.position
    )
}
