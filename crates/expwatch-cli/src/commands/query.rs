//! Query and state command implementations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use expwatch_core::{Config, ExpiringView, Tracker, TrackerStatus};

/// Print records whose grace period ends within the display window.
pub async fn run(config: Config, json: bool) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let view = tracker.query().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&view);
    }
    Ok(())
}

/// Print persisted scan state, snapshot layout and lease.
pub async fn state(config: Config, json: bool) -> Result<()> {
    let tracker = Tracker::from_config(config)?;
    let status = tracker.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_view(view: &ExpiringView) {
    match view.last_scan_completed_at {
        Some(at) => println!("Last full scan:  {}", format_ms(at)),
        None => println!("Last full scan:  never"),
    }
    println!("Scan progress:   {}%", view.scan_progress_percent);
    println!("Expiring soon:   {}\n", view.total_tracked);

    if view.records.is_empty() {
        println!("No records in their final days of grace.");
        return;
    }

    let width = view
        .records
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0)
        .max(4);
    println!("{:<width$}  {:>9}  GRACE ENDS", "NAME", "DAYS LEFT");
    for entry in &view.records {
        println!(
            "{:<width$}  {:>9}  {}",
            entry.name,
            entry.days_left,
            format_ms(entry.grace_period_end_ms)
        );
    }
}

fn print_status(status: &TrackerStatus) {
    println!("Phase:           {}", status.state.phase.as_str());
    println!("Scan progress:   {}%", status.scan_progress_percent);
    match status.state.metadata.last_scan_completed_at_ms {
        Some(at) => println!("Last full scan:  {}", format_ms(at)),
        None => println!("Last full scan:  never"),
    }
    println!(
        "Fields observed: {}",
        status.state.metadata.total_fields_observed
    );
    println!("Next invocation: {}", status.next_decision.as_str());

    match &status.manifest {
        Some(manifest) => println!(
            "Snapshot:        {} records in {} shards (updated {})",
            manifest.total_records(),
            manifest.shard_count,
            format_ms(manifest.updated_at_ms)
        ),
        None => println!("Snapshot:        none"),
    }
    match &status.lease {
        Some(lease) => println!(
            "Lease:           held by {} until {}",
            lease.holder,
            format_ms(lease.expires_at_ms)
        ),
        None => println!("Lease:           free"),
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_ms(1_700_000_000_000), "2023-11-14 22:13:20 UTC");
    }
}
