//! Tick command implementation.

use anyhow::Result;
use expwatch_core::{Config, InvocationOutcome, InvocationReport, Tracker};
use tracing::info;

/// Run one invocation and print what it did.
pub async fn run(config: Config, at_ms: Option<i64>, json: bool) -> Result<()> {
    let tracker = Tracker::from_config(config)?;

    let report = match at_ms {
        Some(now_ms) => tracker.invoke_at(now_ms).await?,
        None => tracker.invoke().await?,
    };
    info!(
        invocation_id = %report.invocation_id,
        decision = report.decision.as_str(),
        duration_ms = report.duration_ms,
        "Invocation finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &InvocationReport) {
    println!("Invocation {} ({})", report.invocation_id, report.decision.as_str());
    match &report.outcome {
        InvocationOutcome::Scan(scan) => {
            println!("  Pages fetched:     {}", scan.pages_fetched);
            println!("  Fields observed:   {}", scan.nodes_observed);
            println!("  Records captured:  {}", scan.records_captured);
            println!("  Shards written:    {}", scan.shards_written);
            println!("  Tracked records:   {}", scan.snapshot_records);
            if scan.completed {
                println!("  Scan complete ({} fields)", scan.total_processed);
            } else {
                println!("  Scan progress:     {}%", scan.progress_percent);
            }
            if let Some(e) = &scan.fetch_error {
                println!("  Stopped early:     {}", e);
            }
        }
        InvocationOutcome::Maintenance(pass) => {
            println!("  Tracked before:    {}", pass.tracked_before);
            println!("  Pruned:            {}", pass.pruned);
            println!("  Verified:          {}", pass.candidates - pass.deferred);
            println!("  Renewed:           {}", pass.renewed);
            println!("  Refreshed:         {}", pass.refreshed);
            println!("  Lookups failed:    {}", pass.failed);
            if pass.deferred > 0 {
                println!("  Deferred:          {}", pass.deferred);
            }
            println!("  Tracked records:   {}", pass.snapshot_records);
        }
    }
    println!("  Took {} ms", report.duration_ms);
}
