//! Status command implementation.

use crate::ExitCode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    components: BTreeMap<String, ComponentStatus>,
    #[serde(default)]
    invocation_running: bool,
    last_success_at_ms: Option<i64>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Show health and metrics of a running server.
pub async fn run(url: &str) -> Result<ExitCode> {
    let base = url.trim_end_matches('/');
    println!("Checking health at {}...\n", base);

    let client = reqwest::Client::new();
    let health_url = format!("{}/health", base);

    let healthy = match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                    health.status != "unhealthy"
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                    false
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the expwatch server running?");
            println!("Start it with: expwatch serve --config <path-to-config>");
            return Ok(ExitCode::HealthCheckError);
        }
    };

    let metrics_url = format!("{}/metrics", base);
    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(if healthy {
        ExitCode::Success
    } else {
        ExitCode::HealthCheckError
    })
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    if health.invocation_running {
        println!("An invocation is running");
    }
    if let Some(at) = health.last_success_at_ms {
        println!("Last successful invocation at {} ms", at);
    }
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let tag = status_tag(&status.status);
            if let Some(reason) = &status.reason {
                println!("  {} {}: {} ({})", tag, name, status.status, reason);
            } else {
                println!("  {} {}: {}", tag, name, status.status);
            }
        }
    }
}

/// Parse unlabeled samples from the Prometheus text format.
fn parse_samples(metrics_text: &str) -> HashMap<&str, f64> {
    let mut values = HashMap::new();
    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() || line.contains('{') {
            continue;
        }
        let mut parts = line.split_whitespace();
        if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            if let Ok(value) = value.parse::<f64>() {
                values.insert(name, value);
            }
        }
    }
    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_samples(metrics_text);

    let rows = [
        ("expwatch_snapshot_records", "Tracked Records:  "),
        ("expwatch_scan_progress_percent", "Scan Progress %:  "),
        ("expwatch_scans_completed_total", "Scans Completed:  "),
        ("expwatch_pages_fetched_total", "Pages Fetched:    "),
        ("expwatch_fields_observed_total", "Fields Observed:  "),
        ("expwatch_records_pruned_total", "Records Pruned:   "),
    ];
    for (metric, label) in rows {
        if let Some(v) = values.get(metric) {
            println!("{}{}", label, format_number(*v as u64));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
