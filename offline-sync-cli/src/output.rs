use offline_sync::lifecycle::{ActivationReport, InstallReport};
use offline_sync::{CacheRole, CacheStatusReport, LifecycleEvent, Response, Version};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cli::OutputFormat;
use crate::error::Result;

/// Result of `offsync check`
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub local: Option<Version>,
    pub remote: Version,
    /// The remote answer was synthesized because the origin is unreachable
    pub offline: bool,
    pub update_available: bool,
}

/// Serializable view of a fetched response
#[derive(Debug, Serialize)]
struct FetchView<'a> {
    status: u16,
    content_type: Option<&'a str>,
    source: offline_sync::ResponseSource,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_version(version: Option<&Version>) -> &str {
    version.map_or("none", Version::as_str)
}

pub fn print_check(report: &CheckReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    println!("Local version:  {}", display_version(report.local.as_ref()));
    println!("Remote version: {}", report.remote);
    if report.offline {
        println!("Origin unreachable, nothing to compare");
    } else if report.update_available {
        println!("Update available");
    } else {
        println!("Up to date");
    }
    Ok(())
}

pub fn print_activation(report: &ActivationReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    if report.already_active {
        println!("Version {} is already active", report.version);
    } else {
        println!("Activated version {}", report.version);
    }
    Ok(())
}

pub fn print_install(report: &InstallReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }
    println!(
        "Re-cached {} resources for version {}",
        report.stored, report.version
    );
    print_skipped(report);
    Ok(())
}

fn print_skipped(report: &InstallReport) {
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path, skipped.reason);
    }
}

pub fn print_status(
    report: &CacheStatusReport,
    role: Option<CacheRole>,
    format: OutputFormat,
) -> Result<()> {
    let entries: Vec<(CacheRole, usize)> = report
        .entries
        .iter()
        .filter(|(r, _)| role.is_none_or(|wanted| wanted == **r))
        .map(|(r, count)| (*r, *count))
        .collect();

    if format == OutputFormat::Json {
        let entries: BTreeMap<&str, usize> =
            entries.iter().map(|(r, count)| (r.as_str(), *count)).collect();
        return print_json(&serde_json::json!({
            "active_version": report.active_version,
            "phase": report.phase,
            "entries": entries,
        }));
    }

    println!(
        "Active version: {}",
        display_version(report.active_version.as_ref())
    );
    println!("Phase:          {:?}", report.phase);
    if entries.is_empty() {
        println!("No cached entries");
    }
    for (role, count) in entries {
        println!("  {role:<12} {count} entries");
    }
    Ok(())
}

pub fn print_fetch(response: &Response, with_body: bool, format: OutputFormat) -> Result<()> {
    let body = with_body.then(|| response.text());
    if format == OutputFormat::Json {
        return print_json(&FetchView {
            status: response.status,
            content_type: response.content_type.as_deref(),
            source: response.source,
            bytes: response.body.len(),
            body,
        });
    }

    println!(
        "{} {:?} ({} bytes, {})",
        response.status,
        response.source,
        response.body.len(),
        response.content_type.as_deref().unwrap_or("no content type")
    );
    if let Some(body) = body {
        println!("{body}");
    }
    Ok(())
}

pub fn print_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::OfflineReady { version } => {
            println!("Version {version} is ready for offline use")
        }
        LifecycleEvent::Activated { version } => println!("Version {version} activated"),
    }
}
