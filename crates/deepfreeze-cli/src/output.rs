//! Human and JSON rendering of command results.

use anyhow::Result;
use deepfreeze_core::{Repository, RepositoryFailure, Settings, ThawRequest};
use deepfreeze_storage::lifecycle::{
    CleanupReport, RefreezeReport, RepoProgress, ThawOutcome, ThawProgress,
};
use serde::Serialize;

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn thaw_outcome(outcome: &ThawOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }

    println!("Thaw request {} is {}", outcome.request_id, outcome.status);
    for report in &outcome.restores {
        println!(
            "  {}: {} restores started, {} already restoring, {} skipped, {} failed",
            report.repository.as_deref().unwrap_or("-"),
            report.initiated,
            report.already_restoring,
            report.skipped,
            report.errored
        );
        for failure in &report.errors {
            println!("    - {}: {}", failure.key, failure.message);
        }
    }
    for skipped in &outcome.skipped {
        println!("  {}: skipped ({})", skipped.name, skipped.reason);
    }
    if let Some(progress) = &outcome.progress {
        print_repo_lines(&progress.repos);
    }
    Ok(())
}

pub fn thaw_progress(progress: &ThawProgress, json: bool) -> Result<()> {
    if json {
        return print_json(progress);
    }

    println!(
        "Thaw request {} is {} ({}/{} repositories thawed)",
        progress.request_id,
        progress.status,
        progress.thawed(),
        progress.repos.len()
    );
    print_repo_lines(&progress.repos);
    if progress.indices_mounted > 0 {
        println!("  Mounted {} indices", progress.indices_mounted);
    }
    Ok(())
}

fn print_repo_lines(repos: &[RepoProgress]) {
    for repo in repos {
        let state = repo
            .state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "missing".to_string());
        let mut line = format!("  {}: {state}", repo.name);
        if let Some(restore) = &repo.restore {
            line.push_str(&format!(" ({}/{} restored)", restore.restored, restore.total));
        }
        if repo.mounted {
            line.push_str(", mounted");
        }
        println!("{line}");
        if let Some(warning) = &repo.warning {
            println!("    warning: {warning}");
        }
        if let Some(error) = &repo.error {
            println!("    error: {error}");
        }
    }
}

pub fn thaw_requests(requests: &[ThawRequest], json: bool) -> Result<()> {
    if json {
        return print_json(requests);
    }
    if requests.is_empty() {
        println!("No thaw requests");
        return Ok(());
    }

    for request in requests {
        let range = match request.date_range() {
            Some(range) => format!(" [{} .. {}]", range.start, range.end),
            None => String::new(),
        };
        println!(
            "{}  {:<11}  {}  {}{range}",
            request.request_id,
            request.status.as_str(),
            request.created_at.format("%Y-%m-%d %H:%M:%S"),
            request.repos.join(",")
        );
    }
    Ok(())
}

pub fn refreeze_report(report: &RefreezeReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    if report.refrozen.is_empty() {
        println!("Thaw request {} was already refrozen", report.request_id);
    } else {
        println!(
            "Thaw request {} refrozen: {}",
            report.request_id,
            report.refrozen.join(", ")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct PartialRefreeze<'a> {
    request_id: &'a str,
    refrozen: &'a [String],
    failed: &'a [RepositoryFailure],
}

pub fn partial_refreeze(
    request_id: &str,
    refrozen: &[String],
    failed: &[RepositoryFailure],
    json: bool,
) -> Result<()> {
    if json {
        return print_json(&PartialRefreeze {
            request_id,
            refrozen,
            failed,
        });
    }

    println!("Refreeze of {request_id} partially failed");
    if !refrozen.is_empty() {
        println!("  Refrozen: {}", refrozen.join(", "));
    }
    for failure in failed {
        println!("  - {}: {}", failure.repository, failure.reason);
    }
    Ok(())
}

pub fn cleanup_report(report: &CleanupReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    println!(
        "Scanned {} thawed repositories, expired {}",
        report.expiration.scanned,
        report.expiration.expired.len()
    );
    for expired in &report.expiration.expired {
        println!("  {} expired ({:?})", expired.name, expired.reason);
    }
    if !report.refrozen.is_empty() {
        println!("Refrozen: {}", report.refrozen.join(", "));
    }
    for failure in report.expiration.errors.iter().chain(&report.failed) {
        println!("  - {}: {}", failure.repository, failure.reason);
    }
    for request_id in &report.requests_refrozen {
        println!("Closed thaw request {request_id}");
    }
    Ok(())
}

pub fn repositories(repos: &[Repository], json: bool) -> Result<()> {
    if json {
        return print_json(repos);
    }
    if repos.is_empty() {
        println!("No repositories");
        return Ok(());
    }

    for repo in repos {
        let expires = repo
            .expires_at
            .map(|at| format!(", expires {}", at.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        println!(
            "{:<24} {:<8} s3://{}/{}{}{expires}",
            repo.name,
            repo.state.as_str(),
            repo.bucket,
            repo.base_path.trim_matches('/'),
            if repo.is_mounted { ", mounted" } else { "" }
        );
    }
    Ok(())
}

pub fn settings(settings: &Settings, json: bool) -> Result<()> {
    if json {
        return print_json(settings);
    }

    println!("Repository prefix:  {}", settings.repo_name_prefix);
    println!("Bucket prefix:      {}", settings.bucket_name_prefix);
    println!("Base path prefix:   {}", settings.base_path_prefix);
    println!("Storage class:      {}", settings.storage_class);
    println!("Rotate by:          {}", settings.rotate_by);
    println!("Suffix style:       {}", settings.style);
    if let Some(suffix) = &settings.last_suffix {
        println!("Last suffix:        {suffix}");
    }
    Ok(())
}
