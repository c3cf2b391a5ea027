use std::path::Path;
use std::sync::Arc;

use app::prelude::*;
use storage::backend::default_backend;
use storage::memory::MemoryBackend;
use utils::app_config::AppConfig;
use utils::error::{Error, Result};

/// Platform backend with the configured fallback, or an in-memory copy for dry runs.
async fn build_service(path: &Path, dry_run: bool) -> Result<PermissionService> {
    let backend = default_backend();

    if dry_run {
        let path = std::path::absolute(path)?;
        let snapshot = tokio::task::spawn_blocking(move || {
            MemoryBackend::snapshot_of(backend.as_ref(), &path)
        })
        .await
        .map_err(|e| Error::new(e.to_string()))??;
        return Ok(PermissionService::new(Arc::new(snapshot)));
    }

    let config = AppConfig::fetch()?;
    let mut service = PermissionService::new(backend);
    if config.fallback.enabled {
        let tool =
            CommandTool::from_config(&config.fallback).map_err(|e| Error::new(e.to_string()))?;
        service = service.with_fallback(Arc::new(tool));
    }
    Ok(service)
}

/// Text shown to the user for one inspection.
pub fn render_inspection(inspection: &Inspection) -> String {
    let metadata = &inspection.metadata;
    let read_only = match inspection.read_only {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    };

    let mut lines = vec![
        format!("File: {}", metadata.path.display()),
        format!("Size: {}", metadata.size_display()),
        format!("Created: {}", metadata.created_display()),
        format!("Modified: {}", metadata.modified_display()),
        format!("Owner: {}", metadata.owner_display()),
        format!("Read-only attribute: {}", read_only),
        "Access rules:".to_string(),
    ];
    lines.extend(inspection.acl.display_lines().iter().map(|l| format!("  {}", l)));
    lines.push(format!(
        "State: {}",
        AccessPolicy::from_writable(inspection.effective_writable)
    ));
    lines.extend(inspection.notes.iter().map(|n| format!("Note: {}", n)));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn print_change(change: &PolicyChange, dry_run: bool) {
    println!("Applied {} policy ({})", change.target, change.outcome);
    if dry_run {
        println!("Dry run: nothing was changed on disk");
    }
    print!("{}", render_inspection(&change.inspection));
}

pub async fn inspect_cmd(path: &Path, json: bool, dry_run: bool) -> Result<()> {
    let service = build_service(path, dry_run).await?;
    let inspection = service.inspect(path).await?;

    if json {
        let text =
            serde_json::to_string_pretty(&inspection).map_err(|e| Error::new(e.to_string()))?;
        println!("{}", text);
    } else {
        print!("{}", render_inspection(&inspection));
    }
    Ok(())
}

pub async fn set_cmd(path: &Path, policy: AccessPolicy, dry_run: bool) -> Result<()> {
    let service = build_service(path, dry_run).await?;
    let change = service.apply(path, policy).await?;
    print_change(&change, dry_run);
    Ok(())
}

pub async fn toggle_cmd(path: &Path, dry_run: bool) -> Result<()> {
    let service = build_service(path, dry_run).await?;
    let change = service.toggle(path).await?;
    print_change(&change, dry_run);
    Ok(())
}
