// logtide/src/backup/logic.rs
//
// The backup executor proper: runs FULL and INCREMENTAL copies through the
// tool seam, persists artifact manifests and maintains the last-full
// marker. ARCHIVE never reaches this module; the flow dispatches it to the
// archive subsystem.

use anyhow::Context;
use chrono::Local;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::backup::tool::BackupTool;
use crate::errors::{EngineError, Result};
use crate::model::{BackupArtifact, BackupTier};
use crate::registry::InstanceContext;

fn make_tag(tier: BackupTier) -> String {
    let stamp = Local::now().format("%Y-%m-%d_%H_%M_%S");
    format!("{}_{}", tier.dir_name(), stamp)
}

/// Total on-disk size of an artifact directory.
fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            EngineError::Other(anyhow::anyhow!(
                "failed to walk artifact directory {}: {}",
                path.display(),
                e
            ))
        })?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}

/// All persisted artifacts of one tier, oldest first.
pub fn list_artifacts(ctx: &InstanceContext, tier: BackupTier) -> Result<Vec<BackupArtifact>> {
    let tier_dir = ctx.tier_dir(tier);
    let mut artifacts = Vec::new();
    if !tier_dir.is_dir() {
        return Ok(artifacts);
    }
    for entry in fs::read_dir(&tier_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match BackupArtifact::load(&path) {
            Ok(artifact) => artifacts.push(artifact),
            // Directories without a manifest (interrupted runs, foreign
            // files) are not artifacts.
            Err(_) => continue,
        }
    }
    artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(artifacts)
}

/// Runs a FULL or INCREMENTAL backup and returns the persisted artifact.
///
/// INCREMENTAL without any existing FULL silently redirects to FULL; the
/// returned artifact is tagged and recorded as FULL in that case. On tool
/// failure the partial destination is discarded entirely so no partial
/// artifact is ever retained.
pub fn run_data_backup(
    ctx: &InstanceContext,
    tool: &dyn BackupTool,
    tier: BackupTier,
) -> Result<BackupArtifact> {
    match tier {
        BackupTier::Full => run_full(ctx, tool),
        BackupTier::Incremental => run_incremental(ctx, tool),
        BackupTier::Archive => Err(EngineError::Configuration(
            "ARCHIVE tier is handled by the archive subsystem, not the data backup executor"
                .into(),
        )),
    }
}

fn run_full(ctx: &InstanceContext, tool: &dyn BackupTool) -> Result<BackupArtifact> {
    let tag = make_tag(BackupTier::Full);
    let dest = ctx.tier_dir(BackupTier::Full).join(&tag);
    fs::create_dir_all(&dest)
        .with_context(|| format!("failed to create artifact directory {}", dest.display()))?;

    if let Err(e) = tool.full(ctx, &dest) {
        discard_partial(&dest);
        return Err(e);
    }

    let artifact = BackupArtifact {
        tier: BackupTier::Full,
        tag: tag.clone(),
        size_bytes: dir_size(&dest)?,
        path: dest,
        created_at: Local::now(),
        base_reference: None,
    };
    artifact.save()?;
    ctx.write_last_full(&tag)?;
    println!("✓ FULL backup {} recorded ({} bytes)", tag, artifact.size_bytes);
    Ok(artifact)
}

fn run_incremental(ctx: &InstanceContext, tool: &dyn BackupTool) -> Result<BackupArtifact> {
    let base_tag = match ctx.read_last_full()? {
        Some(tag) => {
            let base_dir = ctx.tier_dir(BackupTier::Full).join(&tag);
            if base_dir.is_dir() {
                Some(tag)
            } else {
                println!(
                    "⚠ Last-full marker points at missing artifact '{}'; taking a FULL instead",
                    tag
                );
                None
            }
        }
        None => {
            println!("ℹ No FULL artifact exists yet; redirecting INCREMENTAL to FULL");
            None
        }
    };

    let Some(base_tag) = base_tag else {
        // Explicit fallback policy: the result is a FULL artifact and is
        // recorded as such.
        return run_full(ctx, tool);
    };

    let base_dir = ctx.tier_dir(BackupTier::Full).join(&base_tag);
    let tag = make_tag(BackupTier::Incremental);
    let dest = ctx.tier_dir(BackupTier::Incremental).join(&tag);
    fs::create_dir_all(&dest)
        .with_context(|| format!("failed to create artifact directory {}", dest.display()))?;

    if let Err(e) = tool.incremental(ctx, &dest, &base_dir) {
        discard_partial(&dest);
        return Err(e);
    }

    let artifact = BackupArtifact {
        tier: BackupTier::Incremental,
        tag: tag.clone(),
        size_bytes: dir_size(&dest)?,
        path: dest,
        created_at: Local::now(),
        base_reference: Some(base_tag),
    };
    artifact.save()?;
    println!(
        "✓ INCREMENTAL backup {} recorded ({} bytes, base {})",
        tag,
        artifact.size_bytes,
        artifact.base_reference.as_deref().unwrap_or("?")
    );
    Ok(artifact)
}

fn discard_partial(dest: &Path) {
    if let Err(e) = fs::remove_dir_all(dest) {
        eprintln!(
            "⚠ Could not remove partial artifact {}: {}",
            dest.display(),
            e
        );
    } else {
        println!("🧹 Discarded partial artifact {}", dest.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_context, FakeTool};

    #[test]
    fn test_full_backup_persists_artifact_and_marker() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let artifact = run_data_backup(&ctx, &FakeTool::ok(), BackupTier::Full)?;
        assert_eq!(artifact.tier, BackupTier::Full);
        assert!(artifact.base_reference.is_none());
        assert!(artifact.path.join("backup.data").exists());
        assert!(artifact.size_bytes > 0);
        assert_eq!(ctx.read_last_full()?.as_deref(), Some(artifact.tag.as_str()));

        let listed = list_artifacts(&ctx, BackupTier::Full)?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tag, artifact.tag);
        Ok(())
    }

    #[test]
    fn test_incremental_without_full_redirects_to_full() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let artifact = run_data_backup(&ctx, &FakeTool::ok(), BackupTier::Incremental)?;
        // Recorded as FULL, not as an incremental with a dangling base.
        assert_eq!(artifact.tier, BackupTier::Full);
        assert!(artifact.base_reference.is_none());
        assert!(artifact.tag.starts_with("full_"));
        assert!(list_artifacts(&ctx, BackupTier::Incremental)?.is_empty());
        assert_eq!(list_artifacts(&ctx, BackupTier::Full)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_incremental_references_latest_full() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let full = run_data_backup(&ctx, &FakeTool::ok(), BackupTier::Full)?;
        let incr = run_data_backup(&ctx, &FakeTool::ok(), BackupTier::Incremental)?;

        assert_eq!(incr.tier, BackupTier::Incremental);
        assert_eq!(incr.base_reference.as_deref(), Some(full.tag.as_str()));
        Ok(())
    }

    #[test]
    fn test_tool_failure_discards_partial_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let err = run_data_backup(&ctx, &FakeTool::failing(), BackupTier::Full).unwrap_err();
        assert!(matches!(err, EngineError::ToolExecution { .. }));

        // No partial output, no artifact, no marker update.
        let tier_dir = ctx.tier_dir(BackupTier::Full);
        let leftovers: Vec<_> = fs::read_dir(&tier_dir).unwrap().collect();
        assert!(leftovers.is_empty());
        assert_eq!(ctx.read_last_full().unwrap(), None);
    }

    #[test]
    fn test_archive_tier_rejected_here() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let err = run_data_backup(&ctx, &FakeTool::ok(), BackupTier::Archive).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
