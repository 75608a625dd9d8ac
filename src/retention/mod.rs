// logtide/src/retention/mod.rs
//
// Retention sweeper. Two independent passes: an age-based sweep over the
// tier directories using filesystem modification times, and a
// reconciliation of the external tool's own catalog against the recovery
// window. The passes are commutative; `cleanup` runs both, but either is
// safe alone.

use chrono::{Duration, Local};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backup::BackupTool;
use crate::errors::Result;
use crate::model::{BackupArtifact, BackupTier};
use crate::registry::{InstanceContext, InstanceSummary};

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
}

/// Removes every entry of `dir` whose modification time is older than
/// `cutoff`. Entries are whole artifact or archive-day directories; files
/// that are not directories (markers, stray downloads) are left alone.
pub fn sweep_dir(dir: &Path, cutoff: SystemTime) -> Result<SweepOutcome> {
    let mut outcome = SweepOutcome::default();
    if !dir.is_dir() {
        return Ok(outcome);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            fs::remove_dir_all(&path)?;
            println!("🗑 Removed expired {}", path.display());
            outcome.removed.push(path);
        } else {
            outcome.kept += 1;
        }
    }
    Ok(outcome)
}

/// Age-based pass over all three tiers of one instance.
pub fn sweep_aged_artifacts(ctx: &InstanceContext) -> Result<SweepOutcome> {
    let now = SystemTime::now();
    let mut total = SweepOutcome::default();
    for tier in [BackupTier::Full, BackupTier::Incremental, BackupTier::Archive] {
        let days = ctx.retention.days_for(tier);
        let cutoff = now - std::time::Duration::from_secs(u64::from(days) * 86_400);
        let outcome = sweep_dir(&ctx.tier_dir(tier), cutoff)?;
        println!(
            "🧹 Tier {}: removed {}, kept {} (max age {} days)",
            tier,
            outcome.removed.len(),
            outcome.kept,
            days
        );
        total.removed.extend(outcome.removed);
        total.kept += outcome.kept;
    }
    Ok(total)
}

/// Reconciliation pass: the tool's own catalog entries whose recorded end
/// time falls outside the recovery window are deleted, regardless of
/// filesystem timestamps. A FULL entry that is still the base of a
/// retained INCREMENTAL survives even past the window; removing it would
/// leave an incremental that references nothing.
pub fn reconcile_tool_catalog(
    ctx: &InstanceContext,
    tool: &dyn BackupTool,
) -> Result<Vec<String>> {
    let window = Duration::days(i64::from(ctx.retention.recovery_window_days));
    let horizon = Local::now().naive_local() - window;

    let entries = tool.catalog(ctx)?;
    let retained_bases: HashSet<String> = entries
        .iter()
        .filter(|e| e.tier == BackupTier::Incremental && e.ended_at >= horizon)
        .filter_map(|e| BackupArtifact::load(&e.path).ok())
        .filter_map(|a| a.base_reference)
        .collect();

    let mut removed = Vec::new();
    for entry in entries {
        if entry.ended_at < horizon {
            if entry.tier == BackupTier::Full && retained_bases.contains(&entry.tag) {
                println!(
                    "ℹ Keeping expired {}: still the base of a retained incremental",
                    entry.tag
                );
                continue;
            }
            fs::remove_dir_all(&entry.path)?;
            println!(
                "🗑 Catalog entry {} ({}) expired at {}, removed",
                entry.tag, entry.tier, entry.ended_at
            );
            removed.push(entry.tag);
        }
    }
    if removed.is_empty() {
        println!("ℹ Tool catalog is within the recovery window");
    }
    Ok(removed)
}

/// Entry point for the `cleanup` operation on one instance.
pub fn run_cleanup_flow(ctx: &InstanceContext, tool: &dyn BackupTool) -> Result<InstanceSummary> {
    let aged = sweep_aged_artifacts(ctx)?;
    let reconciled = reconcile_tool_catalog(ctx, tool)?;
    Ok(InstanceSummary {
        operation: "cleanup".into(),
        detail: format!(
            "aged out {}, kept {}, catalog reconciled {}",
            aged.removed.len(),
            aged.kept,
            reconciled.len()
        ),
    })
}
