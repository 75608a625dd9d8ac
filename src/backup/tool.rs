// logtide/src/backup/tool.rs
//
// Seam around the external data-movement tool. The real implementation
// shells out to xtrabackup; tests substitute a fake. The tool also keeps
// its own bookkeeping (an info file written into every artifact directory),
// which the retention sweeper reconciles through `catalog()`.

use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use which::which;

use crate::errors::{EngineError, Result};
use crate::model::BackupTier;
use crate::registry::InstanceContext;

/// Name of the bookkeeping file the tool writes into each artifact
/// directory.
pub const TOOL_INFO_FILE: &str = "xtrabackup_info";

/// One entry of the tool's own catalog, reconstructed from its per-artifact
/// bookkeeping files.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub tag: String,
    pub tier: BackupTier,
    pub path: PathBuf,
    pub ended_at: NaiveDateTime,
}

pub trait BackupTool {
    /// Full byte-level copy of the instance into `dest`.
    fn full(&self, ctx: &InstanceContext, dest: &Path) -> Result<()>;

    /// Incremental copy into `dest`, delta against the artifact at `base`.
    fn incremental(&self, ctx: &InstanceContext, dest: &Path, base: &Path) -> Result<()>;

    /// The tool's own view of existing artifacts, from its bookkeeping
    /// files. Independent of filesystem timestamps.
    fn catalog(&self, ctx: &InstanceContext) -> Result<Vec<CatalogEntry>>;
}

/// Production implementation invoking the configured xtrabackup binary.
pub struct XtraBackupTool;

impl XtraBackupTool {
    fn tool_path(ctx: &InstanceContext) -> Result<PathBuf> {
        which(&ctx.tools.tool_bin)
            .map_err(|_| EngineError::ToolUnavailable(ctx.tools.tool_bin.clone()))
    }

    fn base_command(ctx: &InstanceContext, dest: &Path) -> Result<Command> {
        let tool_path = Self::tool_path(ctx)?;
        let mut cmd = Command::new(tool_path);
        cmd.arg("--backup")
            .arg(format!("--target-dir={}", dest.display()))
            .arg(format!("--parallel={}", ctx.spec.parallel));
        if let Some(host) = ctx.spec.dsn.host_str() {
            cmd.arg(format!("--host={}", host));
        }
        if let Some(port) = ctx.spec.dsn.port() {
            cmd.arg(format!("--port={}", port));
        }
        let user = ctx.spec.dsn.username();
        if !user.is_empty() {
            cmd.arg(format!("--user={}", user));
        }
        if let Some(password) = ctx.spec.dsn.password() {
            cmd.env("MYSQL_PWD", password);
        }
        if let Some(piece_mb) = ctx.spec.piece_size_mb {
            cmd.arg(format!("--read-buffer-size={}M", piece_mb));
        }
        Ok(cmd)
    }

    fn run(mut cmd: Command, tool: &str) -> Result<()> {
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(EngineError::ToolExecution {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl BackupTool for XtraBackupTool {
    fn full(&self, ctx: &InstanceContext, dest: &Path) -> Result<()> {
        println!(
            "🚚 Running {} full copy into {}",
            ctx.tools.tool_bin,
            dest.display()
        );
        let cmd = Self::base_command(ctx, dest)?;
        Self::run(cmd, &ctx.tools.tool_bin)
    }

    fn incremental(&self, ctx: &InstanceContext, dest: &Path, base: &Path) -> Result<()> {
        println!(
            "🚚 Running {} incremental copy into {} (base: {})",
            ctx.tools.tool_bin,
            dest.display(),
            base.display()
        );
        let mut cmd = Self::base_command(ctx, dest)?;
        cmd.arg(format!("--incremental-basedir={}", base.display()));
        Self::run(cmd, &ctx.tools.tool_bin)
    }

    fn catalog(&self, ctx: &InstanceContext) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        for tier in [BackupTier::Full, BackupTier::Incremental] {
            let tier_dir = ctx.tier_dir(tier);
            if !tier_dir.is_dir() {
                continue;
            }
            for dir_entry in fs::read_dir(&tier_dir)? {
                let dir_entry = dir_entry?;
                let path = dir_entry.path();
                if !path.is_dir() {
                    continue;
                }
                let info_path = path.join(TOOL_INFO_FILE);
                let content = match fs::read_to_string(&info_path) {
                    Ok(c) => c,
                    // Not every directory is tool-managed; skip quietly.
                    Err(_) => continue,
                };
                let Some(ended_at) = parse_tool_end_time(&content) else {
                    eprintln!(
                        "⚠ No parseable end_time in {}; skipping catalog entry",
                        info_path.display()
                    );
                    continue;
                };
                entries.push(CatalogEntry {
                    tag: dir_entry.file_name().to_string_lossy().to_string(),
                    tier,
                    path,
                    ended_at,
                });
            }
        }
        entries.sort_by(|a, b| a.ended_at.cmp(&b.ended_at));
        Ok(entries)
    }
}

/// Extracts the `end_time = YYYY-MM-DD HH:MM:SS` line from the tool's
/// bookkeeping file.
pub fn parse_tool_end_time(info: &str) -> Option<NaiveDateTime> {
    for line in info.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == "end_time" {
            return NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S").ok();
        }
    }
    None
}
