// logtide/src/schedule.rs
//
// Cron integration: installs or removes a marker-delimited block in the
// user's crontab that drives the periodic backup, archive and cleanup
// runs. The crontab binary is the only interface used; the rest of the
// crontab is preserved byte for byte.

use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use which::which;

use crate::errors::{EngineError, Result};

const BLOCK_BEGIN: &str = "# BEGIN logtide managed block";
const BLOCK_END: &str = "# END logtide managed block";

/// Renders the managed schedule: nightly full backup, hourly log archive,
/// daily cleanup, with output appended to the shared logs directory.
fn render_block(exe: &str, config_path: &Path, backup_root: &Path) -> String {
    let logs = backup_root.join("logs");
    format!(
        "{begin}\n\
         0 1 * * * {exe} --config {cfg} backup full >> {logs}/backup_full.log 2>&1\n\
         0 * * * * {exe} --config {cfg} backup archive >> {logs}/backup_archive.log 2>&1\n\
         30 2 * * * {exe} --config {cfg} cleanup >> {logs}/cleanup.log 2>&1\n\
         {end}\n",
        begin = BLOCK_BEGIN,
        end = BLOCK_END,
        exe = exe,
        cfg = config_path.display(),
        logs = logs.display(),
    )
}

/// Replaces (or strips, when `block` is None) the managed block inside an
/// existing crontab, leaving everything else untouched.
fn splice_block(existing: &str, block: Option<&str>) -> String {
    let mut result = String::new();
    let mut inside = false;
    for line in existing.lines() {
        if line.trim() == BLOCK_BEGIN {
            inside = true;
            continue;
        }
        if line.trim() == BLOCK_END {
            inside = false;
            continue;
        }
        if !inside {
            result.push_str(line);
            result.push('\n');
        }
    }
    if let Some(block) = block {
        result.push_str(block);
    }
    result
}

fn crontab_path() -> Result<std::path::PathBuf> {
    which("crontab").map_err(|_| EngineError::ToolUnavailable("crontab".into()))
}

fn read_crontab() -> Result<String> {
    let output = Command::new(crontab_path()?).arg("-l").output()?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        // `crontab -l` fails when no crontab exists yet; start fresh.
        Ok(String::new())
    }
}

fn write_crontab(content: &str) -> Result<()> {
    let mut child = Command::new(crontab_path()?)
        .arg("-")
        .stdin(Stdio::piped())
        .spawn()
        .context("failed to spawn crontab")?;
    child
        .stdin
        .take()
        .context("crontab stdin unavailable")?
        .write_all(content.as_bytes())?;
    let status = child.wait()?;
    if !status.success() {
        return Err(EngineError::ToolExecution {
            tool: "crontab".into(),
            status: status.to_string(),
            stderr: "failed to install crontab".into(),
        });
    }
    Ok(())
}

pub fn install_cron(config_path: &Path, backup_root: &Path) -> Result<()> {
    let exe = std::env::current_exe().context("cannot resolve own executable path")?;
    let block = render_block(&exe.display().to_string(), config_path, backup_root);
    let updated = splice_block(&read_crontab()?, Some(&block));
    write_crontab(&updated)?;
    println!("✓ Cron schedule installed");
    Ok(())
}

pub fn remove_cron() -> Result<()> {
    let updated = splice_block(&read_crontab()?, None);
    write_crontab(&updated)?;
    println!("✓ Cron schedule removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_block_contains_all_three_jobs() {
        let block = render_block(
            "/usr/local/bin/logtide",
            Path::new("/etc/logtide.json"),
            Path::new("/backup"),
        );
        assert!(block.contains("backup full"));
        assert!(block.contains("backup archive"));
        assert!(block.contains("cleanup"));
        assert!(block.contains("/backup/logs/backup_full.log"));
        assert!(block.starts_with(BLOCK_BEGIN));
    }

    #[test]
    fn test_splice_replaces_existing_block() {
        let exe = "/bin/logtide";
        let old = render_block(exe, Path::new("/old.json"), Path::new("/old"));
        let existing = format!("MAILTO=ops@example.com\n{}# user entry\n", old);

        let new_block = render_block(exe, Path::new("/new.json"), Path::new("/new"));
        let updated = splice_block(&existing, Some(&new_block));

        assert!(updated.contains("MAILTO=ops@example.com"));
        assert!(updated.contains("# user entry"));
        assert!(updated.contains("/new.json"));
        assert!(!updated.contains("/old.json"));
        assert_eq!(updated.matches(BLOCK_BEGIN).count(), 1);
    }

    #[test]
    fn test_splice_strips_block_on_remove() {
        let block = render_block("/bin/logtide", Path::new("/c.json"), Path::new("/b"));
        let existing = format!("# keep me\n{}", block);
        let updated = splice_block(&existing, None);
        assert_eq!(updated, "# keep me\n");
    }

    #[test]
    fn test_splice_on_empty_crontab() {
        let block = render_block("/bin/logtide", Path::new("/c.json"), Path::new("/b"));
        let updated = splice_block("", Some(&block));
        assert_eq!(updated, block);
    }
}
