// logtide/src/restore/executor.rs
//
// Restore executor: prints the exact replay sequence for a plan, and, only
// with explicit confirmation, replays each archived segment through the
// replay tool into the target server. The first segment starts at the
// recorded offset, later ones from their beginning; decompression follows
// each segment's stored codec.

use anyhow::Context;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io;
use std::process::{Command, Stdio};
use which::which;

use crate::client::DbClient;
use crate::errors::{EngineError, Result};
use crate::model::{Codec, RestorePlan, RestoreStep};
use crate::registry::{InstanceContext, InstanceSummary};
use crate::restore::planner::plan_restore;

fn print_plan(plan: &RestorePlan) {
    println!("📋 Restore plan for {}", plan.day);
    match &plan.base_artifact {
        Some(tag) => println!("  base artifact: {}", tag),
        None => println!("  base artifact: none recorded on or before this day"),
    }
    for step in &plan.steps {
        let codec = match step.codec {
            Some(Codec::Gzip) => " (gzip)",
            None => "",
        };
        println!(
            "  replay segment {} from offset {}{}  [{}]",
            step.sequence,
            step.start_offset,
            codec,
            step.path.display()
        );
    }
}

fn replay_step(ctx: &InstanceContext, client: &DbClient, step: &RestoreStep) -> Result<()> {
    let replay_path = which(&ctx.tools.replay_bin)
        .map_err(|_| EngineError::ToolUnavailable(ctx.tools.replay_bin.clone()))?;

    let mut replay_cmd = Command::new(&replay_path);
    if step.start_offset > 0 {
        replay_cmd.arg(format!("--start-position={}", step.start_offset));
    }
    let mut replay = replay_cmd
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {}", replay_path.display()))?;
    let replay_out = replay
        .stdout
        .take()
        .context("replay tool stdout unavailable")?;

    let mut apply = client
        .command()
        .stdin(Stdio::from(replay_out))
        .stdout(Stdio::null())
        .spawn()
        .context("failed to spawn database client for replay")?;

    let mut replay_in = replay
        .stdin
        .take()
        .context("replay tool stdin unavailable")?;
    let feed_result = (|| -> Result<()> {
        let file = File::open(&step.path)
            .with_context(|| format!("failed to open archived segment {}", step.path.display()))?;
        match step.codec {
            Some(Codec::Gzip) => {
                let mut decoder = GzDecoder::new(file);
                io::copy(&mut decoder, &mut replay_in)?;
            }
            None => {
                let mut reader = file;
                io::copy(&mut reader, &mut replay_in)?;
            }
        }
        Ok(())
    })();
    drop(replay_in);

    if let Err(feed_err) = feed_result {
        // Reap both children before reporting. A replay tool that exited
        // early (broken pipe while feeding) is reported with its exit
        // status instead of the bare write error.
        let _ = apply.kill();
        let _ = apply.wait();
        if let Ok(status) = replay.wait() {
            if !status.success() {
                return Err(EngineError::ToolExecution {
                    tool: ctx.tools.replay_bin.clone(),
                    status: status.to_string(),
                    stderr: format!(
                        "replay tool exited while segment {} was being fed",
                        step.sequence
                    ),
                });
            }
        }
        return Err(feed_err);
    }

    let replay_status = replay.wait()?;
    let apply_status = apply.wait()?;
    if !replay_status.success() {
        return Err(EngineError::ToolExecution {
            tool: ctx.tools.replay_bin.clone(),
            status: replay_status.to_string(),
            stderr: format!("replay of segment {} failed", step.sequence),
        });
    }
    if !apply_status.success() {
        return Err(EngineError::ToolExecution {
            tool: ctx.tools.client_bin.clone(),
            status: apply_status.to_string(),
            stderr: format!("applying segment {} failed", step.sequence),
        });
    }
    println!("✓ Replayed segment {}", step.sequence);
    Ok(())
}

/// Entry point for `restore -d <DAY> [-y]` on one instance. Without the
/// confirmation flag this is a dry run: the plan is printed, nothing runs.
pub fn run_restore_flow(
    ctx: &InstanceContext,
    day: NaiveDate,
    execute: bool,
) -> Result<InstanceSummary> {
    let plan = plan_restore(ctx, day)?;
    print_plan(&plan);

    if !execute {
        println!("ℹ Dry run, pass -y to execute this plan");
        return Ok(InstanceSummary {
            operation: "restore (dry run)".into(),
            detail: format!("{} replay steps for {}", plan.steps.len(), plan.day),
        });
    }

    let client = DbClient::new(&ctx.tools.client_bin, &ctx.spec.dsn)?;
    client.ping(ctx.id())?;
    for step in &plan.steps {
        replay_step(ctx, &client, step)?;
    }
    Ok(InstanceSummary {
        operation: "restore".into(),
        detail: format!("replayed {} segments for {}", plan.steps.len(), plan.day),
    })
}
