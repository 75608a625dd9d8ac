// logtide/src/registry/mod.rs
//
// Instance registry: resolves the configured instances (optionally filtered
// by a CLI selection) into per-instance contexts, and runs each operation
// as an isolated unit of work. A fatal error on one instance never aborts
// the others; the batch report aggregates the outcomes and decides the
// process exit status.

use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

use crate::config::{EngineConfig, InstanceSpec, ToolPaths};
use crate::errors::{EngineError, Result};
use crate::model::{BackupTier, RetentionPolicy};

pub const LAST_FULL_MARKER: &str = "last_full";

/// Everything one instance's operations need, resolved up front. No
/// ambient state: the context is passed explicitly into every call.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub spec: InstanceSpec,
    pub tools: ToolPaths,
    pub retention: RetentionPolicy,
    root: PathBuf,
}

impl InstanceContext {
    fn new(spec: InstanceSpec, tools: ToolPaths, retention: RetentionPolicy) -> Self {
        let root = spec.backup_root.join(&spec.id);
        InstanceContext {
            spec,
            tools,
            retention,
            root,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Instance directory under the backup root: `<root>/<instance>/`.
    pub fn instance_root(&self) -> &PathBuf {
        &self.root
    }

    pub fn tier_dir(&self, tier: BackupTier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    /// Archive-day directory: `<root>/<instance>/arch/<YYYY-MM-DD>/`.
    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.tier_dir(BackupTier::Archive)
            .join(day.format("%Y-%m-%d").to_string())
    }

    /// Creates the persisted layout for this instance, including the
    /// shared logs directory next to the instance directories.
    pub fn ensure_layout(&self) -> Result<()> {
        for tier in [BackupTier::Full, BackupTier::Incremental, BackupTier::Archive] {
            fs::create_dir_all(self.tier_dir(tier))?;
        }
        fs::create_dir_all(self.spec.backup_root.join("logs"))?;
        Ok(())
    }

    fn last_full_path(&self) -> PathBuf {
        self.root.join(LAST_FULL_MARKER)
    }

    /// Tag of the most recent FULL artifact, if any was ever recorded.
    pub fn read_last_full(&self) -> Result<Option<String>> {
        let path = self.last_full_path();
        if !path.exists() {
            return Ok(None);
        }
        let tag = fs::read_to_string(&path)?.trim().to_string();
        if tag.is_empty() {
            return Ok(None);
        }
        Ok(Some(tag))
    }

    pub fn write_last_full(&self, tag: &str) -> Result<()> {
        fs::write(self.last_full_path(), tag)?;
        Ok(())
    }
}

/// Resolves the batch of instances to operate on. An empty selection means
/// every configured instance; an unknown id is a configuration error.
pub fn resolve(config: &EngineConfig, selection: &[String]) -> Result<Vec<InstanceContext>> {
    let mut contexts = Vec::new();
    if selection.is_empty() {
        for spec in &config.instances {
            contexts.push(InstanceContext::new(
                spec.clone(),
                config.tools.clone(),
                config.retention,
            ));
        }
        return Ok(contexts);
    }

    for wanted in selection {
        let spec = config
            .instances
            .iter()
            .find(|i| &i.id == wanted)
            .ok_or_else(|| {
                EngineError::Configuration(format!("unknown instance id '{}'", wanted))
            })?;
        contexts.push(InstanceContext::new(
            spec.clone(),
            config.tools.clone(),
            config.retention,
        ));
    }
    Ok(contexts)
}

/// Outcome of one instance's unit of work.
#[derive(Debug)]
pub struct InstanceOutcome {
    pub instance: String,
    pub result: Result<InstanceSummary>,
}

/// What a successful operation reports back for the run summary.
#[derive(Debug, Clone)]
pub struct InstanceSummary {
    pub operation: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<InstanceOutcome>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    /// Prints the per-instance success/failure summary every run ends with.
    pub fn print_summary(&self) {
        println!("\n── Run summary ──────────────────────────────");
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(summary) => println!(
                    "  ✓ {:<12} {:<12} {}",
                    outcome.instance, summary.operation, summary.detail
                ),
                Err(e) => println!("  ✗ {:<12} FAILED       {}", outcome.instance, e),
            }
        }
        if !self.all_succeeded() {
            let err = EngineError::PartialFailure {
                failed: self.failed_count(),
                total: self.outcomes.len(),
            };
            println!("  {}", err);
        }
    }
}

/// Runs `op` once per instance, isolating failures: an error is recorded
/// in the report and the batch moves on to the next instance.
pub fn run_batch<F>(contexts: &[InstanceContext], mut op: F) -> BatchReport
where
    F: FnMut(&InstanceContext) -> Result<InstanceSummary>,
{
    let mut outcomes = Vec::with_capacity(contexts.len());
    for ctx in contexts {
        println!("\n═══ Instance: {} ═══", ctx.id());
        let result = ctx.ensure_layout().and_then(|_| op(ctx));
        if let Err(e) = &result {
            eprintln!("❌ Instance {} failed: {}", ctx.id(), e);
        }
        outcomes.push(InstanceOutcome {
            instance: ctx.id().to_string(),
            result,
        });
    }
    BatchReport { outcomes }
}
