//! In-memory stand-ins for the external collaborators, shared by the
//! module tests. Only compiled for tests.

use chrono::Local;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use crate::archive::catalog::{ActivePosition, LogCatalog};
use crate::backup::tool::{BackupTool, CatalogEntry, TOOL_INFO_FILE};
use crate::errors::{EngineError, Result};
use crate::model::{segment_file_name, LogSegment, ReplicaPosition, SegmentStatus};
use crate::registry::InstanceContext;

pub const TEST_BASE_NAME: &str = "binlog";

/// Catalog over a plain directory of fake segment files.
pub struct MemoryCatalog {
    pub log_dir: PathBuf,
    pub active: ActivePosition,
    pub floors: Vec<ReplicaPosition>,
    pub purges: RefCell<Vec<u64>>,
}

impl MemoryCatalog {
    /// Creates segment files `first..=last` in `log_dir` plus the active
    /// segment `last + 1`, each holding a little distinct content.
    pub fn populate(log_dir: &Path, first: u64, last: u64, active_offset: u64) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        for seq in first..=(last + 1) {
            let name = segment_file_name(TEST_BASE_NAME, seq);
            fs::write(log_dir.join(&name), format!("segment-{}-payload", seq))?;
        }
        Ok(MemoryCatalog {
            log_dir: log_dir.to_path_buf(),
            active: ActivePosition {
                sequence: last + 1,
                name: segment_file_name(TEST_BASE_NAME, last + 1),
                offset: active_offset,
            },
            floors: Vec::new(),
            purges: RefCell::new(Vec::new()),
        })
    }

    pub fn with_replica_floor(mut self, replica: &str, oldest_required: u64) -> Self {
        self.floors.push(ReplicaPosition {
            replica: replica.to_string(),
            oldest_required,
        });
        self
    }

    /// Truncates a source segment file so its copy fails verification.
    pub fn break_segment(&self, sequence: u64) -> Result<()> {
        let name = segment_file_name(TEST_BASE_NAME, sequence);
        fs::write(self.log_dir.join(name), b"")?;
        Ok(())
    }

    pub fn source_has(&self, sequence: u64) -> bool {
        let name = segment_file_name(TEST_BASE_NAME, sequence);
        self.log_dir.join(name).exists()
    }
}

impl LogCatalog for MemoryCatalog {
    fn list_segments(&self) -> Result<Vec<LogSegment>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(sequence) = crate::model::sequence_from_name(&name) else {
                continue;
            };
            let size_bytes = entry.metadata()?.len();
            let status = if sequence == self.active.sequence {
                SegmentStatus::Active
            } else {
                SegmentStatus::Closed
            };
            segments.push(LogSegment {
                sequence,
                path: entry.path(),
                name,
                size_bytes,
                status,
                codec: None,
            });
        }
        segments.sort_by_key(|s| s.sequence);
        Ok(segments)
    }

    fn current_segment(&self) -> Result<ActivePosition> {
        Ok(self.active.clone())
    }

    fn replica_floors(&self) -> Result<Vec<ReplicaPosition>> {
        Ok(self.floors.clone())
    }

    fn purge_to(&self, boundary: u64) -> Result<()> {
        self.purges.borrow_mut().push(boundary);
        for segment in self.list_segments()? {
            if segment.sequence < boundary {
                fs::remove_file(&segment.path)?;
            }
        }
        Ok(())
    }
}

/// Backup tool double: writes a recognisable payload plus the tool's
/// bookkeeping file, or fails after leaving partial output behind.
pub struct FakeTool {
    pub fail: bool,
}

impl FakeTool {
    pub fn ok() -> Self {
        FakeTool { fail: false }
    }

    pub fn failing() -> Self {
        FakeTool { fail: true }
    }

    fn write_artifact(&self, dest: &Path, detail: &str) -> Result<()> {
        fs::create_dir_all(dest)?;
        fs::write(dest.join("backup.data"), detail)?;
        if self.fail {
            // Partial output on disk, then the tool "crashes".
            return Err(EngineError::ToolExecution {
                tool: "faketool".into(),
                status: "exit status: 1".into(),
                stderr: "simulated tool failure".into(),
            });
        }
        let info = format!(
            "tool_version = test\nend_time = {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        fs::write(dest.join(TOOL_INFO_FILE), info)?;
        Ok(())
    }
}

impl BackupTool for FakeTool {
    fn full(&self, _ctx: &InstanceContext, dest: &Path) -> Result<()> {
        self.write_artifact(dest, "full")
    }

    fn incremental(&self, _ctx: &InstanceContext, dest: &Path, base: &Path) -> Result<()> {
        self.write_artifact(dest, &format!("incremental from {}", base.display()))
    }

    fn catalog(&self, ctx: &InstanceContext) -> Result<Vec<CatalogEntry>> {
        crate::backup::tool::XtraBackupTool.catalog(ctx)
    }
}

/// Builds a single-instance context rooted in a temp directory.
pub fn test_context(root: &Path) -> InstanceContext {
    use crate::config::{CliOverrides, EngineConfig};
    let raw = serde_json::from_value(serde_json::json!({
        "backup_root": root,
        "instances": [{"id": "orcl", "dsn": "mysql://root:pw@db1:3306"}]
    }))
    .unwrap();
    let config = EngineConfig::from_raw(raw, &CliOverrides::default()).unwrap();
    let ctx = crate::registry::resolve(&config, &[]).unwrap().remove(0);
    ctx.ensure_layout().unwrap();
    ctx
}
