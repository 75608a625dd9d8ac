//! Core data model shared by the backup, archive, retention and restore
//! subsystems. Everything here is plain data; behaviour lives in the
//! subsystem modules.

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{EngineError, Result};

/// Backup category. Each tier maps to one subdirectory of the instance
/// backup root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupTier {
    Full,
    Incremental,
    Archive,
}

impl BackupTier {
    pub fn dir_name(&self) -> &'static str {
        match self {
            BackupTier::Full => "full",
            BackupTier::Incremental => "incr",
            BackupTier::Archive => "arch",
        }
    }
}

impl fmt::Display for BackupTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupTier::Full => "FULL",
            BackupTier::Incremental => "INCREMENTAL",
            BackupTier::Archive => "ARCHIVE",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a log segment: written (`Active`), rotated but still only
/// on the source (`Closed`), durably copied to the archive store
/// (`Archived`), removed from the source (`Purged`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Active,
    Closed,
    Archived,
    Purged,
}

/// Compression codec applied to an archived segment copy. Selected per
/// segment at restore time from the stored value, never guessed from the
/// file name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Gzip,
}

impl Codec {
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
        }
    }
}

/// One sequential binary-log file unit on the source server. `path` is
/// where the segment lives on the locally mounted source log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegment {
    pub sequence: u64,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub status: SegmentStatus,
    pub codec: Option<Codec>,
}

/// Oldest segment a given replica still requires. Purging at or above
/// this sequence would break replication for that replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPosition {
    pub replica: String,
    pub oldest_required: u64,
}

/// A completed full or incremental backup on disk, described by the
/// `artifact.json` manifest persisted next to the tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub tier: BackupTier,
    pub tag: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Local>,
    /// Tag of the FULL artifact an INCREMENTAL is based on. Always None
    /// for FULL and ARCHIVE.
    pub base_reference: Option<String>,
}

pub const ARTIFACT_MANIFEST: &str = "artifact.json";

impl BackupArtifact {
    pub fn save(&self) -> Result<()> {
        let manifest_path = self.path.join(ARTIFACT_MANIFEST);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&manifest_path, json)?;
        Ok(())
    }

    pub fn load(artifact_dir: &Path) -> Result<Self> {
        let manifest_path = artifact_dir.join(ARTIFACT_MANIFEST);
        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            EngineError::Integrity(format!(
                "missing artifact manifest {}: {}",
                manifest_path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Per-tier age limits plus the point-in-time recovery window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub full_days: u32,
    pub incremental_days: u32,
    pub archive_days: u32,
    pub recovery_window_days: u32,
}

impl RetentionPolicy {
    pub fn days_for(&self, tier: BackupTier) -> u32 {
        match tier {
            BackupTier::Full => self.full_days,
            BackupTier::Incremental => self.incremental_days,
            BackupTier::Archive => self.archive_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            full_days: 30,
            incremental_days: 7,
            archive_days: 3,
            recovery_window_days: 7,
        }
    }
}

/// Append-only audit record written before the matching source purge is
/// issued, so purge history survives a crash mid-cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeRecord {
    pub recorded_at: DateTime<Local>,
    pub boundary: u64,
    pub purged: Vec<u64>,
}

impl PurgeRecord {
    /// Writes the record into `dir` as `purge_<timestamp>.json`. The file
    /// is staged under a temporary name and renamed into place so a crash
    /// can never leave a half-written record.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = self.recorded_at.format("%Y-%m-%d_%H_%M_%S");
        let mut final_path = dir.join(format!("purge_{}.json", stamp));
        // Two cycles inside the same second must both leave a record.
        let mut serial = 1;
        while final_path.exists() {
            final_path = dir.join(format!("purge_{}_{}.json", stamp, serial));
            serial += 1;
        }
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }
}

/// Starting recovery position for one archive day, recorded on the first
/// archive cycle of that day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayManifest {
    pub day: NaiveDate,
    pub start_segment: u64,
    pub start_offset: u64,
    pub recorded_at: DateTime<Local>,
}

pub const DAY_MANIFEST: &str = "manifest.json";

impl DayManifest {
    pub fn save(&self, day_dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(day_dir.join(DAY_MANIFEST), json)?;
        Ok(())
    }

    pub fn load(day_dir: &Path) -> Result<Option<Self>> {
        let path = day_dir.join(DAY_MANIFEST);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// One replay step of a restore plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreStep {
    pub sequence: u64,
    pub start_offset: u64,
    pub path: PathBuf,
    pub codec: Option<Codec>,
}

/// Ordered replay plan reconstructed from a day manifest and the archived
/// segments for that day.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub day: NaiveDate,
    pub base_artifact: Option<String>,
    pub steps: Vec<RestoreStep>,
}

/// Parses the sequence number out of a segment file name, accepting an
/// optional compression suffix: `binlog.000042` and `binlog.000042.gz`
/// both yield 42.
pub fn sequence_from_name(name: &str) -> Option<u64> {
    let trimmed = name.strip_suffix(".gz").unwrap_or(name);
    let (_, suffix) = trimmed.rsplit_once('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Builds the canonical segment file name for a sequence number.
pub fn segment_file_name(base_name: &str, sequence: u64) -> String {
    format!("{}.{:06}", base_name, sequence)
}
