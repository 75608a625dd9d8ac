// logtide/src/archive/safety.rs
//
// Log-archive safety analyzer: decides which source segments can be copied
// into the archive store and subsequently purged from the source without
// losing anything a replica or the recovery window still needs.
//
// Purging only ever happens below the longest contiguous archived prefix,
// clamped by the replica floor and the active segment. The purge record is
// persisted before the purge command is issued, so the audit trail
// survives a crash between the two.
//
// Concurrent invocations against the same instance are not locked against
// each other and must be serialized externally (e.g. by the scheduler).

use anyhow::Context;
use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::archive::catalog::LogCatalog;
use crate::errors::{EngineError, Result};
use crate::model::{sequence_from_name, Codec, DayManifest, PurgeRecord};
use crate::registry::InstanceContext;

/// What one archive cycle did, for the run summary and for tests.
#[derive(Debug)]
pub struct ArchiveOutcome {
    pub day: NaiveDate,
    /// Copied and verified this run.
    pub archived: Vec<u64>,
    /// Already present in the archive store, skipped.
    pub already_archived: Vec<u64>,
    /// Copy or verification failed this run.
    pub failed: Vec<u64>,
    pub compressed: usize,
    pub purge_boundary: Option<u64>,
    /// Source segments actually purged this run.
    pub purged: Vec<u64>,
}

impl ArchiveOutcome {
    pub fn summary_line(&self) -> String {
        format!(
            "archived {} (skipped {}, failed {}), purge boundary {}",
            self.archived.len(),
            self.already_archived.len(),
            self.failed.len(),
            self.purge_boundary
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".into())
        )
    }
}

/// One archived copy in the store: where it lives, and with which codec.
#[derive(Debug, Clone)]
pub struct ArchivedCopy {
    pub path: PathBuf,
    pub codec: Option<Codec>,
}

/// Scans every archive-day directory for segment copies. A `.gz` suffix
/// marks a gzip-compressed copy.
pub fn archived_copies(ctx: &InstanceContext) -> Result<BTreeMap<u64, ArchivedCopy>> {
    let arch_dir = ctx.tier_dir(crate::model::BackupTier::Archive);
    let mut copies = BTreeMap::new();
    if !arch_dir.is_dir() {
        return Ok(copies);
    }
    for day_entry in fs::read_dir(&arch_dir)? {
        let day_path = day_entry?.path();
        if !day_path.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&day_path)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(sequence) = sequence_from_name(name) else {
                continue;
            };
            // Only non-empty regular files count; a zero-length file is a
            // failed or interrupted copy, not an archived segment.
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            if !meta.is_file() || meta.len() == 0 {
                continue;
            }
            let codec = name.ends_with(".gz").then_some(Codec::Gzip);
            copies.insert(sequence, ArchivedCopy { path, codec });
        }
    }
    Ok(copies)
}

/// Runs one full archive-and-purge cycle against the given catalog.
pub fn run_archive_cycle(
    ctx: &InstanceContext,
    catalog: &dyn LogCatalog,
) -> Result<ArchiveOutcome> {
    let segments = catalog.list_segments()?;
    let active = catalog.current_segment()?;
    let floors = catalog.replica_floors()?;
    let replica_floor = floors.iter().map(|f| f.oldest_required).min();

    if let Some(floor) = replica_floor {
        println!(
            "🔎 Active segment {}, replica floor {} ({} replicas)",
            active.sequence,
            floor,
            floors.len()
        );
    } else {
        println!("🔎 Active segment {}, no replicas attached", active.sequence);
    }

    let day = Local::now().date_naive();
    let day_dir = ctx.day_dir(day);
    fs::create_dir_all(&day_dir)
        .with_context(|| format!("failed to create archive day directory {}", day_dir.display()))?;

    // First cycle of the day records the day's starting recovery position.
    if DayManifest::load(&day_dir)?.is_none() {
        let manifest = DayManifest {
            day,
            start_segment: active.sequence,
            start_offset: active.offset,
            recorded_at: Local::now(),
        };
        manifest.save(&day_dir)?;
        println!(
            "📌 Recorded day manifest: start segment {} offset {}",
            active.sequence, active.offset
        );
    }

    let candidates: Vec<_> = segments
        .iter()
        .filter(|s| {
            s.sequence < active.sequence
                && replica_floor.map_or(true, |floor| s.sequence < floor)
        })
        .collect();

    let mut store = archived_copies(ctx)?;
    let mut outcome = ArchiveOutcome {
        day,
        archived: Vec::new(),
        already_archived: Vec::new(),
        failed: Vec::new(),
        compressed: 0,
        purge_boundary: None,
        purged: Vec::new(),
    };

    for segment in &candidates {
        if store.contains_key(&segment.sequence) {
            outcome.already_archived.push(segment.sequence);
            continue;
        }
        let dest = day_dir.join(&segment.name);
        match copy_and_verify(&segment.path, &dest) {
            Ok(()) => {
                let copy = match compress_copy(&dest) {
                    Ok(gz_path) => {
                        outcome.compressed += 1;
                        ArchivedCopy {
                            path: gz_path,
                            codec: Some(Codec::Gzip),
                        }
                    }
                    Err(e) => {
                        // Best effort only: an uncompressed verified copy is
                        // still a successful backup.
                        eprintln!(
                            "⚠ Compression of {} failed, keeping plain copy: {}",
                            segment.name, e
                        );
                        ArchivedCopy {
                            path: dest,
                            codec: None,
                        }
                    }
                };
                println!("📦 Archived segment {} ({})", segment.sequence, segment.name);
                store.insert(segment.sequence, copy);
                outcome.archived.push(segment.sequence);
            }
            Err(e) => {
                // This run's purge boundary stops below this segment, but
                // higher candidates are still copied for reuse next run.
                eprintln!("❌ Failed to archive segment {}: {}", segment.sequence, e);
                outcome.failed.push(segment.sequence);
            }
        }
    }

    // Purge boundary: first sequence missing from the archived set, counting
    // up from the oldest candidate (or the oldest archived copy when the
    // source already lost its tail), clamped below the replica floor and the
    // active segment.
    let start = candidates
        .first()
        .map(|s| s.sequence)
        .or_else(|| store.keys().next().copied());
    if let Some(start) = start {
        let mut boundary = start;
        while store.contains_key(&boundary) {
            boundary += 1;
        }
        boundary = boundary.min(active.sequence);
        if let Some(floor) = replica_floor {
            boundary = boundary.min(floor);
        }
        outcome.purge_boundary = Some(boundary);

        let to_purge: Vec<u64> = segments
            .iter()
            .map(|s| s.sequence)
            .filter(|seq| *seq < boundary)
            .collect();
        if to_purge.is_empty() {
            println!("ℹ Purge boundary {}, nothing left to purge", boundary);
        } else {
            let record = PurgeRecord {
                recorded_at: Local::now(),
                boundary,
                purged: to_purge.clone(),
            };
            // Audit record goes to disk before the purge is issued.
            let record_path = record.persist(&day_dir)?;
            println!(
                "🧾 Purge record written to {} (boundary {})",
                record_path.display(),
                boundary
            );
            catalog.purge_to(boundary)?;
            println!("🗑 Purged {} source segments below {}", to_purge.len(), boundary);
            outcome.purged = to_purge;
        }
    } else {
        println!("ℹ No purgeable candidates this cycle");
    }

    Ok(outcome)
}

/// Byte-for-byte copy with the verification the purge decision relies on:
/// the destination must exist and be non-empty.
fn copy_and_verify(src: &Path, dest: &Path) -> Result<()> {
    let result = (|| -> Result<()> {
        fs::copy(src, dest)
            .with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
        let meta = fs::metadata(dest)
            .with_context(|| format!("verify existence of {}", dest.display()))?;
        if meta.len() == 0 {
            return Err(EngineError::Integrity(format!(
                "verified copy {} is empty",
                dest.display()
            )));
        }
        Ok(())
    })();
    if result.is_err() {
        // A failed copy must not linger in the store where it would count
        // towards the purge boundary.
        let _ = fs::remove_file(dest);
    }
    result
}

/// Gzip-compresses a verified copy in place, replacing `<name>` with
/// `<name>.gz`. Returns the compressed path.
fn compress_copy(path: &Path) -> Result<PathBuf> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let result = (|| -> Result<()> {
        let mut input = File::open(path)?;
        let output = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&gz_path);
        return Err(e);
    }
    // Both names on disk at once would make the store ambiguous; if the
    // plain copy cannot be removed, drop the compressed one and report
    // the plain copy instead.
    if let Err(e) = fs::remove_file(path)
        .with_context(|| format!("remove uncompressed copy {}", path.display()))
    {
        let _ = fs::remove_file(&gz_path);
        return Err(e.into());
    }
    Ok(gz_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::segment_file_name;
    use crate::testutil::{test_context, MemoryCatalog};

    #[test]
    fn test_full_prefix_is_archived_and_purged() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 9, 1537)?;

        let outcome = run_archive_cycle(&ctx, &catalog)?;

        assert_eq!(outcome.archived, (1..=9).collect::<Vec<_>>());
        assert_eq!(outcome.purge_boundary, Some(10));
        assert_eq!(outcome.purged, (1..=9).collect::<Vec<_>>());
        assert_eq!(catalog.purges.borrow().as_slice(), &[10]);

        // Source keeps only the active segment, archive store holds 1..=9.
        assert!(!catalog.source_has(9));
        assert!(catalog.source_has(10));
        let store = archived_copies(&ctx)?;
        assert_eq!(store.len(), 9);
        Ok(())
    }

    #[test]
    fn test_second_cycle_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 9, 1537)?;

        let first = run_archive_cycle(&ctx, &catalog)?;
        let second = run_archive_cycle(&ctx, &catalog)?;

        assert_eq!(first.purge_boundary, Some(10));
        assert_eq!(second.purge_boundary, Some(10));
        assert!(second.archived.is_empty());
        assert!(second.purged.is_empty());
        // No duplicate archive files, no second purge command.
        assert_eq!(archived_copies(&ctx)?.len(), 9);
        assert_eq!(catalog.purges.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn test_replica_floor_blocks_purge_at_floor() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 9, 0)?
            .with_replica_floor("db2", 5);

        let outcome = run_archive_cycle(&ctx, &catalog)?;

        assert_eq!(outcome.archived, vec![1, 2, 3, 4]);
        assert_eq!(outcome.purge_boundary, Some(5));
        // Segments at and above the floor stay on the source.
        for seq in 5..=10 {
            assert!(catalog.source_has(seq), "segment {} must survive", seq);
        }
        for seq in 1..=4 {
            assert!(!catalog.source_has(seq), "segment {} should be purged", seq);
        }
        Ok(())
    }

    #[test]
    fn test_failed_copy_truncates_boundary_but_keeps_higher_copies() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 5, 0)?;
        catalog.break_segment(3)?;

        let outcome = run_archive_cycle(&ctx, &catalog)?;

        assert_eq!(outcome.archived, vec![1, 2, 4, 5]);
        assert_eq!(outcome.failed, vec![3]);
        // Contiguity: only the prefix below the failure is purge-eligible.
        assert_eq!(outcome.purge_boundary, Some(3));
        assert_eq!(outcome.purged, vec![1, 2]);

        let store = archived_copies(&ctx)?;
        assert!(store.contains_key(&4) && store.contains_key(&5));
        assert!(!store.contains_key(&3));
        Ok(())
    }

    #[test]
    fn test_copies_are_compressed_with_recorded_codec() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 2, 0)?;

        let outcome = run_archive_cycle(&ctx, &catalog)?;
        assert_eq!(outcome.compressed, 2);

        let store = archived_copies(&ctx)?;
        let copy = store.get(&1).unwrap();
        assert_eq!(copy.codec, Some(Codec::Gzip));
        assert!(copy
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with(".gz"));
        // The plain copy is gone once the compressed one exists.
        let plain = copy.path.with_file_name(segment_file_name("binlog", 1));
        assert!(!plain.exists());
        Ok(())
    }

    #[test]
    fn test_compression_failure_keeps_exactly_the_plain_copy() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 1, 0)?;

        // A directory squatting on the .gz name makes compression fail.
        let day_dir = ctx.day_dir(Local::now().date_naive());
        fs::create_dir_all(day_dir.join(segment_file_name("binlog", 1) + ".gz"))?;

        let outcome = run_archive_cycle(&ctx, &catalog)?;
        assert_eq!(outcome.archived, vec![1]);
        assert_eq!(outcome.compressed, 0);
        assert_eq!(outcome.purge_boundary, Some(2));

        // The store resolves the sequence to the plain verified copy.
        let store = archived_copies(&ctx)?;
        let copy = store.get(&1).expect("plain copy recorded");
        assert_eq!(copy.codec, None);
        assert!(copy.path.is_file());
        assert!(day_dir.join(segment_file_name("binlog", 1)).is_file());
        Ok(())
    }

    #[test]
    fn test_day_manifest_written_once() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 3, 700)?;

        run_archive_cycle(&ctx, &catalog)?;
        let day_dir = ctx.day_dir(Local::now().date_naive());
        let manifest = DayManifest::load(&day_dir)?.expect("manifest written");
        assert_eq!(manifest.start_segment, 4);
        assert_eq!(manifest.start_offset, 700);

        // A later cycle the same day must not move the recovery position.
        run_archive_cycle(&ctx, &catalog)?;
        let manifest = DayManifest::load(&day_dir)?.unwrap();
        assert_eq!(manifest.start_offset, 700);
        Ok(())
    }

    #[test]
    fn test_purge_record_written_with_boundary_and_segments() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let catalog = MemoryCatalog::populate(&dir.path().join("source"), 1, 4, 0)?;

        run_archive_cycle(&ctx, &catalog)?;

        let day_dir = ctx.day_dir(Local::now().date_naive());
        let record_file = fs::read_dir(&day_dir)?
            .filter_map(|e| e.ok())
            .find(|e| e.file_name().to_string_lossy().starts_with("purge_"))
            .expect("purge record should exist");
        let record: PurgeRecord =
            serde_json::from_str(&fs::read_to_string(record_file.path())?)?;
        assert_eq!(record.boundary, 5);
        assert_eq!(record.purged, vec![1, 2, 3, 4]);
        Ok(())
    }
}
