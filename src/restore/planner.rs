// logtide/src/restore/planner.rs
//
// Recovery planner: reconstructs an ordered replay plan for a target day
// from the day's manifest and the archived segments. Planning is pure
// inspection; nothing is executed here.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fs;

use crate::archive::ArchivedCopy;
use crate::errors::{EngineError, Result};
use crate::model::{
    sequence_from_name, BackupTier, Codec, DayManifest, RestorePlan, RestoreStep,
};
use crate::registry::InstanceContext;

/// Archived segment copies inside one day directory.
fn day_segments(ctx: &InstanceContext, day: NaiveDate) -> Result<BTreeMap<u64, ArchivedCopy>> {
    let day_dir = ctx.day_dir(day);
    let mut copies = BTreeMap::new();
    if !day_dir.is_dir() {
        return Ok(copies);
    }
    for entry in fs::read_dir(&day_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(sequence) = sequence_from_name(name) else {
            continue;
        };
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() || meta.len() == 0 {
            continue;
        }
        let codec = name.ends_with(".gz").then_some(Codec::Gzip);
        copies.insert(sequence, ArchivedCopy { path, codec });
    }
    Ok(copies)
}

/// Most recent FULL artifact taken on or before the target day, if any.
fn base_artifact_for(ctx: &InstanceContext, day: NaiveDate) -> Result<Option<String>> {
    let fulls = crate::backup::list_artifacts(ctx, BackupTier::Full)?;
    Ok(fulls
        .into_iter()
        .filter(|a| a.created_at.date_naive() <= day)
        .next_back()
        .map(|a| a.tag))
}

/// Builds the replay plan for `day`.
///
/// Fails with an integrity error when the day has no recorded recovery
/// position, or when the archived segment range is not contiguous. The
/// error names the first missing sequence number rather than attempting a
/// partial replay.
pub fn plan_restore(ctx: &InstanceContext, day: NaiveDate) -> Result<RestorePlan> {
    let day_dir = ctx.day_dir(day);
    let manifest = DayManifest::load(&day_dir)?.ok_or_else(|| {
        EngineError::Integrity(format!(
            "no manifest with a recorded recovery position for day {}",
            day
        ))
    })?;

    let segments = day_segments(ctx, day)?;
    let last = segments.keys().next_back().copied();
    let Some(last) = last.filter(|l| *l >= manifest.start_segment) else {
        return Err(EngineError::Integrity(format!(
            "missing archived segment {} for day {}",
            manifest.start_segment, day
        )));
    };

    let mut steps = Vec::new();
    for sequence in manifest.start_segment..=last {
        let Some(copy) = segments.get(&sequence) else {
            return Err(EngineError::Integrity(format!(
                "missing archived segment {} for day {}",
                sequence, day
            )));
        };
        let start_offset = if sequence == manifest.start_segment {
            manifest.start_offset
        } else {
            0
        };
        steps.push(RestoreStep {
            sequence,
            start_offset,
            path: copy.path.clone(),
            codec: copy.codec,
        });
    }

    Ok(RestorePlan {
        day,
        base_artifact: base_artifact_for(ctx, day)?,
        steps,
    })
}
