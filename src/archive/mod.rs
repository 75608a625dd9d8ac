pub mod catalog;
mod safety;

pub use safety::{archived_copies, run_archive_cycle, ArchiveOutcome, ArchivedCopy};
