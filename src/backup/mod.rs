mod logic;
pub(crate) mod tool;

pub use logic::{list_artifacts, run_data_backup};
pub use tool::{BackupTool, CatalogEntry, XtraBackupTool};

use crate::archive::catalog::MysqlCatalog;
use crate::client::DbClient;
use crate::errors::Result;
use crate::model::BackupTier;
use crate::registry::{InstanceContext, InstanceSummary};

/// Entry point for the `backup <tier>` operation on one instance.
///
/// FULL and INCREMENTAL go through the data backup executor; ARCHIVE is
/// delegated entirely to the log-archive safety analyzer.
pub fn run_backup_flow(ctx: &InstanceContext, tier: BackupTier) -> Result<InstanceSummary> {
    match tier {
        BackupTier::Full | BackupTier::Incremental => {
            // Connectivity preflight: fatal for this instance only.
            DbClient::new(&ctx.tools.client_bin, &ctx.spec.dsn)?.ping(ctx.id())?;
            let artifact = run_data_backup(ctx, &XtraBackupTool, tier)?;
            Ok(InstanceSummary {
                operation: format!("backup {}", artifact.tier),
                detail: format!("{} ({} bytes)", artifact.tag, artifact.size_bytes),
            })
        }
        BackupTier::Archive => {
            let catalog = MysqlCatalog::connect(ctx)?;
            let outcome = crate::archive::run_archive_cycle(ctx, &catalog)?;
            Ok(InstanceSummary {
                operation: "backup ARCHIVE".into(),
                detail: outcome.summary_line(),
            })
        }
    }
}
