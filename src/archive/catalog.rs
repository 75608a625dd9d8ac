// logtide/src/archive/catalog.rs
//
// Typed view of the source server's binary-log state. The safety analyzer
// only ever sees structured records through the `LogCatalog` trait, never
// raw client output; the tab-separated parsing of the mysql client lives
// behind `MysqlCatalog` and nowhere else.

use crate::client::DbClient;
use crate::config::ToolPaths;
use crate::errors::{EngineError, Result};
use crate::model::{sequence_from_name, LogSegment, ReplicaPosition, SegmentStatus};
use crate::registry::InstanceContext;

/// Current write position of the source server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePosition {
    pub sequence: u64,
    pub name: String,
    pub offset: u64,
}

pub trait LogCatalog {
    /// All segments the source still holds, ordered by sequence number.
    fn list_segments(&self) -> Result<Vec<LogSegment>>;

    /// The segment currently being written, with the write offset.
    fn current_segment(&self) -> Result<ActivePosition>;

    /// Oldest still-required segment per attached replica. Unreachable
    /// replicas are reported as errors by the implementation; an empty list
    /// means no replicas are attached.
    fn replica_floors(&self) -> Result<Vec<ReplicaPosition>>;

    /// Deletes every source segment with a sequence strictly below
    /// `boundary`.
    fn purge_to(&self, boundary: u64) -> Result<()>;
}

/// Production catalog backed by the database client binary.
pub struct MysqlCatalog {
    client: DbClient,
    replica_clients: Vec<DbClient>,
    instance: String,
    log_dir: std::path::PathBuf,
}

impl MysqlCatalog {
    pub fn connect(ctx: &InstanceContext) -> Result<Self> {
        let tools: &ToolPaths = &ctx.tools;
        let client = DbClient::new(&tools.client_bin, &ctx.spec.dsn)?;
        client.ping(ctx.id())?;
        let log_dir = log_dir_of(&client, ctx.id())?;
        let replica_clients = ctx
            .spec
            .replicas
            .iter()
            .map(|dsn| DbClient::new(&tools.client_bin, dsn))
            .collect::<Result<Vec<_>>>()?;
        Ok(MysqlCatalog {
            client,
            replica_clients,
            instance: ctx.id().to_string(),
            log_dir,
        })
    }

    /// Name of the current segment as reported by the server, needed to
    /// express the purge boundary as a file name.
    fn segment_name_for(&self, sequence: u64) -> Result<String> {
        for segment in self.list_segments()? {
            if segment.sequence == sequence {
                return Ok(segment.name);
            }
        }
        Err(EngineError::Integrity(format!(
            "instance '{}': no source segment with sequence {}",
            self.instance, sequence
        )))
    }
}

/// Resolves the source log directory from the server's configured binary
/// log basename. The directory must be locally mounted for the
/// byte-for-byte segment copy to work.
fn log_dir_of(client: &DbClient, instance: &str) -> Result<std::path::PathBuf> {
    let output = client.query("SELECT @@log_bin_basename")?;
    let basename = output.trim();
    if basename.is_empty() || basename == "NULL" {
        return Err(EngineError::Configuration(format!(
            "instance '{}': binary logging is not enabled on the server",
            instance
        )));
    }
    let path = std::path::Path::new(basename);
    Ok(path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("/"))
        .to_path_buf())
}

impl LogCatalog for MysqlCatalog {
    fn list_segments(&self) -> Result<Vec<LogSegment>> {
        let output = self.client.query("SHOW BINARY LOGS")?;
        parse_binary_logs(&output, &self.log_dir)
    }

    fn current_segment(&self) -> Result<ActivePosition> {
        let output = self.client.query("SHOW MASTER STATUS")?;
        parse_master_status(&output).ok_or_else(|| {
            EngineError::Integrity(format!(
                "instance '{}': server reported no master status",
                self.instance
            ))
        })
    }

    fn replica_floors(&self) -> Result<Vec<ReplicaPosition>> {
        let mut floors = Vec::new();
        for client in &self.replica_clients {
            let replica = client.endpoint().host_str().unwrap_or("unknown").to_string();
            // The client enforces a bounded connect timeout. An unreachable
            // replica degrades to a warning and a floor of 0, which blocks
            // purging for this run instead of risking data it may need.
            let output = match client.query("SHOW SLAVE STATUS\\G") {
                Ok(o) => o,
                Err(e) => {
                    eprintln!("⚠ Replica {} unreachable, blocking purge this run: {}", replica, e);
                    floors.push(ReplicaPosition {
                        replica,
                        oldest_required: 0,
                    });
                    continue;
                }
            };
            match parse_replica_floor(&output) {
                Some(oldest_required) => floors.push(ReplicaPosition {
                    replica,
                    oldest_required,
                }),
                None => eprintln!(
                    "⚠ Replica {} reports no replication position; ignoring",
                    replica
                ),
            }
        }
        Ok(floors)
    }

    fn purge_to(&self, boundary: u64) -> Result<()> {
        let name = self.segment_name_for(boundary)?;
        self.client
            .execute(&format!("PURGE BINARY LOGS TO '{}'", name))
    }
}

/// Parses `SHOW BINARY LOGS` tab-separated output:
/// `binlog.000041\t1073741824\tNo`. Segment paths are rooted at `log_dir`.
pub fn parse_binary_logs(output: &str, log_dir: &std::path::Path) -> Result<Vec<LogSegment>> {
    let mut segments = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or_default().to_string();
        let size: u64 = fields
            .next()
            .unwrap_or("0")
            .trim()
            .parse()
            .map_err(|_| {
                EngineError::Integrity(format!("unparseable segment size in line '{}'", line))
            })?;
        let Some(sequence) = sequence_from_name(&name) else {
            return Err(EngineError::Integrity(format!(
                "unparseable segment name '{}'",
                name
            )));
        };
        segments.push(LogSegment {
            sequence,
            path: log_dir.join(&name),
            name,
            size_bytes: size,
            status: SegmentStatus::Closed,
            codec: None,
        });
    }
    segments.sort_by_key(|s| s.sequence);
    // The highest-numbered segment is the one the server writes to.
    if let Some(last) = segments.last_mut() {
        last.status = SegmentStatus::Active;
    }
    Ok(segments)
}

/// Parses the first row of `SHOW MASTER STATUS`:
/// `binlog.000042\t1537\t...`.
pub fn parse_master_status(output: &str) -> Option<ActivePosition> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.trim().split('\t');
    let name = fields.next()?.to_string();
    let offset: u64 = fields.next()?.trim().parse().ok()?;
    let sequence = sequence_from_name(&name)?;
    Some(ActivePosition {
        sequence,
        name,
        offset,
    })
}

/// Extracts the oldest master log file a replica still needs from
/// `SHOW SLAVE STATUS\G` output (`Relay_Master_Log_File`, falling back to
/// `Master_Log_File`).
pub fn parse_replica_floor(output: &str) -> Option<u64> {
    let mut master_log_file = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Relay_Master_Log_File" => return sequence_from_name(value.trim()),
            "Master_Log_File" => master_log_file = sequence_from_name(value.trim()),
            _ => {}
        }
    }
    master_log_file
}
