// logtide/src/config/mod.rs
//
// Engine configuration: a JSON file describing the target instances, the
// external tool binaries and the retention policy, layered with CLI
// overrides into one validated `EngineConfig` value. The value is threaded
// explicitly through every operation; nothing reads ambient globals.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::{EngineError, Result};
use crate::model::RetentionPolicy;

// Structs for deserializing the raw config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRetentionConfig {
    pub full_days: Option<u32>,
    pub incremental_days: Option<u32>,
    pub archive_days: Option<u32>,
    pub recovery_window_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInstanceConfig {
    pub id: Option<String>,
    pub dsn: Option<String>,
    pub replicas: Option<Vec<String>>,
    pub parallel: Option<u32>,
    pub piece_size_mb: Option<u64>,
    pub backup_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEngineConfig {
    pub backup_root: Option<PathBuf>,
    pub tool_bin: Option<String>,
    pub client_bin: Option<String>,
    pub replay_bin: Option<String>,
    pub retention: Option<RawRetentionConfig>,
    pub instances: Option<Vec<RawInstanceConfig>>,
}

/// Paths of the external binaries the engine shells out to. All three are
/// black boxes; only their exit status and output are interpreted.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub tool_bin: String,
    pub client_bin: String,
    pub replay_bin: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            tool_bin: "xtrabackup".to_string(),
            client_bin: "mysql".to_string(),
            replay_bin: "mysqlbinlog".to_string(),
        }
    }
}

/// One resolved target instance with its effective per-instance knobs.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub id: String,
    pub dsn: Url,
    pub replicas: Vec<Url>,
    pub parallel: u32,
    pub piece_size_mb: Option<u64>,
    pub backup_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backup_root: PathBuf,
    pub tools: ToolPaths,
    pub retention: RetentionPolicy,
    pub instances: Vec<InstanceSpec>,
}

/// Command-line overrides that take precedence over per-instance config.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backup_root: Option<PathBuf>,
    pub parallel: Option<u32>,
    pub piece_size_mb: Option<u64>,
}

const DEFAULT_PARALLEL: u32 = 1;

impl EngineConfig {
    pub fn load(config_path: &Path, overrides: &CliOverrides) -> Result<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            EngineError::Configuration(format!(
                "failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let raw: RawEngineConfig = serde_json::from_str(&content).map_err(|e| {
            EngineError::Configuration(format!(
                "failed to parse JSON from {}: {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_raw(raw, overrides)
    }

    pub fn from_raw(raw: RawEngineConfig, overrides: &CliOverrides) -> Result<Self> {
        let backup_root = overrides
            .backup_root
            .clone()
            .or(raw.backup_root)
            .ok_or_else(|| {
                EngineError::Configuration("backup_root must be set (config or --backup-root)".into())
            })?;

        let tools = ToolPaths {
            tool_bin: raw.tool_bin.unwrap_or_else(|| ToolPaths::default().tool_bin),
            client_bin: raw
                .client_bin
                .unwrap_or_else(|| ToolPaths::default().client_bin),
            replay_bin: raw
                .replay_bin
                .unwrap_or_else(|| ToolPaths::default().replay_bin),
        };

        let defaults = RetentionPolicy::default();
        let retention = match raw.retention {
            Some(r) => RetentionPolicy {
                full_days: r.full_days.unwrap_or(defaults.full_days),
                incremental_days: r.incremental_days.unwrap_or(defaults.incremental_days),
                archive_days: r.archive_days.unwrap_or(defaults.archive_days),
                recovery_window_days: r
                    .recovery_window_days
                    .unwrap_or(defaults.recovery_window_days),
            },
            None => defaults,
        };

        let raw_instances = raw.instances.unwrap_or_default();
        if raw_instances.is_empty() {
            return Err(EngineError::Configuration(
                "at least one instance must be configured".into(),
            ));
        }

        let mut seen_ids = HashSet::new();
        let mut instances = Vec::with_capacity(raw_instances.len());
        for raw_inst in raw_instances {
            let id = raw_inst
                .id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    EngineError::Configuration("every instance needs a non-empty id".into())
                })?
                .to_string();
            if !seen_ids.insert(id.clone()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate instance id '{}'",
                    id
                )));
            }
            let dsn_str = raw_inst.dsn.as_deref().ok_or_else(|| {
                EngineError::Configuration(format!("instance '{}' is missing a dsn", id))
            })?;
            let dsn = parse_dsn(&id, dsn_str)?;
            let replicas = raw_inst
                .replicas
                .unwrap_or_default()
                .iter()
                .map(|r| parse_dsn(&id, r))
                .collect::<Result<Vec<_>>>()?;

            let parallel = overrides
                .parallel
                .or(raw_inst.parallel)
                .unwrap_or(DEFAULT_PARALLEL);
            if parallel == 0 {
                return Err(EngineError::Configuration(format!(
                    "instance '{}': parallel must be at least 1",
                    id
                )));
            }

            instances.push(InstanceSpec {
                id,
                dsn,
                replicas,
                parallel,
                piece_size_mb: overrides.piece_size_mb.or(raw_inst.piece_size_mb),
                backup_root: raw_inst
                    .backup_root
                    .unwrap_or_else(|| backup_root.clone()),
            });
        }

        Ok(EngineConfig {
            backup_root,
            tools,
            retention,
            instances,
        })
    }
}

fn parse_dsn(instance_id: &str, dsn: &str) -> Result<Url> {
    let url = Url::parse(dsn).map_err(|e| {
        EngineError::Configuration(format!(
            "instance '{}': invalid dsn '{}': {}",
            instance_id, dsn, e
        ))
    })?;
    if url.host_str().is_none() {
        return Err(EngineError::Configuration(format!(
            "instance '{}': dsn '{}' has no host",
            instance_id, dsn
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupTier;
    use serde_json::json;

    fn raw_from_json(value: serde_json::Value) -> RawEngineConfig {
        serde_json::from_value(value).expect("raw config should deserialize")
    }

    #[test]
    fn test_minimal_config_applies_defaults() -> Result<()> {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "instances": [{"id": "orcl", "dsn": "mysql://root:pw@db1:3306"}]
        }));
        let config = EngineConfig::from_raw(raw, &CliOverrides::default())?;

        assert_eq!(config.tools.tool_bin, "xtrabackup");
        assert_eq!(config.retention.days_for(BackupTier::Full), 30);
        assert_eq!(config.instances.len(), 1);
        let inst = &config.instances[0];
        assert_eq!(inst.id, "orcl");
        assert_eq!(inst.parallel, 1);
        assert_eq!(inst.backup_root, PathBuf::from("/backup"));
        assert!(inst.replicas.is_empty());
        Ok(())
    }

    #[test]
    fn test_instance_overrides_and_replicas() -> Result<()> {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "retention": {"full_days": 14, "archive_days": 3},
            "instances": [{
                "id": "orcl",
                "dsn": "mysql://root:pw@db1:3306",
                "replicas": ["mysql://repl:pw@db2:3306"],
                "parallel": 4,
                "piece_size_mb": 512,
                "backup_root": "/fast/backup"
            }]
        }));
        let config = EngineConfig::from_raw(raw, &CliOverrides::default())?;

        assert_eq!(config.retention.full_days, 14);
        assert_eq!(config.retention.incremental_days, 7); // default kept
        let inst = &config.instances[0];
        assert_eq!(inst.parallel, 4);
        assert_eq!(inst.piece_size_mb, Some(512));
        assert_eq!(inst.backup_root, PathBuf::from("/fast/backup"));
        assert_eq!(inst.replicas.len(), 1);
        Ok(())
    }

    #[test]
    fn test_cli_overrides_win() -> Result<()> {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "instances": [{"id": "orcl", "dsn": "mysql://root@db1", "parallel": 4}]
        }));
        let overrides = CliOverrides {
            backup_root: Some(PathBuf::from("/cli/backup")),
            parallel: Some(8),
            piece_size_mb: Some(256),
        };
        let config = EngineConfig::from_raw(raw, &overrides)?;

        assert_eq!(config.backup_root, PathBuf::from("/cli/backup"));
        assert_eq!(config.instances[0].parallel, 8);
        assert_eq!(config.instances[0].piece_size_mb, Some(256));
        Ok(())
    }

    #[test]
    fn test_missing_dsn_is_configuration_error() {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "instances": [{"id": "orcl"}]
        }));
        let err = EngineConfig::from_raw(raw, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_instance_id_rejected() {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "instances": [
                {"id": "orcl", "dsn": "mysql://root@db1"},
                {"id": "orcl", "dsn": "mysql://root@db2"}
            ]
        }));
        let err = EngineConfig::from_raw(raw, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_no_instances_rejected() {
        let raw = raw_from_json(json!({"backup_root": "/backup", "instances": []}));
        let err = EngineConfig::from_raw(raw, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_zero_parallel_rejected() {
        let raw = raw_from_json(json!({
            "backup_root": "/backup",
            "instances": [{"id": "orcl", "dsn": "mysql://root@db1", "parallel": 0}]
        }));
        let err = EngineConfig::from_raw(raw, &CliOverrides::default()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
