// logtide/src/client.rs
//
// Thin wrapper around the database client binary. All instance and replica
// state queries go through here; the engine never speaks the wire protocol
// itself.

use std::path::PathBuf;
use std::process::Command;
use url::Url;
use which::which;

use crate::errors::{EngineError, Result};

/// Bounded timeout for auxiliary queries so an unreachable replica cannot
/// stall the batch.
const CONNECT_TIMEOUT_SECS: u32 = 10;

pub struct DbClient {
    client_path: PathBuf,
    endpoint: Url,
}

impl DbClient {
    pub fn new(client_bin: &str, endpoint: &Url) -> Result<Self> {
        let client_path = which(client_bin)
            .map_err(|_| EngineError::ToolUnavailable(client_bin.to_string()))?;
        Ok(DbClient {
            client_path,
            endpoint: endpoint.clone(),
        })
    }

    /// Bare client command with connection arguments only; used by the
    /// restore executor to pipe replay output into the server.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.client_path);
        if let Some(host) = self.endpoint.host_str() {
            cmd.arg("-h").arg(host);
        }
        if let Some(port) = self.endpoint.port() {
            cmd.arg("-P").arg(port.to_string());
        }
        let user = self.endpoint.username();
        if !user.is_empty() {
            cmd.arg("-u").arg(user);
        }
        if let Some(password) = self.endpoint.password() {
            // Passed through the environment so credentials never show up
            // in the process list.
            cmd.env("MYSQL_PWD", password);
        }
        cmd.arg(format!("--connect-timeout={}", CONNECT_TIMEOUT_SECS));
        cmd
    }

    /// Runs one statement and returns raw tab-separated output without
    /// column headers.
    pub fn query(&self, sql: &str) -> Result<String> {
        let output = self
            .command()
            .arg("-N")
            .arg("-B")
            .arg("-e")
            .arg(sql)
            .output()?;
        if !output.status.success() {
            return Err(EngineError::ToolExecution {
                tool: self.client_path.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Runs a statement for its side effect only.
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.query(sql).map(|_| ())
    }

    /// Connectivity preflight. Failure is reported per instance and never
    /// aborts the rest of the batch.
    pub fn ping(&self, instance: &str) -> Result<()> {
        self.query("SELECT 1").map(|_| ()).map_err(|e| {
            EngineError::Connectivity {
                instance: instance.to_string(),
                detail: e.to_string(),
            }
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}
