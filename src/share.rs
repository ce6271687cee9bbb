use std::fmt;
use std::process::Command;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Prism,
    DotNet,
}

impl FromStr for ConnectorKind {
    type Err = CaptureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "prism" => Ok(ConnectorKind::Prism),
            "dotnet" => Ok(ConnectorKind::DotNet),
            _ => Err(CaptureError::InvalidConnectorKind(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    ConnectedPrism,
    ConnectedDotNet,
}

#[derive(Debug, Clone)]
pub struct ConnectError {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

// Connector codes meaning the host's network session is dead or saturated;
// every later connect on this host will fail the same way.
const SESSION_FAULT_CODES: &[u32] = &[59, 64, 1219, 1331, 1935];

// Bad credential or unreachable share: the job fails, the host is fine.
const LOGON_FAULT_CODES: &[u32] = &[86, 1326];

pub fn is_session_fault_code(code: u32) -> bool {
    SESSION_FAULT_CODES.contains(&code)
}

pub fn is_logon_fault_code(code: u32) -> bool {
    LOGON_FAULT_CODES.contains(&code)
}

pub trait ShareConnector: Send + Sync {
    fn connect(
        &self,
        kind: ConnectorKind,
        user: &str,
        secret: &str,
        share_path: &Utf8Path,
    ) -> Result<(), ConnectError>;
    fn disconnect(&self, share_path: &Utf8Path) -> Result<(), ConnectError>;
}

/// Establishes SMB sessions through the platform credential tool. The two
/// strategies differ only in how the credential is handed over: the legacy
/// form passes it inline, the modern form scopes it per user argument.
#[derive(Debug, Clone, Default)]
pub struct SystemShareConnector;

impl SystemShareConnector {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, args: &[String]) -> Result<(), ConnectError> {
        let output = Command::new("net").args(args).output().map_err(|err| ConnectError {
            code: 0,
            message: format!("failed to launch credential tool: {err}"),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ConnectError {
            code: parse_system_error_code(&stderr),
            message: if stderr.is_empty() {
                "credential tool failed".to_string()
            } else {
                stderr
            },
        })
    }
}

impl ShareConnector for SystemShareConnector {
    fn connect(
        &self,
        kind: ConnectorKind,
        user: &str,
        secret: &str,
        share_path: &Utf8Path,
    ) -> Result<(), ConnectError> {
        let args = match kind {
            ConnectorKind::Prism => vec![
                "use".to_string(),
                share_path.to_string(),
                secret.to_string(),
                format!("/user:{user}"),
            ],
            ConnectorKind::DotNet => vec![
                "use".to_string(),
                share_path.to_string(),
                format!("/user:{user}"),
                secret.to_string(),
                "/persistent:no".to_string(),
            ],
        };
        self.run(&args)
    }

    fn disconnect(&self, share_path: &Utf8Path) -> Result<(), ConnectError> {
        self.run(&[
            "use".to_string(),
            share_path.to_string(),
            "/delete".to_string(),
        ])
    }
}

// "System error NNN has occurred." is the one structured field in the
// credential tool's output.
fn parse_system_error_code(stderr: &str) -> u32 {
    stderr
        .split_whitespace()
        .skip_while(|word| !word.eq_ignore_ascii_case("error"))
        .nth(1)
        .and_then(|word| word.trim_matches('.').parse().ok())
        .unwrap_or(0)
}

/// Open share connection. Dropping the guard disconnects, so release runs
/// on every exit path of every caller.
pub struct ShareConnection<'a> {
    connector: &'a dyn ShareConnector,
    share_path: Utf8PathBuf,
    state: ConnectionState,
}

impl<'a> ShareConnection<'a> {
    pub fn open(
        connector: &'a dyn ShareConnector,
        kind: ConnectorKind,
        user: &str,
        secret: &str,
        share_path: &Utf8Path,
    ) -> Result<Self, CaptureError> {
        connector
            .connect(kind, user, secret, share_path)
            .map_err(|err| CaptureError::ShareConnect {
                code: err.code,
                message: err.message,
            })?;
        let state = match kind {
            ConnectorKind::Prism => ConnectionState::ConnectedPrism,
            ConnectorKind::DotNet => ConnectionState::ConnectedDotNet,
        };
        debug!(share = %share_path, ?state, "share connected");
        Ok(Self {
            connector,
            share_path: share_path.to_path_buf(),
            state,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::NotConnected {
            return;
        }
        if let Err(err) = self.connector.disconnect(&self.share_path) {
            warn!(share = %self.share_path, %err, "share disconnect failed");
        }
        self.state = ConnectionState::NotConnected;
    }
}

impl Drop for ShareConnection<'_> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
