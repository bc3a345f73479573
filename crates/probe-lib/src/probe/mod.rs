//! Container probe execution
//!
//! The [`ProbeEngine`] runs one probe cycle for a container, dispatching to
//! exec, HTTP GET or TCP socket primitives. The primitives sit behind traits
//! so the engine never knows which backend serves a call.

mod engine;
mod exec;
mod expand;
mod http;
mod tcp;

pub use engine::{build_header, extract_port, format_url, HeaderList, ProbeEngine, MAX_PROBE_RETRIES};
pub use exec::RuntimeExecProber;
pub use expand::expand_command;
pub use http::ReqwestHttpProber;
pub use tcp::TcpSocketProber;

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use async_trait::async_trait;

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeResult {
    Success,
    Failure,
    /// The probe could not be attempted
    Unknown,
}

impl ProbeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::Success => "success",
            ProbeResult::Failure => "failure",
            ProbeResult::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result plus the diagnostic output produced by the probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub output: String,
}

impl ProbeOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::Success,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            result: ProbeResult::Failure,
            output: output.into(),
        }
    }
}

/// Errors raised while attempting a probe
///
/// An error means the probe could not produce a trustworthy answer; the
/// result of an errored attempt is [`ProbeResult::Unknown`].
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid port number: {0}")]
    InvalidPort(i64),

    #[error("port {0} not found")]
    PortNotFound(String),

    #[error("missing probe handler for {pod}:{container}")]
    MissingHandler { pod: String, container: String },

    #[error("invalid HTTP header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid probe URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("exec probe error: {0}")]
    Exec(String),

    #[error("http probe error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP GET probe primitive
#[async_trait]
pub trait HttpProber: Send + Sync {
    async fn probe(
        &self,
        url: &Url,
        headers: &HeaderList,
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// TCP connect probe primitive
#[async_trait]
pub trait TcpProber: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration)
        -> Result<ProbeOutcome, ProbeError>;
}

/// Command execution probe primitive
#[async_trait]
pub trait ExecProber: Send + Sync {
    async fn probe(
        &self,
        container_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError>;
}
