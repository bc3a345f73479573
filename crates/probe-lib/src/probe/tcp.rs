//! TCP socket probe

use super::{async_trait, ProbeError, ProbeOutcome, TcpProber};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;

/// Opens a TCP connection to the target and closes it again
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketProber;

#[async_trait]
impl TcpProber for TcpSocketProber {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        let addr = format!("{host}:{port}");
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(mut stream)) => {
                // The connection already answered the probe
                let _ = stream.shutdown().await;
                Ok(ProbeOutcome::success(""))
            }
            Ok(Err(e)) => Ok(ProbeOutcome::failure(format!("dial tcp {addr}: {e}"))),
            Err(_) => Ok(ProbeOutcome::failure(format!(
                "dial tcp {addr}: timed out after {timeout:?}"
            ))),
        }
    }
}
