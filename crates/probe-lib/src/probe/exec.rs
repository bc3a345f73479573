//! Exec probe through the container runtime CLI

use super::{async_trait, ExecProber, ProbeError, ProbeOutcome};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs `<runtime> exec <container-id> <command...>` and judges the exit code
#[derive(Debug, Clone)]
pub struct RuntimeExecProber {
    runtime: String,
    exec_args: Vec<String>,
}

impl RuntimeExecProber {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            exec_args: vec!["exec".to_string()],
        }
    }

    /// Replace the arguments placed before the container id
    pub fn with_exec_args(mut self, args: Vec<String>) -> Self {
        self.exec_args = args;
        self
    }
}

#[async_trait]
impl ExecProber for RuntimeExecProber {
    async fn probe(
        &self,
        container_id: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<ProbeOutcome, ProbeError> {
        if command.is_empty() {
            return Err(ProbeError::Exec("exec probe command cannot be empty".to_string()));
        }

        let child = Command::new(&self.runtime)
            .args(&self.exec_args)
            .arg(container_id)
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Exec(format!("failed to run {}: {e}", self.runtime)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(ProbeOutcome::success(text))
        } else {
            Ok(ProbeOutcome::failure(text))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probe::ProbeResult;

    /// Runtime stand-in: drops the container id and evaluates the command in sh
    fn fake_runtime() -> RuntimeExecProber {
        RuntimeExecProber::new("sh").with_exec_args(vec![
            "-c".to_string(),
            "shift; eval \"$@\"".to_string(),
            "fake-runtime".to_string(),
        ])
    }

    fn cmd(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_results() {
        let prober = fake_runtime();

        let ok = prober
            .probe("c1", &cmd("echo healthy"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok.result, ProbeResult::Success);
        assert_eq!(ok.output.trim(), "healthy");

        let failed = prober
            .probe("c1", &cmd("echo sick >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(failed.result, ProbeResult::Failure);
        assert_eq!(failed.output.trim(), "sick");
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let prober = fake_runtime();

        let err = prober
            .probe("c1", &cmd("sleep 5"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_runtime_is_error() {
        let prober = RuntimeExecProber::new("/nonexistent/runtime");
        let err = prober
            .probe("c1", &cmd("true"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Exec(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let prober = RuntimeExecProber::new("sh");
        assert!(prober.probe("c1", &[], Duration::from_secs(1)).await.is_err());
    }
}
