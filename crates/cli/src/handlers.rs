// Built-in job handlers available to `conveyor listen`

use async_trait::async_trait;
use conveyor_core::application::HandlerRegistry;
use conveyor_core::domain::{Job, JobPayload};
use conveyor_core::port::time_provider::SystemTimeProvider;
use conveyor_core::port::{ExecutionError, JobHandler, TimeProvider};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// Environment variables a job may set on its child process
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TZ"];

/// Registry with `echo` and `exec` registered
pub fn builtin_handlers() -> HandlerRegistry {
    let allowlist: Arc<Vec<String>> =
        Arc::new(DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect());

    HandlerRegistry::new()
        .with("echo", |_job: &Job| EchoHandler)
        .with("exec", move |_job: &Job| {
            ExecHandler::new(Arc::new(SystemTimeProvider), Arc::clone(&allowlist))
        })
}

/// Returns its payload unchanged
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, payload: &JobPayload) -> Result<serde_json::Value, ExecutionError> {
        Ok(payload.as_value().clone())
    }
}

/// Payload of an `exec` job
#[derive(Debug, Deserialize)]
struct ExecRequest {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default = "default_working_dir")]
    working_dir: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn default_working_dir() -> String {
    ".".to_string()
}

/// Runs a child process; a non-zero exit fails the attempt
///
/// Only allowlisted variables from the payload's `env` reach the child.
pub struct ExecHandler {
    time_provider: Arc<dyn TimeProvider>,
    env_allowlist: Arc<Vec<String>>,
}

impl ExecHandler {
    pub fn new(time_provider: Arc<dyn TimeProvider>, env_allowlist: Arc<Vec<String>>) -> Self {
        Self {
            time_provider,
            env_allowlist,
        }
    }

    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn spawn_and_wait(
        &self,
        request: &ExecRequest,
    ) -> Result<std::process::Output, ExecutionError> {
        let child = Command::new(&request.command)
            .args(&request.args)
            .envs(self.filter_env(&request.env))
            .current_dir(&request.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::failed(format!("Failed to spawn {}: {}", request.command, e))
            })?;

        match request.timeout_ms {
            Some(timeout_ms) => {
                match timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await {
                    Ok(output) => output.map_err(|e| ExecutionError::failed(e.to_string())),
                    Err(_) => Err(ExecutionError::Timeout(timeout_ms)),
                }
            }
            None => child
                .wait_with_output()
                .await
                .map_err(|e| ExecutionError::failed(e.to_string())),
        }
    }
}

#[async_trait]
impl JobHandler for ExecHandler {
    async fn handle(&self, payload: &JobPayload) -> Result<serde_json::Value, ExecutionError> {
        let request: ExecRequest = payload.parse()?;
        let start = self.time_provider.now_millis();

        info!(
            command = %request.command,
            args = ?request.args,
            working_dir = %request.working_dir,
            timeout_ms = ?request.timeout_ms,
            "Starting subprocess"
        );

        let output = self.spawn_and_wait(&request).await?;
        let duration_ms = self.time_provider.now_millis() - start;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        info!(
            command = %request.command,
            duration_ms,
            exit_code = ?output.status.code(),
            "Subprocess finished"
        );

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ExecutionError::failed(format!(
                "{} exited with {}: {}",
                request.command,
                code,
                stderr.trim()
            )));
        }

        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "duration_ms": duration_ms,
        }))
    }

    async fn failed(&self, job: &Job) -> Result<(), ExecutionError> {
        warn!(
            job_id = %job.id,
            attempts = job.attempts_made,
            reason = ?job.failed_reason,
            "Exec job gave up"
        );
        Ok(())
    }
}
