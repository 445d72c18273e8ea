//! Run a shell command per delivery.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use super::{
    required_field, required_param, Component, ComponentSettings, ConfigError, Params,
    ProcessError,
};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

/// Longest command output kept in the log line.
const MAX_LOGGED_OUTPUT: usize = 8 * 1024;

/// Runs the configured command with `sh -c`. The delivery body is written
/// to stdin; `HOOK_ID` and `HOOK_METHOD` are set in the environment.
pub struct ExecuteAction {
    timeout: Duration,
}

impl ExecuteAction {
    pub const NAME: &'static str = "execute-action";

    pub fn new(settings: &ComponentSettings) -> Self {
        Self {
            timeout: settings.execute_timeout,
        }
    }
}

#[async_trait]
impl Component for ExecuteAction {
    fn display_name(&self) -> &str {
        "Execute command"
    }

    fn config_template(&self) -> Option<&str> {
        Some(Self::NAME)
    }

    fn config_fields(&self) -> &'static [&'static str] {
        &["command"]
    }

    async fn init(
        &self,
        _hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        let command = required_param(params, "command")?;
        partition.set_field("command", command).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let command = required_field(partition, "command").await?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env("HOOK_ID", &hook.id)
            .env("HOOK_METHOD", &request.method)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = request.body.clone();
            // Commands that ignore stdin close the pipe early.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&body).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        warn!(target: "components", error = %e, "failed to write command stdin");
                    }
                }
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout(self.timeout))??;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        info!(
            target: "components",
            hook = %hook.id,
            command = %command,
            status = %output.status,
            output = %truncate(&combined, MAX_LOGGED_OUTPUT),
            "command executed"
        );

        if !output.status.success() {
            return Err(ProcessError::Upstream(format!(
                "command failed: {}",
                output.status
            )));
        }
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{open_store, params, write_tx};
    use tempfile::TempDir;

    async fn run(command: &str, request: &Request, timeout: Duration) -> Result<(), ProcessError> {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("exec");
        let action = ExecuteAction::new(&ComponentSettings {
            execute_timeout: timeout,
            ..ComponentSettings::default()
        });
        let tx = write_tx(&store).await;
        let partition = tx.partition(ExecuteAction::NAME, "exec");
        action
            .init(&hook, &params(&[("command", command)]), &partition)
            .await
            .unwrap();
        action.process(&hook, request, &partition).await
    }

    #[tokio::test]
    async fn test_command_receives_env_and_stdin() {
        let out = TempDir::new().unwrap();
        let target = out.path().join("out.txt");
        let command = format!(
            "printf '%s %s ' \"$HOOK_ID\" \"$HOOK_METHOD\" > {path}; cat >> {path}",
            path = target.display()
        );

        run(&command, &Request::new("PATCH", "payload"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "exec PATCH payload"
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let err = run("exit 3", &Request::new("POST", ""), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run("sleep 5", &Request::new("POST", ""), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
