// Process Executor
// Spawns commands on this host, streams their output and enforces timeouts

use crate::error::{ServiceError, ServiceResult};
use crate::runners::{CommandExecutor, CommandOutput, CommandSpec};

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback for handling output lines in real-time
pub type OutputCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Executor that actually spawns processes
#[derive(Clone, Default)]
pub struct ProcessExecutor {
    on_output: Option<OutputCallback>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream every output line to `callback` (`true` for stderr)
    pub fn with_output_callback(mut self, callback: OutputCallback) -> Self {
        self.on_output = Some(callback);
        self
    }

    fn collect_lines<R>(&self, reader: R, is_error: bool) -> JoinHandle<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let on_output = self.on_output.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut output = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(callback) = &on_output {
                    callback(&line, is_error);
                }
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&line);
            }
            output
        })
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> ServiceResult<CommandOutput> {
        let start = Instant::now();
        info!(command = %spec.command_line(), "running");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(&spec.env);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Cancelling the future (stage or branch timeout) must not leak the child
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ServiceError::command(
                spec.command_line(),
                None,
                format!("failed to spawn '{}': {}", spec.program, e),
            )
        })?;

        let stdout_handle = child.stdout.take().map(|out| self.collect_lines(out, false));
        let stderr_handle = child.stderr.take().map(|err| self.collect_lines(err, true));

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ServiceError::Timeout {
                        stage: spec.command_line(),
                        limit,
                    });
                }
            },
            None => child.wait().await?,
        };

        let stdout = match stdout_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            duration: start.elapsed(),
        };
        debug!(
            command = %spec.program,
            exit_code = ?output.exit_code,
            elapsed_ms = output.duration.as_millis() as u64,
            "finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_echo() {
        let output = ProcessExecutor::new().run(&sh("echo hello"), None).await.unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "hello");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_env_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let spec = sh("echo $MY_VAR; pwd")
            .env("MY_VAR", "test_value")
            .current_dir(dir.path());
        let output = ProcessExecutor::new().run(&spec, None).await.unwrap();

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("test_value"));
        let pwd = lines.next().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(pwd).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_exit_code_is_output_not_error() {
        let executor = ProcessExecutor::new();
        let output = executor.run(&sh("echo bad >&2; exit 42"), None).await.unwrap();
        assert_eq!(output.exit_code, Some(42));
        assert_eq!(output.stderr, "bad");

        let err = executor.run_checked(&sh("exit 42"), None).await.unwrap_err();
        assert_eq!(err.exit_code(), 42);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = ProcessExecutor::new()
            .run(&CommandSpec::new("/definitely/not/a/binary"), None)
            .await
            .unwrap_err();
        assert!(err.is_command_failure());
        assert!(err.to_string().contains("/definitely/not/a/binary"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = ProcessExecutor::new()
            .run(&sh("sleep 5"), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_output_callback() {
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let executor = ProcessExecutor::new().with_output_callback(Arc::new(move |line, is_err| {
            sink.lock().unwrap().push((line.to_string(), is_err));
        }));

        executor
            .run(&sh("echo out; echo err >&2"), None)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&("out".to_string(), false)));
        assert!(seen.contains(&("err".to_string(), true)));
    }
}
