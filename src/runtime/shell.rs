use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::error::{ProcessingFailure, RuntimeError};
use super::task::{OutputCollector, SourceHandler, SourcePoll, TaskContext, TaskHandler};
use crate::domain::{Tuple, Value};

/// End-of-message sentinel of the line-oriented subprocess protocol
const END: &str = "end";

/// How long a closing subprocess gets before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Command line and environment for an external processing script
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    pid_dir: PathBuf,
}

impl ShellCommand {
    /// An interpreter plus the script it runs, e.g. `node transactionBolt.js`
    pub fn new(command: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec![script.into()],
            working_dir: None,
            pid_dir: std::env::temp_dir(),
        }
    }

    /// Append an extra argument for the script
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Working directory for the subprocess
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Directory the script is told to write its pid file into
    pub fn with_pid_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pid_dir = dir.into();
        self
    }
}

/// Messages an external script sends on its stdout
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum ShellMessage {
    Emit {
        stream: String,
        tuple: Vec<Value>,
    },
    Ack {
        id: u64,
    },
    Fail {
        id: u64,
    },
    Log {
        msg: String,
    },
    /// A source finished one poll round
    Sync,
}

/// A running external script speaking newline-delimited JSON over its
/// standard streams, `end` terminated
struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ShellProcess {
    /// Spawn the subprocess and run the startup handshake: configuration,
    /// task context, and pid directory out; the script's pid back.
    async fn spawn(cmd: &ShellCommand, ctx: &TaskContext) -> Result<Self, RuntimeError> {
        let mut command = Command::new(&cmd.command);
        command
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Protocol("subprocess stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Protocol("subprocess stdout unavailable".to_string()))?;

        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        process
            .send(&json!({
                "conf": {},
                "context": {
                    "stage": ctx.stage(),
                    "index": ctx.index(),
                    "taskCount": ctx.task_count(),
                },
                "pidDir": cmd.pid_dir,
            }))
            .await?;

        let reply = process.read().await?;
        let pid = reply
            .get("pid")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| RuntimeError::Protocol("handshake reply missing pid".to_string()))?;
        debug!(
            stage = ctx.stage(),
            index = ctx.index(),
            pid,
            "subprocess handshake complete"
        );

        Ok(process)
    }

    async fn send(&mut self, message: &serde_json::Value) -> Result<(), RuntimeError> {
        let mut framed = message.to_string();
        framed.push('\n');
        framed.push_str(END);
        framed.push('\n');
        self.stdin.write_all(framed.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<serde_json::Value, RuntimeError> {
        let mut payload = String::new();
        while let Some(line) = self.stdout.next_line().await? {
            if line.trim() == END {
                return serde_json::from_str(payload.trim()).map_err(|error| {
                    RuntimeError::Protocol(format!("unparseable message from subprocess: {error}"))
                });
            }
            payload.push_str(&line);
            payload.push('\n');
        }
        Err(RuntimeError::Protocol(
            "subprocess closed its stdout".to_string(),
        ))
    }

    async fn read_command(&mut self) -> Result<ShellMessage, RuntimeError> {
        let message = self.read().await?;
        serde_json::from_value(message).map_err(|error| {
            RuntimeError::Protocol(format!("unexpected message from subprocess: {error}"))
        })
    }

    /// Close stdin and wait briefly for a clean exit before killing
    async fn shutdown(mut self) {
        drop(self.stdin);
        if tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

/// Processor task delegating its computation to an external script.
///
/// The script receives each input tuple as `{id, stream, tuple}` and
/// answers with any number of `emit` messages followed by an `ack` or
/// `fail` for the input's id.
pub struct ShellTask {
    cmd: ShellCommand,
    process: Option<ShellProcess>,
}

impl ShellTask {
    pub fn new(cmd: ShellCommand) -> Self {
        Self {
            cmd,
            process: None,
        }
    }

    /// Factory handing each task instance its own subprocess
    pub fn factory(
        command: &str,
        script: &str,
    ) -> impl Fn(&TaskContext) -> Box<dyn TaskHandler> + Send + 'static {
        let cmd = ShellCommand::new(command, script);
        move |_ctx| Box::new(Self::new(cmd.clone()))
    }
}

#[async_trait]
impl TaskHandler for ShellTask {
    async fn open(&mut self, ctx: &TaskContext) -> Result<(), RuntimeError> {
        self.process = Some(ShellProcess::spawn(&self.cmd, ctx).await?);
        Ok(())
    }

    async fn process(
        &mut self,
        input: &Tuple,
        out: &mut OutputCollector,
    ) -> Result<(), ProcessingFailure> {
        let Some(process) = self.process.as_mut() else {
            return Err(ProcessingFailure::new("subprocess not running"));
        };

        process
            .send(&json!({
                "id": input.id(),
                "stream": input.stream(),
                "tuple": input.values(),
            }))
            .await
            .map_err(|error| ProcessingFailure::new(error.to_string()))?;

        loop {
            let message = process
                .read_command()
                .await
                .map_err(|error| ProcessingFailure::new(error.to_string()))?;
            match message {
                ShellMessage::Emit { stream, tuple } => out.emit(stream, tuple),
                ShellMessage::Ack { id } if id == input.id() => return Ok(()),
                ShellMessage::Fail { id } if id == input.id() => {
                    return Err(ProcessingFailure::new("script failed the tuple"));
                }
                ShellMessage::Ack { id } | ShellMessage::Fail { id } => {
                    warn!(id, expected = input.id(), "resolution for unexpected tuple id");
                }
                ShellMessage::Log { msg } => info!(%msg, "subprocess log"),
                ShellMessage::Sync => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
    }
}

/// Source delegating ingestion to an external script.
///
/// Each poll sends `{"command": "next"}`; the script emits zero or more
/// root tuples and finishes the round with `sync`. Replay notifications go
/// back to the script as `fail` messages so it can rewind its own cursor.
pub struct ShellSource {
    cmd: ShellCommand,
    process: Option<ShellProcess>,
}

impl ShellSource {
    pub fn new(cmd: ShellCommand) -> Self {
        Self {
            cmd,
            process: None,
        }
    }

    /// Factory handing each source instance its own subprocess
    pub fn factory(
        command: &str,
        script: &str,
    ) -> impl Fn(&TaskContext) -> Box<dyn SourceHandler> + Send + 'static {
        let cmd = ShellCommand::new(command, script);
        move |_ctx| Box::new(Self::new(cmd.clone()))
    }
}

#[async_trait]
impl SourceHandler for ShellSource {
    async fn open(&mut self, ctx: &TaskContext) -> Result<(), RuntimeError> {
        self.process = Some(ShellProcess::spawn(&self.cmd, ctx).await?);
        Ok(())
    }

    async fn poll(&mut self, out: &mut OutputCollector) -> Result<SourcePoll, ProcessingFailure> {
        let Some(process) = self.process.as_mut() else {
            return Err(ProcessingFailure::new("subprocess not running"));
        };

        process
            .send(&json!({"command": "next"}))
            .await
            .map_err(|error| ProcessingFailure::new(error.to_string()))?;

        let mut emitted = false;
        loop {
            let message = process
                .read_command()
                .await
                .map_err(|error| ProcessingFailure::new(error.to_string()))?;
            match message {
                ShellMessage::Emit { stream, tuple } => {
                    out.emit(stream, tuple);
                    emitted = true;
                }
                ShellMessage::Sync => {
                    return Ok(if emitted {
                        SourcePoll::Emitted
                    } else {
                        SourcePoll::Idle
                    });
                }
                ShellMessage::Log { msg } => info!(%msg, "subprocess log"),
                ShellMessage::Ack { id } | ShellMessage::Fail { id } => {
                    warn!(id, "source script sent a tuple resolution");
                }
            }
        }
    }

    async fn replayed(&mut self, root: &Tuple) {
        if let Some(process) = self.process.as_mut()
            && let Err(error) = process.send(&json!({"command": "fail", "id": root.id()})).await
        {
            warn!(root = root.id(), %error, "could not notify script of replay");
        }
    }

    async fn close(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn script_file(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn ctx() -> TaskContext {
        TaskContext::new("transactions", 0, 1)
    }

    #[tokio::test]
    async fn shell_task_emits_and_acks() {
        let script = script_file(
            r#"read -r line; read -r line
echo '{"pid": 42}'; echo end
read -r line; read -r line
echo '{"command":"emit","stream":"exchangeAggregation","tuple":["e1","USD/XRP"]}'; echo end
echo '{"command":"ack","id":5}'; echo end
"#,
        );

        let mut task = ShellTask::new(ShellCommand::new(
            "/bin/sh",
            script.path().to_string_lossy(),
        ));
        task.open(&ctx()).await.unwrap();

        let input = Tuple::anchored(5, "txStream", vec![Value::from("tx")], vec![1]);
        let mut out = OutputCollector::default();
        task.process(&input, &mut out).await.unwrap();

        let emitted = out.drain();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, "exchangeAggregation");
        assert_eq!(emitted[0].1[1], Value::from("USD/XRP"));

        task.close().await;
    }

    #[tokio::test]
    async fn shell_task_fail_is_a_processing_failure() {
        let script = script_file(
            r#"read -r line; read -r line
echo '{"pid": 42}'; echo end
read -r line; read -r line
echo '{"command":"log","msg":"cannot parse transaction"}'; echo end
echo '{"command":"fail","id":5}'; echo end
"#,
        );

        let mut task = ShellTask::new(ShellCommand::new(
            "/bin/sh",
            script.path().to_string_lossy(),
        ));
        task.open(&ctx()).await.unwrap();

        let input = Tuple::anchored(5, "txStream", vec![Value::from("tx")], vec![1]);
        let mut out = OutputCollector::default();
        assert!(task.process(&input, &mut out).await.is_err());

        task.close().await;
    }

    #[tokio::test]
    async fn shell_task_without_pid_reply_fails_handshake() {
        let script = script_file(
            r#"read -r line; read -r line
echo '{"unexpected": true}'; echo end
"#,
        );

        let mut task = ShellTask::new(ShellCommand::new(
            "/bin/sh",
            script.path().to_string_lossy(),
        ));
        let err = task.open(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("pid"));
    }

    #[tokio::test]
    async fn shell_source_polls_until_sync() {
        let script = script_file(
            r#"read -r line; read -r line
echo '{"pid": 7}'; echo end
read -r line; read -r line
echo '{"command":"emit","stream":"txStream","tuple":["tx-1"]}'; echo end
echo '{"command":"sync"}'; echo end
read -r line; read -r line
echo '{"command":"sync"}'; echo end
"#,
        );

        let mut source = ShellSource::new(ShellCommand::new(
            "/bin/sh",
            script.path().to_string_lossy(),
        ));
        source.open(&TaskContext::new("ledger-stream", 0, 1)).await.unwrap();

        let mut out = OutputCollector::default();
        assert_eq!(source.poll(&mut out).await.unwrap(), SourcePoll::Emitted);
        assert_eq!(out.len(), 1);
        out.discard();

        assert_eq!(source.poll(&mut out).await.unwrap(), SourcePoll::Idle);
        assert!(out.is_empty());

        source.close().await;
    }
}
