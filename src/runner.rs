//! Command execution.
//!
//! One `CommandRunner` per command: it spawns the child process, streams the
//! child's combined stdout/stderr into the command's output sink line by
//! line, and waits for exit or cancellation, whichever comes first.
//! Cancellation forcibly kills the whole process tree; graceful interrupt
//! delivery is not attempted because it is unreliable across platforms when
//! several children share a console.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::CommandSpec;
use crate::output::OutputSink;

/// Runs one command to completion or cancellation.
pub struct CommandRunner {
    spec: CommandSpec,
    sink: Arc<dyn OutputSink>,
}

impl CommandRunner {
    pub fn new(spec: CommandSpec, sink: Arc<dyn OutputSink>) -> Self {
        Self { spec, sink }
    }

    /// Spawns the command and streams its output until it exits or the
    /// cancellation signal fires.
    ///
    /// A spawn failure is a hard error for the whole run; anything the child
    /// does after launching (including failing) is reported through the sink
    /// instead.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> Result<()> {
        let mut command = Command::new(&self.spec.program);
        if let Some(arguments) = &self.spec.arguments {
            let args = shell_words::split(arguments).with_context(|| {
                format!("failed to parse arguments for {}", self.spec.program)
            })?;
            command.args(args);
        }
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        #[cfg(unix)]
        unsafe {
            // Own process group, so a kill can take descendants down too.
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.spec.program))?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stream(stdout, Arc::clone(&self.sink))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stream(stderr, Arc::clone(&self.sink))));
        }

        let status = tokio::select! {
            status = child.wait() => {
                Some(status.with_context(|| format!("failed to wait for {}", self.spec.program))?)
            }
            _ = cancelled(&mut cancel) => None,
        };

        match status {
            Some(status) => {
                drain(readers).await;
                self.sink.write_line(&exit_message(status));
            }
            None => {
                // The child may have exited just before the signal fired.
                let already_exited = child
                    .try_wait()
                    .with_context(|| format!("failed to wait for {}", self.spec.program))?;
                if let Some(status) = already_exited {
                    drain(readers).await;
                    self.sink.write_line(&exit_message(status));
                } else {
                    kill_process_tree(&mut child).await;
                    drain(readers).await;
                    self.sink.write_line("Process killed");
                }
            }
        }
        Ok(())
    }
}

fn exit_message(status: std::process::ExitStatus) -> String {
    format!("Process exited with code {}", status.code().unwrap_or(-1))
}

/// Resolves once the cancellation signal fires; pends forever otherwise.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            // Sender gone without firing; there is nothing left to wait for.
            std::future::pending::<()>().await;
        }
    }
}

/// Waits for the reader tasks, so buffered lines reach the sink before any
/// synthetic exit message.
async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.await;
    }
}

async fn read_stream<R>(reader: R, sink: Arc<dyn OutputSink>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        sink.write_line(&line);
    }
}

/// Forcibly terminates the child and its descendants.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child is its process-group leader; signal the whole group.
        unsafe {
            let _ = libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    impl OutputSink for RecordingSink {
        fn write_line(&self, line: &str) {
            self.lines.lock().push(line.to_string());
        }
    }

    fn spec(program: &str, arguments: Option<&str>) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            arguments: arguments.map(str::to_string),
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_a_hard_error() {
        let sink = Arc::new(RecordingSink::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(spec("multirun-no-such-program", None), sink.clone());
        let err = runner.run(cancel_rx).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(sink.lines().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_lines_then_exit_message() {
        let sink = Arc::new(RecordingSink::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(
            spec("sh", Some(r#"-c 'printf "one\ntwo\n"'"#)),
            sink.clone(),
        );
        runner.run(cancel_rx).await.unwrap();
        assert_eq!(
            sink.lines(),
            vec!["one", "two", "Process exited with code 0"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_nonzero_exit_code() {
        let sink = Arc::new(RecordingSink::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(spec("sh", Some("-c 'exit 3'")), sink.clone());
        runner.run(cancel_rx).await.unwrap();
        assert_eq!(sink.lines(), vec!["Process exited with code 3"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn merges_stdout_and_stderr_lines() {
        let sink = Arc::new(RecordingSink::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(
            spec("sh", Some("-c 'echo err 1>&2; echo out'")),
            sink.clone(),
        );
        runner.run(cancel_rx).await.unwrap();
        let lines = sink.lines();
        assert!(lines.contains(&"out".to_string()));
        assert!(lines.contains(&"err".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("Process exited with code 0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn honors_working_directory() {
        let sink = Arc::new(RecordingSink::default());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut spec = spec("pwd", None);
        spec.working_dir = Some("/".to_string());
        let runner = CommandRunner::new(spec, sink.clone());
        runner.run(cancel_rx).await.unwrap();
        assert_eq!(sink.lines()[0], "/");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_a_running_process() {
        let sink = Arc::new(RecordingSink::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(spec("sh", Some("-c 'sleep 5'")), sink.clone());
        let handle = tokio::spawn(runner.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel_tx.send_replace(true);
        handle.await.unwrap().unwrap();

        assert_eq!(sink.lines(), vec!["Process killed"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_after_exit_does_not_report_a_kill() {
        let sink = Arc::new(RecordingSink::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let runner = CommandRunner::new(spec("true", None), sink.clone());
        runner.run(cancel_rx).await.unwrap();

        cancel_tx.send_replace(true);

        let lines = sink.lines();
        assert_eq!(lines, vec!["Process exited with code 0"]);
        assert!(!lines.contains(&"Process killed".to_string()));
    }
}
