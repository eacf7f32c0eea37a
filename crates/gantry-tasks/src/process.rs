//! External process execution
//!
//! Commands run in the context's directory with their output pumped line by
//! line into the context's sinks. On unix every command gets its own process
//! group so that cancellation reaches the whole subtree it spawns.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{FusedFuture, FutureExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::TaskError;
use crate::output::OutputSink;

/// Environment variable carrying the scoped path
pub const PATH_ENV: &str = "GANTRY_PATH";

/// Prefix of the environment variables carrying task options
pub const FLAG_ENV_PREFIX: &str = "GANTRY_FLAG_";

/// An external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    display: String,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            display: program.clone(),
            program,
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Run `command` through the platform shell (`sh -c`, or `cmd /C` on Windows)
    pub fn shell(command: impl Into<String>) -> Self {
        let shell = if cfg!(windows) { "cmd" } else { "sh" };
        Self::shell_with(shell, command)
    }

    /// Run `command` through a specific shell
    pub fn shell_with(shell: &str, command: impl Into<String>) -> Self {
        let command = command.into();
        let flag = if shell.eq_ignore_ascii_case("cmd") || shell.eq_ignore_ascii_case("cmd.exe") {
            "/C"
        } else {
            "-c"
        };
        Self {
            program: shell.to_string(),
            args: vec![flag.to_string(), command.clone()],
            env: BTreeMap::new(),
            display: command,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        self.display.push(' ');
        self.display.push_str(&arg);
        self.args.push(arg);
        self
    }

    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line as shown to users
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Run the command to completion in the context's directory
    pub async fn run(&self, ctx: &RunContext) -> Result<(), TaskError> {
        let cancel = ctx.cancel_token();
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        if ctx.is_verbose() {
            let _ = ctx
                .output()
                .eprintln(format!("[{}] $ {}", ctx.path(), self.display));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(ctx.abs_path())
            .envs(&self.env)
            .env(PATH_ENV, ctx.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in ctx.options().iter() {
            cmd.env(flag_env_name(name), value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %self.display, path = %ctx.path(), "spawning process");
        let mut child = cmd.spawn().map_err(|e| TaskError::Spawn {
            command: self.display.clone(),
            source: Arc::new(e),
        })?;

        // Captured now: once the leader is reaped `id()` returns None, but its
        // group may still hold background children.
        let pid = child.id();
        let (out_sink, err_sink) = (ctx.out().clone(), ctx.err().clone());
        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
        let mut output = Box::pin(async move {
            tokio::join!(pump(stdout, out_sink), pump(stderr, err_sink));
        })
        .fuse();

        // The run is over once the leader exited and every holder of its pipes
        // closed them. Cancellation is observed until then.
        let mut status = None;
        let exited = loop {
            if output.is_terminated() {
                if let Some(status) = status.take() {
                    break Some(status);
                }
            }
            tokio::select! {
                exited = child.wait(), if status.is_none() => status = Some(exited),
                _ = &mut output, if !output.is_terminated() => {}
                _ = cancel.cancelled() => break None,
            }
        };

        match exited {
            None => {
                interrupt_then_kill(&mut child, pid, &mut output, ctx.grace(), &self.display).await;
                Err(TaskError::Cancelled)
            }
            Some(Err(e)) => Err(TaskError::from(e)),
            Some(Ok(status)) if status.success() => Ok(()),
            Some(Ok(_)) if cancel.is_cancelled() => Err(TaskError::Cancelled),
            Some(Ok(status)) => Err(TaskError::Command {
                task: ctx.task_name().map(str::to_string),
                path: ctx.path().to_string(),
                command: self.display.clone(),
                code: status.code(),
            }),
        }
    }
}

/// `strict-mode` becomes `GANTRY_FLAG_STRICT_MODE`
pub fn flag_env_name(flag: &str) -> String {
    let mut name = String::from(FLAG_ENV_PREFIX);
    name.extend(flag.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

async fn pump<R>(reader: Option<R>, sink: Arc<dyn OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Err(e) = sink.write_all(&line) {
                    debug!(error = %e, "dropping process output");
                }
            }
            Err(e) => {
                debug!(error = %e, "process output stream failed");
                break;
            }
        }
    }
}

/// Interrupt the process group, then kill it if it is still alive (or still
/// holding the output pipes) after `grace`.
async fn interrupt_then_kill<F>(
    child: &mut Child,
    pid: Option<u32>,
    output: &mut F,
    grace: Duration,
    command: &str,
) where
    F: FusedFuture<Output = ()> + Unpin,
{
    info!(command = %command, ?pid, "interrupting process");

    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, libc::SIGINT);
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(grace, settle(child, output)).await.is_ok() {
        debug!(command = %command, "process exited after interrupt");
        return;
    }

    warn!(
        command = %command,
        grace_ms = grace.as_millis() as u64,
        "process ignored interrupt, killing"
    );
    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, libc::SIGKILL);
    }
    let _ = child.start_kill();

    // A process that left the group could keep the pipes open forever
    if tokio::time::timeout(grace, settle(child, output)).await.is_err() {
        warn!(command = %command, "output still open after kill, abandoning it");
    }
}

/// Wait for the leader to be reaped and the output pipes to close
async fn settle<F>(child: &mut Child, output: &mut F)
where
    F: FusedFuture<Output = ()> + Unpin,
{
    let drained = async {
        if !output.is_terminated() {
            output.await;
        }
    };
    let (status, ()) = tokio::join!(child.wait(), drained);
    if let Err(e) = status {
        warn!(error = %e, "failed to reap process");
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // The child was spawned as the leader of its own process group, so a
    // negative pid addresses the child and everything it started.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(pid, signal, error = %std::io::Error::last_os_error(), "failed to signal process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::execution::Execution;
    use crate::output::Output;
    use std::time::Instant;
    use tempfile::TempDir;

    fn context(root: &std::path::Path, grace: Duration) -> (RunContext, Arc<crate::output::MemorySink>, Arc<crate::output::MemorySink>) {
        let (output, stdout, stderr) = Output::memory();
        let exec = Execution::builder(root)
            .grace(grace)
            .output(output)
            .build_for(&[])
            .unwrap();
        (exec.root_context(), stdout, stderr)
    }

    #[test]
    fn test_shell_command_display() {
        let cmd = ProcessCommand::shell("cargo fmt --all");
        assert_eq!(cmd.display(), "cargo fmt --all");

        let cmd = ProcessCommand::shell_with("cmd", "dir");
        assert_eq!(cmd.args, vec!["/C", "dir"]);

        let cmd = ProcessCommand::new("cargo").args(["clippy", "--all"]);
        assert_eq!(cmd.display(), "cargo clippy --all");
    }

    #[test]
    fn test_flag_env_name() {
        assert_eq!(flag_env_name("strict"), "GANTRY_FLAG_STRICT");
        assert_eq!(flag_env_name("fail-fast.level"), "GANTRY_FLAG_FAIL_FAST_LEVEL");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_scoped_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("app")).unwrap();
        let (ctx, stdout, stderr) = context(temp.path(), Duration::from_secs(1));
        let ctx = ctx.scoped("app", &Default::default());

        ProcessCommand::shell("basename \"$PWD\"; echo \"$GANTRY_PATH\"; echo warn >&2")
            .run(&ctx)
            .await
            .unwrap();

        assert_eq!(stdout.text(), "app\napp\n");
        assert_eq!(stderr.text(), "warn\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exports_options() {
        let temp = TempDir::new().unwrap();
        let (ctx, stdout, _) = context(temp.path(), Duration::from_secs(1));
        let overrides: crate::context::TaskOptions = [("strict", "true")].into_iter().collect();
        let ctx = ctx.scoped(".", &overrides);

        ProcessCommand::shell("echo $GANTRY_FLAG_STRICT")
            .env("EXTRA", "1")
            .run(&ctx)
            .await
            .unwrap();
        assert_eq!(stdout.text(), "true\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit() {
        let temp = TempDir::new().unwrap();
        let (ctx, _, _) = context(temp.path(), Duration::from_secs(1));

        let err = ProcessCommand::shell("exit 3").run(&ctx).await.unwrap_err();
        match err {
            TaskError::Command { code, path, command, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(path, ".");
                assert_eq!(command, "exit 3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let (ctx, _, _) = context(temp.path(), Duration::from_secs(1));

        let err = ProcessCommand::new("gantry-no-such-program")
            .run(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_interrupts_process() {
        let temp = TempDir::new().unwrap();
        let (ctx, _, _) = context(temp.path(), Duration::from_secs(10));
        let token = CancelToken::new();
        let ctx = ctx.with_cancel(token.clone());

        let started = Instant::now();
        let run = tokio::spawn(async move { ProcessCommand::shell("sleep 30").run(&ctx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let err = run.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_kills_after_grace() {
        let temp = TempDir::new().unwrap();
        let grace = Duration::from_millis(300);
        let (ctx, _, _) = context(temp.path(), grace);
        let token = CancelToken::new();
        let ctx = ctx.with_cancel(token.clone());

        let run = tokio::spawn(async move {
            ProcessCommand::shell("trap '' INT; exec sleep 30").run(&ctx).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cancelled_at = Instant::now();
        token.cancel();
        let err = run.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        let elapsed = cancelled_at.elapsed();
        assert!(elapsed >= grace, "killed before grace: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "not killed: {:?}", elapsed);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_reaches_background_child_after_shell_exits() {
        let temp = TempDir::new().unwrap();
        let grace = Duration::from_millis(300);
        let (ctx, stdout, _) = context(temp.path(), grace);
        let token = CancelToken::new();
        let ctx = ctx.with_cancel(token.clone());

        // The shell exits at once; the backgrounded sleep keeps the pipes open
        let run = tokio::spawn(async move {
            ProcessCommand::shell("sleep 6 & echo started").run(&ctx).await
        });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let cancelled_at = Instant::now();
        token.cancel();
        let err = run.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert!(
            cancelled_at.elapsed() < Duration::from_secs(3),
            "background child outlived cancellation: {:?}",
            cancelled_at.elapsed()
        );
        assert_eq!(stdout.text(), "started\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_waits_for_background_output() {
        let temp = TempDir::new().unwrap();
        let (ctx, stdout, _) = context(temp.path(), Duration::from_secs(1));

        ProcessCommand::shell("(sleep 0.2; echo late) & echo early")
            .run(&ctx)
            .await
            .unwrap();
        assert_eq!(stdout.text(), "early\nlate\n");
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let temp = TempDir::new().unwrap();
        let (ctx, stdout, _) = context(temp.path(), Duration::from_secs(1));
        let token = CancelToken::new();
        token.cancel();

        let err = ProcessCommand::shell("echo hi")
            .run(&ctx.with_cancel(token))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(stdout.is_empty());
    }
}
