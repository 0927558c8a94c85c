//! Shell command execution under a hard wall-clock limit.
//!
//! The command runs as `sh -c <command>` in its own process group. When the
//! limit expires the whole group is killed, so background children started
//! by the command die with it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info_span, warn, Instrument};

use super::util::{read_capped, truncate_output_with};
use super::ToolOutput;

/// Run `command` in `work_dir`, bounded by `timeout` and `max_output` bytes.
pub async fn run_command(
    command: &str,
    work_dir: &Path,
    timeout: Duration,
    max_output: usize,
) -> ToolOutput {
    let span = info_span!("bash", timeout_secs = timeout.as_secs());
    async move {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ToolOutput::error(format!("failed to start command: {err}")),
        };
        let pid = child.id();

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            child.kill().await.ok();
            return ToolOutput::error("failed to capture command output");
        };

        // Each pipe keeps at most `max_output` bytes; the rest is drained and
        // counted so the child never blocks on a full pipe.
        let collect = async {
            let (out, err) = tokio::join!(
                read_capped(&mut stdout, max_output),
                read_capped(&mut stderr, max_output)
            );
            let (out, err) = (out?, err?);
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        match outcome {
            Ok(Ok((status, out, err))) => {
                let (mut text, out_dropped) = out.into_lossy();
                let (err, err_dropped) = err.into_lossy();
                if !err.is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str("[stderr]\n");
                    text.push_str(&err);
                }
                let is_error = !status.success();
                if is_error {
                    let code = status
                        .code()
                        .map_or_else(|| "signal".to_owned(), |c| c.to_string());
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&format!("[exit status: {code}]"));
                }
                if text.is_empty() {
                    text.push_str("(no output)");
                }
                ToolOutput {
                    text: truncate_output_with(&text, max_output, out_dropped + err_dropped),
                    is_error,
                }
            }
            Ok(Err(err)) => {
                kill_group(pid);
                child.kill().await.ok();
                ToolOutput::error(format!("command failed: {err}"))
            }
            Err(_elapsed) => {
                warn!(pid, "command timed out, killing process group");
                kill_group(pid);
                child.kill().await.ok();
                child.wait().await.ok();
                ToolOutput::error(format!(
                    "command timed out after {}s",
                    timeout.as_secs_f64()
                ))
            }
        }
    }
    .instrument(span)
    .await
}

/// Send `SIGKILL` to the process group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // ESRCH: the group already exited.
        if err != nix::errno::Errno::ESRCH {
            warn!(pid, %err, "failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
