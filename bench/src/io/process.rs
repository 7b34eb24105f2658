//! Child-process execution with output capture and resource limiting.
//!
//! Each run writes a persistent log file that starts with a machine-readable
//! JSON header followed by the interleaved stdout/stderr of the target,
//! line-buffered so a crash still leaves everything observed so far on disk.
//! Compressed inputs stream through an `xz -dc` pipeline into the target's
//! stdin; the decompressor is killed once the target exits, whatever its own
//! state.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::core::sweep::Combination;

/// Machine-readable header written at the top of every run log.
#[derive(Debug, Serialize)]
pub struct LogHeader {
    pub timestamp: String,
    pub algo: String,
    pub file: String,
    pub input_path: String,
    pub cmd: String,
    pub params: Combination,
    pub memlimit_mb: Option<u64>,
}

impl LogHeader {
    pub fn render(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_default();
        format!("# bench run header\n{body}\n# ---- output ----\n")
    }
}

/// Parameters for one target-process invocation.
#[derive(Debug)]
pub struct RunRequest<'a> {
    pub argv: &'a [String],
    pub input: &'a Path,
    /// Stream the input through `xz -dc` into the target's stdin.
    pub stream_decompress: bool,
    pub log_path: &'a Path,
    pub log_header: &'a str,
    pub memlimit_mb: Option<u64>,
    pub timeout: Option<Duration>,
}

/// Captured result of a target-process invocation.
#[derive(Debug)]
pub struct RunOutput {
    /// Exit code, or `None` when the process died on a signal.
    pub exit_code: Option<i32>,
    /// Interleaved stdout/stderr lines in arrival order.
    pub lines: Vec<String>,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

struct LogSink {
    writer: BufWriter<File>,
    lines: Vec<String>,
}

/// Run the target process, capturing interleaved output to memory and to the
/// log file.
pub fn run_streaming(request: &RunRequest<'_>) -> Result<RunOutput> {
    if request.argv.is_empty() {
        bail!("empty command");
    }
    if let Some(parent) = request.log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log_file = File::create(request.log_path)
        .with_context(|| format!("create log {}", request.log_path.display()))?;
    let mut writer = BufWriter::new(log_file);
    writer
        .write_all(request.log_header.as_bytes())
        .context("write log header")?;
    writer.flush().context("flush log header")?;

    let mut command = build_command(request.argv, request.memlimit_mb);
    let mut decompressor = None;
    if request.stream_decompress {
        let mut xz = Command::new("xz")
            .arg("-dc")
            .arg("--")
            .arg(request.input)
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn xz -dc for {}", request.input.display()))?;
        let xz_stdout = xz
            .stdout
            .take()
            .ok_or_else(|| anyhow!("decompressor stdout was not piped"))?;
        command.stdin(Stdio::from(xz_stdout));
        decompressor = Some(xz);
    } else {
        command.stdin(Stdio::null());
    }
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(argv = ?request.argv, "spawning target process");
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            kill_decompressor(decompressor);
            return Err(err).context("spawn target process");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let sink = Arc::new(Mutex::new(LogSink {
        writer,
        lines: Vec::new(),
    }));
    let stdout_handle = {
        let sink = Arc::clone(&sink);
        thread::spawn(move || tee_lines(stdout, &sink))
    };
    let stderr_handle = {
        let sink = Arc::clone(&sink);
        thread::spawn(move || tee_lines(stderr, &sink))
    };

    let (status, timed_out) = wait_for_target(&mut child, request.timeout)?;

    join_reader(stdout_handle).context("join stdout reader")?;
    join_reader(stderr_handle).context("join stderr reader")?;
    kill_decompressor(decompressor);

    let sink = Arc::try_unwrap(sink)
        .map_err(|_| anyhow!("log sink still shared after reader join"))?
        .into_inner()
        .map_err(|_| anyhow!("output reader thread panicked"))?;
    let mut writer = sink.writer;
    if let Err(err) = writer.flush() {
        warn!(err = %err, "failed to flush run log");
    }

    debug!(exit_code = ?status.code(), timed_out, "target process finished");
    Ok(RunOutput {
        exit_code: status.code(),
        lines: sink.lines,
        timed_out,
    })
}

fn wait_for_target(
    child: &mut std::process::Child,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, bool)> {
    match timeout {
        None => Ok((child.wait().context("wait for target")?, false)),
        Some(timeout) => match child.wait_timeout(timeout).context("wait for target")? {
            Some(status) => Ok((status, false)),
            None => {
                warn!(timeout_secs = timeout.as_secs(), "run timed out, killing");
                child.kill().context("kill target")?;
                let status = child.wait().context("wait target after kill")?;
                Ok((status, true))
            }
        },
    }
}

/// Build the target command, applying the address-space limit where the
/// platform supports it.
///
/// On Linux the command runs as `sh -c 'ulimit -v <KiB>; exec "$@"' sh ...`
/// so RLIMIT_AS is in place before the target's code executes. Other
/// platforms warn once and run unconstrained.
fn build_command(argv: &[String], memlimit_mb: Option<u64>) -> Command {
    #[cfg(target_os = "linux")]
    if let Some(mb) = memlimit_mb {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("ulimit -v {}; exec \"$@\"", mb * 1024))
            .arg("sh")
            .args(argv);
        return command;
    }
    #[cfg(not(target_os = "linux"))]
    if memlimit_mb.is_some() {
        static WARN_ONCE: std::sync::Once = std::sync::Once::new();
        WARN_ONCE.call_once(|| {
            warn!("address-space limiting is not supported on this platform; running unconstrained");
        });
    }
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    command
}

fn kill_decompressor(decompressor: Option<std::process::Child>) {
    if let Some(mut xz) = decompressor {
        let _ = xz.kill();
        let _ = xz.wait();
    }
}

fn tee_lines<R: Read>(reader: R, sink: &Arc<Mutex<LogSink>>) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read output line")?;
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let Ok(mut sink) = sink.lock() else {
            break;
        };
        if let Err(err) = sink.writer.write_all(&line) {
            warn!(err = %err, "failed to write run log");
        } else if let Err(err) = sink.writer.flush() {
            warn!(err = %err, "failed to flush run log");
        }
        sink.lines.push(text);
    }
    Ok(())
}

fn join_reader(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn request<'a>(
        argv: &'a [String],
        input: &'a Path,
        log_path: &'a Path,
        timeout: Option<Duration>,
    ) -> RunRequest<'a> {
        RunRequest {
            argv,
            input,
            stream_decompress: false,
            log_path,
            log_header: "# bench run header\n{}\n# ---- output ----\n",
            memlimit_mb: None,
            timeout,
        }
    }

    #[cfg(unix)]
    #[test]
    fn captures_interleaved_output_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("run.log");
        let cmd = argv(&["sh", "-c", "echo vars=3; echo note >&2; echo total_sec=0.1; exit 0"]);
        let input = temp.path().join("in.cnf");

        let output = run_streaming(&request(&cmd, &input, &log_path, None)).expect("run");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert!(output.lines.contains(&"vars=3".to_string()));
        assert!(output.lines.contains(&"note".to_string()));

        let log = std::fs::read_to_string(&log_path).expect("read log");
        assert!(log.starts_with("# bench run header\n"));
        assert!(log.contains("total_sec=0.1"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("run.log");
        let cmd = argv(&["sh", "-c", "exit 7"]);
        let input = temp.path().join("in.cnf");

        let output = run_streaming(&request(&cmd, &input, &log_path, None)).expect("run");
        assert_eq!(output.exit_code, Some(7));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("run.log");
        let cmd = argv(&["sleep", "30"]);
        let input = temp.path().join("in.cnf");

        let output = run_streaming(&request(
            &cmd,
            &input,
            &log_path,
            Some(Duration::from_millis(50)),
        ))
        .expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn empty_command_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("run.log");
        let input = temp.path().join("in.cnf");
        let err = run_streaming(&request(&[], &input, &log_path, None)).unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn log_header_renders_json_body() {
        let header = LogHeader {
            timestamp: "20260101-000000".to_string(),
            algo: "vig_info".to_string(),
            file: "toy.cnf".to_string(),
            input_path: "/bench/toy.cnf".to_string(),
            cmd: "/opt/vig_info -i /bench/toy.cnf".to_string(),
            params: Combination::new(),
            memlimit_mb: Some(512),
        };
        let rendered = header.render();
        assert!(rendered.starts_with("# bench run header\n"));
        assert!(rendered.contains("\"memlimit_mb\":512"));
        assert!(rendered.ends_with("# ---- output ----\n"));
    }
}
