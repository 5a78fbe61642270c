use super::types::ToolDiag;
use crate::cancel::CancelToken;
use anyhow::{Context, Result, anyhow};
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run an external tool to completion, feeding `stdin` and capturing both output pipes.
///
/// Fails when the tool cannot be spawned, exits non-zero, exceeds `timeout`,
/// or `cancel` trips while it is running. In the last two cases the child is killed.
pub fn run_tool<I, S>(
    exe: &str,
    args: I,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(exe);
    cmd.args(args);
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    debug!("spawn {:?} timeout={:?}", cmd, timeout);

    let mut child = cmd.spawn().with_context(|| format!("spawning {exe}"))?;

    let writer = match stdin {
        Some(bytes) => {
            let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            Some(std::thread::spawn(move || -> std::io::Result<()> {
                pipe.write_all(&bytes)?;
                pipe.flush()
            }))
        }
        None => None,
    };

    let output = wait_with_limits(&mut child, exe, timeout, cancel)?;

    if let Some(handle) = writer {
        if let Ok(Err(e)) = handle.join() {
            // The tool may legitimately close stdin early; its exit status decides.
            debug!("{exe}: writing stdin failed: {e}");
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{exe} failed ({}):\n{}",
            output.status,
            stderr.trim()
        ));
    }

    Ok(output)
}

fn wait_with_limits(
    child: &mut Child,
    exe: &str,
    timeout: Option<Duration>,
    cancel: Option<&CancelToken>,
) -> Result<Output> {
    // Drain pipes while waiting so chatty tools can't deadlock on a full buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let collect = |status| -> Result<Output> {
        let stdout = stdout_thread
            .join()
            .map_err(|_| anyhow!("stdout reader thread panicked"))??;
        let stderr = stderr_thread
            .join()
            .map_err(|_| anyhow!("stderr reader thread panicked"))??;
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            return collect(status);
        }

        if cancel.is_some_and(CancelToken::is_cancelled) {
            warn!("{exe} cancelled after {:?}", start.elapsed());
            let _ = child.kill();
            let status = child.wait().with_context(|| "wait after kill")?;
            let _ = collect(status)?;
            return Err(anyhow!("{exe} cancelled"));
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!("{exe} timed out after {:?}", limit);
                let _ = child.kill();
                let status = child.wait().with_context(|| "wait after kill")?;
                let output = collect(status)?;
                return Err(anyhow!(
                    "{exe} timed out after {:?}; stderr: {}",
                    limit,
                    String::from_utf8_lossy(&output.stderr)
                ));
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Ask a tool for its version; never fails, the outcome lands in the diag.
pub fn tool_version(tool: &str, exe: &str, flag: &str) -> ToolDiag {
    match run_tool(exe, [flag], None, Some(Duration::from_secs(10)), None) {
        Ok(out) => ToolDiag {
            tool: tool.to_string(),
            exe: exe.to_string(),
            version: first_line(&out.stdout).or_else(|| first_line(&out.stderr)),
            ok: true,
            error: None,
        },
        Err(e) => ToolDiag {
            tool: tool.to_string(),
            exe: exe.to_string(),
            version: None,
            ok: false,
            error: Some(format!("{e:#}")),
        },
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    if secs > 0 {
        Some(Duration::from_secs(secs))
    } else {
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn timeout_kills_the_child() {
        let started = Instant::now();
        let err = run_tool("sleep", ["5"], None, Some(Duration::from_millis(100)), None)
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.to_string().contains("timed out"), "{err:#}");
    }

    #[test]
    fn tripped_token_kills_the_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        let err = run_tool("sleep", ["5"], None, None, Some(&cancel)).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.to_string().contains("cancelled"), "{err:#}");
    }

    #[test]
    fn token_tripped_mid_run_kills_the_child() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let tripper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });
        let started = Instant::now();
        let err = run_tool("sleep", ["5"], None, Some(Duration::from_secs(30)), Some(&cancel))
            .unwrap_err();
        tripper.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.to_string().contains("cancelled"), "{err:#}");
    }

    #[test]
    fn failing_exit_carries_stderr() {
        let err = run_tool("sh", ["-c", "echo boom >&2; exit 3"], None, None, None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("boom"), "{msg}");
        assert!(msg.starts_with("sh failed"), "{msg}");
    }

    #[test]
    fn stdin_is_piped_through() {
        let out = run_tool("cat", Vec::<&str>::new(), Some(b"page text".to_vec()), None, None)
            .unwrap();
        assert_eq!(out.stdout, b"page text");
    }

    #[test]
    fn missing_tool_fails_to_spawn() {
        let err = run_tool("pdf-ocr-no-such-tool", ["-v"], None, None, None).unwrap_err();
        assert!(err.to_string().contains("spawning"));
    }
}
