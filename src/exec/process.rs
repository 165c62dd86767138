use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const TIME_LIMIT_MESSAGE: &str = "Time limit exceeded";
pub const CANCELLED_MESSAGE: &str = "Cancelled";

const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);
/// How long to wait for the pipes to drain once the child is gone
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK_SIZE: usize = 8192;
const SPAWN_BUSY_RETRIES: u32 = 5;
const SPAWN_BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// Everything needed to launch one supervised process
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub executable: &'a Path,
    pub args: &'a [String],
    pub timeout: Duration,
    pub input: &'a str,
    /// Append stderr to the captured stdout instead of discarding it
    pub mix_streams: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Natural exit; `None` when the child was killed by a signal
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
    SpawnFailed,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub elapsed_ms: Option<f64>,
    /// Best-effort peak resident set size, 0 when unavailable
    pub memory_kb: u64,
    pub message: String,
    pub output: String,
}

impl RunOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => code,
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    fn cancelled(output: String) -> Self {
        Self {
            status: RunStatus::Cancelled,
            elapsed_ms: None,
            memory_kb: 0,
            message: CANCELLED_MESSAGE.to_string(),
            output,
        }
    }
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Runs one process to completion, timeout or cancellation.
///
/// Never fails: spawn errors and wait errors are folded into the outcome.
/// The child is killed and reaped before this returns on every path.
pub async fn run(request: RunRequest<'_>, token: &CancellationToken) -> RunOutcome {
    if token.is_cancelled() {
        return RunOutcome::cancelled(String::new());
    }

    let mut cmd = Command::new(request.executable);
    cmd.args(request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(if request.mix_streams {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = match spawn(&mut cmd).await {
        Ok(child) => child,
        Err(e) => {
            log::warn!("Failed to spawn {}: {e}", request.executable.display());
            return RunOutcome {
                status: RunStatus::SpawnFailed,
                elapsed_ms: None,
                memory_kb: 0,
                message: format!("Runtime Error: {e}"),
                output: String::new(),
            };
        }
    };
    let start = Instant::now();
    let pid = child.id();
    log::debug!("Spawned {} as pid {pid:?}", request.executable.display());

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_capture(stdout, buffer.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_capture(stderr, buffer.clone()));
    }
    let writer = child.stdin.take().map(|mut stdin| {
        let input = request.input.to_owned();
        tokio::spawn(async move {
            if !input.is_empty() {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    log::debug!("Child closed stdin early: {e}");
                }
            }
            // stdin dropped here, the child sees EOF
        })
    });

    let deadline = tokio::time::sleep(request.timeout);
    tokio::pin!(deadline);
    let mut sampler = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
    let mut peak_kb = 0u64;

    let ending = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break Ending::Cancelled,
            res = child.wait() => break Ending::Exited(res),
            _ = &mut deadline => break Ending::TimedOut,
            _ = sampler.tick() => {
                if let Some(kb) = pid.and_then(sample_peak_rss_kb) {
                    peak_kb = peak_kb.max(kb);
                }
            }
        }
    };
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    if matches!(ending, Ending::Cancelled | Ending::TimedOut) {
        terminate(&mut child).await;
    }
    if let Some(writer) = writer {
        writer.abort();
    }
    for reader in readers {
        drain(reader).await;
    }
    let output = String::from_utf8_lossy(&buffer.lock()).into_owned();

    match ending {
        Ending::Cancelled => {
            log::info!("{} cancelled", request.executable.display());
            RunOutcome::cancelled(output)
        }
        Ending::TimedOut => {
            log::info!(
                "{} exceeded {:?}, killed",
                request.executable.display(),
                request.timeout
            );
            RunOutcome {
                status: RunStatus::TimedOut,
                elapsed_ms: Some(request.timeout.as_micros() as f64 / 1000.0),
                memory_kb: peak_kb,
                message: TIME_LIMIT_MESSAGE.to_string(),
                output,
            }
        }
        Ending::Exited(Ok(status)) => RunOutcome {
            status: RunStatus::Exited(status.code()),
            elapsed_ms: Some(elapsed_ms),
            memory_kb: peak_kb,
            message: describe_exit(status),
            output,
        },
        Ending::Exited(Err(e)) => {
            log::error!("Failed to wait for {}: {e}", request.executable.display());
            RunOutcome {
                status: RunStatus::SpawnFailed,
                elapsed_ms: None,
                memory_kb: peak_kb,
                message: format!("Runtime Error: {e}"),
                output,
            }
        }
    }
}

/// Spawns, retrying briefly while a freshly written executable is still busy
async fn spawn(cmd: &mut Command) -> std::io::Result<Child> {
    let mut attempts = 0;
    loop {
        match cmd.spawn() {
            Err(e) if is_text_busy(&e) && attempts < SPAWN_BUSY_RETRIES => {
                attempts += 1;
                tokio::time::sleep(SPAWN_BUSY_BACKOFF).await;
            }
            res => return res,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &std::io::Error) -> bool {
    false
}

fn spawn_capture<R>(mut stream: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                Err(e) => {
                    log::debug!("Output capture stopped: {e}");
                    break;
                }
            }
        }
    })
}

/// Waits for a capture task; a grandchild may still hold the pipe open
async fn drain(reader: JoinHandle<()>) {
    let abort = reader.abort_handle();
    if timeout(IO_CAPTURE_TIMEOUT, reader).await.is_err() {
        log::warn!("Output capture did not finish in time, keeping partial output");
        abort.abort();
    }
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill child process: {e}");
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Process exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Process terminated by signal {signal}");
        }
    }
    "Process exited abnormally".to_string()
}

#[cfg(target_os = "linux")]
fn sample_peak_rss_kb(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
}

#[cfg(not(target_os = "linux"))]
fn sample_peak_rss_kb(_pid: u32) -> Option<u64> {
    None
}
