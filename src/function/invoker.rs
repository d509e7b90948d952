//! Isolated invocation of a handler in a worker process.

use crate::function::event::Event;
use crate::function::handler::{timeout_duration, FunctionContext, Handler};
use async_trait::async_trait;
use fnshim_sdk::{Invocation, WorkerMessage};
use serde_json::Value;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default cap on what a worker may write to stdout.
pub const DEFAULT_MAX_OUTPUT: usize = 10 * 1024 * 1024; // 10MB

/// How long to keep reading a worker's stdout after it exited.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The handler returned a value.
    Success(Value),
    /// The handler raised, or the worker failed; carries a description.
    Fault(String),
    /// The worker did not finish in time and was killed.
    TimedOut,
}

/// Runs a handler against an event.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        handler: &Handler,
        event: &Event,
        context: &FunctionContext,
        timeout: f64,
    ) -> InvocationOutcome;
}

/// Invoker that runs every invocation in a fresh child process.
///
/// The event and context are written to the child's stdin; the child answers
/// with a single [`WorkerMessage`] on stdout. Each worker leads its own
/// process group. Once the invocation is decided (the worker exited, wrote
/// too much, or ran out of time) the whole group is sent SIGKILL and the
/// worker is reaped, so nothing it started outlives the request.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    max_output: usize,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self {
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }

    /// Set the largest stdout, in bytes, a worker may produce.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(
        &self,
        handler: &Handler,
        event: &Event,
        context: &FunctionContext,
        timeout: f64,
    ) -> InvocationOutcome {
        let Some(limit) = timeout_duration(timeout) else {
            debug!("Timeout {}s leaves no time, not starting a worker", timeout);
            return InvocationOutcome::TimedOut;
        };

        let invocation = Invocation {
            event: event.to_wire(),
            context: context.to_wire(),
        };
        let input = match fnshim_sdk::encode_invocation(&invocation) {
            Ok(input) => input,
            Err(e) => return InvocationOutcome::Fault(format!("failed to encode event: {}", e)),
        };

        let mut child = match handler.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                return InvocationOutcome::Fault(format!(
                    "failed to start worker {}: {}",
                    handler.program().display(),
                    e
                ))
            }
        };
        let pid = child.id();
        debug!("Started worker {:?} for '{}'", pid, handler.name());

        let exchanged =
            tokio::time::timeout(limit, exchange(&mut child, pid, input, self.max_output)).await;

        let outcome = match exchanged {
            Err(_) => {
                warn!(
                    "Worker {:?} for '{}' timed out after {}s and will be killed",
                    pid,
                    handler.name(),
                    timeout
                );
                InvocationOutcome::TimedOut
            }
            Ok(Err(e)) => InvocationOutcome::Fault(format!("worker i/o failed: {}", e)),
            Ok(Ok(Exchange::Overflow)) => {
                warn!(
                    "Worker {:?} for '{}' wrote more than {} bytes and will be killed",
                    pid,
                    handler.name(),
                    self.max_output
                );
                InvocationOutcome::Fault(format!(
                    "worker output exceeds {} bytes",
                    self.max_output
                ))
            }
            Ok(Ok(Exchange::Finished(status, output))) => {
                debug!("Worker {:?} exited with {}", pid, status);
                read_outcome(status, &output)
            }
        };

        terminate(&mut child, pid).await;
        outcome
    }
}

/// How an exchange with a worker ended.
enum Exchange {
    /// The worker exited; everything it wrote to stdout.
    Finished(ExitStatus, Vec<u8>),
    /// The worker wrote more than the allowed output. It may still be running.
    Overflow,
}

/// Feed the invocation to the child and collect its stdout.
///
/// Completion is decided by the worker exiting, not by stdout closing: once
/// the worker is gone its process group is killed and only what is already
/// in the pipe is read.
async fn exchange(
    child: &mut Child,
    pid: Option<u32>,
    input: Vec<u8>,
    max_output: usize,
) -> io::Result<Exchange> {
    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "worker stdout not captured"))?;

    let _writer = AbortOnDrop(tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            // Workers may exit without reading their input.
            if let Err(e) = stdin.write_all(&input).await {
                debug!("Worker did not take its input: {}", e);
            }
        }
    }));

    // One byte past the cap tells an overflow from an exact fit.
    let mut limited = stdout.take((max_output as u64).saturating_add(1));
    let mut output = Vec::new();

    let exited = {
        let collect = limited.read_to_end(&mut output);
        tokio::pin!(collect);

        tokio::select! {
            read = &mut collect => {
                read?;
                None
            }
            status = child.wait() => {
                let status = status?;
                kill_process_group(pid);
                match tokio::time::timeout(DRAIN_GRACE, &mut collect).await {
                    Ok(read) => {
                        read?;
                    }
                    Err(_) => warn!("Worker {:?} exited but its stdout is still held open", pid),
                }
                Some(status)
            }
        }
    };

    if output.len() > max_output {
        return Ok(Exchange::Overflow);
    }
    let status = match exited {
        Some(status) => status,
        None => child.wait().await?,
    };
    Ok(Exchange::Finished(status, output))
}

/// Aborts the stdin writer once the exchange is over.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Kill the worker's process group, then the worker itself if it is still
/// running, and reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill worker {:?}: {}", pid, e);
            }
        }
    }
}

/// Send SIGKILL to every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // A group id of 0 or 1 would address ourselves or every process.
    if pgid <= 1 {
        return;
    }
    // SAFETY: kill(2) takes plain integers and has no memory-safety requirements.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn read_outcome(status: ExitStatus, output: &[u8]) -> InvocationOutcome {
    match fnshim_sdk::decode_message(output) {
        Ok(Some(WorkerMessage::Return(value))) => InvocationOutcome::Success(value),
        Ok(Some(WorkerMessage::Raise(description))) => InvocationOutcome::Fault(description),
        Ok(None) => InvocationOutcome::Fault(format!("unknown worker failure ({})", status)),
        Err(e) => InvocationOutcome::Fault(format!(
            "malformed worker message ({}): {}",
            status, e
        )),
    }
}
