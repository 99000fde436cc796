//! Worker process management for Parlay.
//!
//! Provides `WorkerHandle` for spawning and communicating with one worker
//! process, and `WorkerPool`, a fixed set of workers each driven by a pump
//! thread that feeds it queued jobs and reports completions.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::execute::UnitOutcome;

use super::protocol::{WorkerCommand, WorkerResponse, read_message, write_frame, write_message};

const WORKER_NAME: &str = if cfg!(windows) {
    "parlay-worker.exe"
} else {
    "parlay-worker"
};

/// How to launch a worker process.
#[derive(Debug, Clone, Default)]
pub struct WorkerSpec {
    /// Worker executable. Discovered with [`WorkerSpec::find_worker_binary`]
    /// when unset.
    pub program: Option<PathBuf>,
    /// Extra command-line arguments for the worker.
    pub args: Vec<String>,
}

impl WorkerSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Resolve the executable to launch.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(path) => Ok(path.clone()),
            None => Self::find_worker_binary(),
        }
    }

    /// Find the parlay-worker binary path.
    ///
    /// Looks in the following order:
    /// 1. `PARLAY_WORKER_PATH` environment variable
    /// 2. Same directory as the current executable (and its parent, for
    ///    test binaries under `target/<profile>/deps`)
    /// 3. System PATH
    pub fn find_worker_binary() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("PARLAY_WORKER_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe() {
            for dir in exe_path.ancestors().skip(1).take(2) {
                let worker_path = dir.join(WORKER_NAME);
                if worker_path.exists() {
                    return Ok(worker_path);
                }
            }
        }

        if let Ok(path) = which::which(WORKER_NAME) {
            return Ok(path);
        }

        Err(Error::Ipc(
            "Could not find parlay-worker binary. Set PARLAY_WORKER_PATH or ensure it's in PATH."
                .to_string(),
        ))
    }
}

/// Handle to a worker process.
pub struct WorkerHandle {
    child: Child,
    stdin: BufWriter<std::process::ChildStdin>,
    stdout: BufReader<std::process::ChildStdout>,
    killed: bool,
}

impl WorkerHandle {
    /// Spawn a worker process and wait for its handshake.
    pub fn spawn(spec: &WorkerSpec) -> Result<Self> {
        let worker_path = spec.resolve_program()?;

        let mut child = Command::new(&worker_path)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Ipc(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("Failed to get worker stdout".to_string()))?;

        let mut handle = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
        };

        write_message(&mut handle.stdin, &WorkerCommand::Ping)?;
        match handle.recv_response()? {
            WorkerResponse::Pong => {
                tracing::debug!("Worker {} is ready", handle.pid());
                Ok(handle)
            }
            other => Err(Error::Ipc(format!(
                "Unexpected response from worker: {:?}",
                other
            ))),
        }
    }

    /// Receive a response from the worker.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Send an encoded `Run` frame and wait for the unit's outcome.
    pub fn run(&mut self, index: usize, frame: &[u8]) -> Result<UnitOutcome> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        write_frame(&mut self.stdin, frame)?;

        match self.recv_response()? {
            WorkerResponse::Done {
                index: done,
                outcome,
            } if done as usize == index => Ok(outcome),
            other => Err(Error::Ipc(format!(
                "Unexpected response while running unit {}: {:?}",
                index, other
            ))),
        }
    }

    /// Wait briefly for the process to exit, killing it if it does not.
    fn reap(&mut self) -> Option<ExitStatus> {
        for _ in 0..20 {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.killed = true;
                    return Some(status);
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
        }
        let _ = self.kill();
        None
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        self.killed = true;

        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();

        Ok(())
    }

    /// Get the process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Graceful shutdown - ask worker to exit cleanly.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        write_message(&mut self.stdin, &WorkerCommand::Shutdown)?;
        if !matches!(self.recv_response(), Ok(WorkerResponse::ShuttingDown)) {
            tracing::debug!("Worker {} did not acknowledge shutdown", self.pid());
        }

        let status = self
            .child
            .wait()
            .map_err(|e| Error::Ipc(format!("Failed to wait for worker: {}", e)))?;
        self.killed = true;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Ipc(format!("Worker exited with status: {}", status)))
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}

/// Whether the exit status says the process was stopped by an interrupt
/// or termination signal, as opposed to crashing.
#[cfg(unix)]
fn interrupted_by(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().filter(|sig| {
        matches!(
            *sig,
            libc::SIGINT | libc::SIGTERM | libc::SIGKILL | libc::SIGHUP | libc::SIGQUIT
        )
    })
}

#[cfg(not(unix))]
fn interrupted_by(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Outcome for a unit whose worker stopped answering.
fn classify_lost_worker(
    worker: &mut WorkerHandle,
    index: usize,
    cause: Error,
) -> Result<UnitOutcome> {
    let pid = worker.pid();
    match worker.reap() {
        Some(status) => match interrupted_by(&status) {
            Some(sig) => Ok(UnitOutcome::Cancelled {
                message: format!(
                    "worker {} received signal {} while running unit {}",
                    pid, sig, index
                ),
            }),
            None => Err(Error::Ipc(format!(
                "worker {} exited with {} while running unit {}",
                pid, status, index
            ))),
        },
        None => Err(Error::Ipc(format!(
            "worker {} stopped responding while running unit {}: {}",
            pid, index, cause
        ))),
    }
}

/// A unit queued for a worker.
#[derive(Debug)]
pub struct Job {
    pub index: usize,
    /// Complete `WorkerCommand::Run` frame.
    pub frame: Vec<u8>,
}

/// A unit that left a worker, or whose worker was lost.
#[derive(Debug)]
pub struct Completion {
    pub index: usize,
    pub outcome: Result<UnitOutcome>,
}

/// Fixed-size pool of worker processes.
///
/// Each worker is owned by a pump thread. Pumps take jobs from a shared
/// queue in submission order and send completions back in the order they
/// finish. A pump whose worker dies spawns a replacement for its next job.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    completions: Receiver<Completion>,
    pumps: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers and their pump threads.
    pub fn spawn(spec: &WorkerSpec, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            workers.push(WorkerHandle::spawn(spec)?);
        }

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (done_tx, done_rx) = mpsc::channel::<Completion>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut pumps = Vec::with_capacity(size);
        for (id, worker) in workers.into_iter().enumerate() {
            let jobs = Arc::clone(&job_rx);
            let done = done_tx.clone();
            let spec = spec.clone();
            let pump = std::thread::Builder::new()
                .name(format!("parlay-pump-{}", id))
                .spawn(move || pump(worker, spec, jobs, done))
                .map_err(|e| Error::Ipc(format!("Failed to start pump thread: {}", e)))?;
            pumps.push(pump);
        }

        tracing::debug!("Started worker pool with {} processes", size);
        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            pumps,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job for the next free worker.
    pub fn submit(&self, job: Job) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::Ipc("Worker pool is shut down".to_string()))?;
        jobs.send(job)
            .map_err(|_| Error::Ipc("All worker pump threads have exited".to_string()))
    }

    /// Block until any queued job completes.
    pub fn recv_completion(&self) -> Result<Completion> {
        self.completions
            .recv()
            .map_err(|_| Error::Ipc("All worker pump threads have exited".to_string()))
    }

    /// Stop accepting jobs, let queued jobs finish, and stop every worker.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        for pump in self.pumps.drain(..) {
            if pump.join().is_err() {
                tracing::warn!("Worker pump thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump(
    worker: WorkerHandle,
    spec: WorkerSpec,
    jobs: Arc<Mutex<Receiver<Job>>>,
    done: Sender<Completion>,
) {
    let mut worker = Some(worker);
    loop {
        let job = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(job) = job else {
            break;
        };

        if worker.is_none() {
            match WorkerHandle::spawn(&spec) {
                Ok(fresh) => worker = Some(fresh),
                Err(e) => {
                    let _ = done.send(Completion {
                        index: job.index,
                        outcome: Err(e),
                    });
                    continue;
                }
            }
        }
        let Some(handle) = worker.as_mut() else {
            continue;
        };

        let outcome = match handle.run(job.index, &job.frame) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let outcome = classify_lost_worker(handle, job.index, e);
                tracing::warn!("Lost worker {} while running unit {}", handle.pid(), job.index);
                worker = None;
                outcome
            }
        };

        if done
            .send(Completion {
                index: job.index,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }

    if let Some(handle) = worker {
        if let Err(e) = handle.shutdown() {
            tracing::debug!("Worker shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let spec = WorkerSpec::new("/nonexistent/parlay-worker");
        let err = WorkerHandle::spawn(&spec).err().expect("spawn must fail");
        assert!(err.to_string().contains("Failed to spawn worker process"));
    }

    #[test]
    fn test_pool_spawn_propagates_failure() {
        let spec = WorkerSpec::new("/nonexistent/parlay-worker");
        assert!(WorkerPool::spawn(&spec, 2).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_classification() {
        use std::os::unix::process::ExitStatusExt;

        let sigint = ExitStatus::from_raw(libc::SIGINT);
        assert_eq!(interrupted_by(&sigint), Some(libc::SIGINT));

        let segv = ExitStatus::from_raw(libc::SIGSEGV);
        assert_eq!(interrupted_by(&segv), None);

        let clean = ExitStatus::from_raw(0);
        assert_eq!(interrupted_by(&clean), None);
    }
}
