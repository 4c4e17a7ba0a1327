//! Background driver bridge.
//!
//! [`BackgroundDriver`] runs a direct driver in a worker process (see
//! [`run_worker`](super::run_worker)) and talks to it over two pipes:
//!
//! ```text
//!   foreground                          worker process
//!  ┌───────────────────┐   stdin    ┌──────────────────────┐
//!  │ write(C) ─────────┼──JSON line─▶ driver.write(C)      │
//!  │                   │            │                      │
//!  │ read() ◀─ latest ◀┼── frames ──┼ every period:        │
//!  │        (watch)    │   stdout   │   driver.read()      │
//!  └───────────────────┘            │   log telemetry      │
//!                                   │   write frame        │
//!                                   └──────────────────────┘
//! ```
//!
//! A pump task decodes frames as they arrive and keeps only the newest one, so
//! `read()` never queues behind old readings. `read()` waits up to the read timeout
//! for the first frame; after that it returns immediately. A worker that sends
//! nothing within the timeout, or that has exited, fails the read.

use super::{Driver, FixedRecord, WorkerMessage};
use crate::config::BackgroundConfig;
use crate::error::{HarnessError, HarnessResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type CommandSink = Box<dyn AsyncWrite + Send + Unpin>;

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    program: PathBuf,
    args: Vec<String>,
    read_timeout: Duration,
    shutdown_timeout: Duration,
}

impl WorkerSpec {
    /// Run `program` with no arguments, 2 s read and shutdown timeouts.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            read_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    /// Run the current executable, which is expected to host the `worker` subcommand.
    pub fn current_exe() -> HarnessResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// How long `read()` waits for the first frame.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// How long `shutdown()` waits before killing the worker.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Take both timeouts from configuration.
    pub fn with_config(self, config: &BackgroundConfig) -> Self {
        self.read_timeout(config.read_timeout())
            .shutdown_timeout(config.shutdown_timeout())
    }

    /// Program path.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

/// A driver whose reads and writes are served by a worker process.
///
/// `R` is the record the worker sends, `C` the command it accepts.
pub struct BackgroundDriver<R, C> {
    latest: watch::Receiver<Option<R>>,
    exited: Arc<AtomicBool>,
    commands: Mutex<Option<CommandSink>>,
    child: Mutex<Option<Child>>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
    read_timeout: Duration,
    shutdown_timeout: Duration,
    _command: PhantomData<fn(C)>,
}

impl<R, C> BackgroundDriver<R, C>
where
    R: FixedRecord,
    C: Serialize + Send + 'static,
{
    /// Start a worker process and begin pumping its frames.
    ///
    /// The worker's stderr is inherited so its diagnostics reach the console. The
    /// process is killed if the driver is dropped without `shutdown()`.
    pub fn spawn(spec: WorkerSpec) -> HarnessResult<Self> {
        let program = spec.program.display().to_string();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::WorkerSpawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::WorkerProtocol("worker stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::WorkerProtocol("worker stdin not captured".into()))?;

        info!(program = %program, args = ?spec.args, pid = child.id(), "background worker started");

        Ok(Self::connect(
            stdout,
            stdin,
            Some(child),
            spec.read_timeout,
            spec.shutdown_timeout,
        ))
    }

    /// Bridge to a worker reachable through arbitrary streams, with no process to
    /// manage. `records` carries frames from the worker, `commands` carries JSON lines
    /// to it.
    pub fn from_streams<I, O>(
        records: I,
        commands: O,
        read_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect(records, commands, None, read_timeout, shutdown_timeout)
    }

    fn connect<I, O>(
        records: I,
        commands: O,
        child: Option<Child>,
        read_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> Self
    where
        I: AsyncRead + Send + Unpin + 'static,
        O: AsyncWrite + Send + Unpin + 'static,
    {
        let (sender, latest) = watch::channel(None);
        let exited = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump_frames(records, sender, exited.clone()));

        Self {
            latest,
            exited,
            commands: Mutex::new(Some(Box::new(commands))),
            child: Mutex::new(child),
            pump: std::sync::Mutex::new(Some(pump)),
            read_timeout,
            shutdown_timeout,
            _command: PhantomData,
        }
    }

    /// Whether the record stream has ended.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// The newest record, waiting up to the read timeout for the first one.
    pub async fn latest(&self) -> HarnessResult<R> {
        if self.has_exited() {
            return Err(HarnessError::WorkerExited);
        }

        let mut latest = self.latest.clone();
        let waited = tokio::time::timeout(self.read_timeout, latest.wait_for(Option::is_some)).await;
        let record = match waited {
            Err(_) => return Err(HarnessError::WorkerUnresponsive(self.read_timeout)),
            Ok(Err(_)) => None,
            Ok(Ok(current)) => current.clone(),
        };
        record.ok_or(HarnessError::WorkerExited)
    }

    /// Send one command line to the worker.
    pub async fn send(&self, command: C) -> HarnessResult<()> {
        self.send_message(&WorkerMessage::Write { command }).await
    }

    async fn send_message(&self, message: &WorkerMessage<C>) -> HarnessResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut commands = self.commands.lock().await;
        let Some(sink) = commands.as_mut() else {
            return Err(HarnessError::WorkerExited);
        };
        let written = async {
            sink.write_all(&line).await?;
            sink.flush().await
        }
        .await;
        written.map_err(|e| {
            debug!(error = %e, "command stream closed");
            HarnessError::WorkerExited
        })
    }

    /// Ask the worker to stop and wait for it.
    ///
    /// Sends a shutdown message and closes the command stream, then waits up to the
    /// shutdown timeout for the process to exit, killing it if it does not. Calling
    /// this again is a no-op.
    pub async fn shutdown(&self) -> HarnessResult<()> {
        if self.commands.lock().await.is_some() {
            if let Err(e) = self.send_message(&WorkerMessage::Shutdown).await {
                debug!(error = %e, "worker gone before shutdown message");
            }
            // Dropping the sink closes the worker's stdin.
            self.commands.lock().await.take();
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(%status, "background worker exited");
                }
                Err(_) => {
                    warn!(
                        timeout = ?self.shutdown_timeout,
                        "background worker did not stop; killing it"
                    );
                    child.kill().await?;
                }
            }
        }

        self.stop_pump();
        Ok(())
    }

    fn stop_pump(&self) {
        let pump = match self.pump.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        self.exited.store(true, Ordering::SeqCst);
    }
}

async fn pump_frames<R, I>(mut records: I, latest: watch::Sender<Option<R>>, exited: Arc<AtomicBool>)
where
    R: FixedRecord,
    I: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; R::SIZE];
    let mut frames: u64 = 0;
    loop {
        match records.read_exact(&mut frame).await {
            Ok(_) => match R::decode(&frame) {
                Ok(record) => {
                    latest.send_replace(Some(record));
                    frames += 1;
                }
                Err(e) => {
                    warn!(error = %e, "undecodable frame");
                    break;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(frames, "record stream closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, frames, "record stream failed");
                break;
            }
        }
    }
    exited.store(true, Ordering::SeqCst);
}

impl<R, C> Drop for BackgroundDriver<R, C> {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(pump) = pump.take() {
                pump.abort();
            }
        }
    }
}

#[async_trait]
impl<R, C> Driver for BackgroundDriver<R, C>
where
    R: FixedRecord,
    C: Serialize + Send + Sync + 'static,
{
    type Reading = R;
    type Command = C;

    async fn read(&self) -> Result<R> {
        Ok(self.latest().await?)
    }

    async fn write(&self, command: C) -> Result<()> {
        Ok(self.send(command).await?)
    }
}
