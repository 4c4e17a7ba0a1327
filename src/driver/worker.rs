//! Background worker loop.
//!
//! The worker side of [`BackgroundDriver`](super::BackgroundDriver). It owns a direct
//! driver and, every `period`, reads it, logs the reading as telemetry and writes the
//! encoded frame to the record stream. It does this whether or not anyone in the
//! foreground is reading. Between polls it applies commands arriving as JSON lines:
//!
//! ```text
//! {"op":"write","command":{"pulse":{"count":3}}}
//! {"op":"shutdown"}
//! ```
//!
//! The loop ends on a shutdown message, when the command stream closes, or when the
//! record stream breaks. It always closes its logger before returning.

use super::{Driver, FixedRecord};
use crate::error::{HarnessError, HarnessResult};
use crate::logging::SharedLogger;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One line of the command stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerMessage<C> {
    /// Pass `command` to the driver's `write`.
    Write {
        /// The driver command.
        command: C,
    },
    /// Stop the worker.
    Shutdown,
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Device tag for logged telemetry.
    pub device: String,
    /// Polling period.
    pub period: Duration,
}

impl WorkerOptions {
    /// Options for `device` with the default 20 ms period.
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            period: Duration::from_millis(20),
        }
    }

    /// Override the polling period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// Why the worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// A shutdown message arrived.
    Shutdown,
    /// The command stream reached end of file.
    CommandsClosed,
    /// The record stream could not be written.
    RecordsClosed,
}

/// Run the worker loop until it is told to stop.
///
/// Driver errors end the loop with an error. Malformed command lines are logged and
/// skipped.
pub async fn run_worker<D, I, O>(
    driver: D,
    options: WorkerOptions,
    logger: SharedLogger,
    commands: I,
    mut records: O,
) -> HarnessResult<WorkerExit>
where
    D: Driver,
    D::Reading: FixedRecord,
    D::Command: DeserializeOwned,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    if options.period.is_zero() {
        return Err(HarnessError::Configuration(
            "worker period must be greater than 0".to_string(),
        ));
    }

    info!(
        device = %options.device,
        period_ms = options.period.as_millis() as u64,
        "worker started"
    );

    let mut lines = BufReader::new(commands).lines();
    let mut ticker = tokio::time::interval(options.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u64 = 0;

    let outcome: HarnessResult<WorkerExit> = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reading = match driver.read().await {
                    Ok(reading) => reading,
                    Err(e) => {
                        error!(device = %options.device, error = %e, "driver read failed");
                        break Err(HarnessError::WorkerProtocol(format!("driver read failed: {e:#}")));
                    }
                };
                polls += 1;
                logger.log(reading.to_telemetry(&options.device).into());

                let frame = reading.encode();
                if let Err(e) = write_frame(&mut records, &frame).await {
                    debug!(error = %e, "record stream closed");
                    break Ok(WorkerExit::RecordsClosed);
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<WorkerMessage<D::Command>>(&line) {
                            Ok(WorkerMessage::Write { command }) => {
                                if let Err(e) = driver.write(command).await {
                                    error!(device = %options.device, error = %e, "driver write failed");
                                    break Err(HarnessError::WorkerProtocol(format!("driver write failed: {e:#}")));
                                }
                            }
                            Ok(WorkerMessage::Shutdown) => break Ok(WorkerExit::Shutdown),
                            Err(e) => warn!(error = %e, line = %line, "ignoring malformed command"),
                        }
                    }
                    Ok(None) => break Ok(WorkerExit::CommandsClosed),
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };

    info!(device = %options.device, polls, outcome = ?outcome.as_ref().ok(), "worker stopping");
    let closed = logger.close().await;
    let exit = outcome?;
    closed?;
    Ok(exit)
}

async fn write_frame<O: AsyncWrite + Unpin>(records: &mut O, frame: &[u8]) -> std::io::Result<()> {
    records.write_all(frame).await?;
    records.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    crate::fixed_record! {
        struct Level {
            level: i32,
        }
    }

    #[derive(Default)]
    struct LevelDriver {
        level: AtomicI32,
    }

    #[async_trait]
    impl Driver for LevelDriver {
        type Reading = Level;
        type Command = i32;

        async fn read(&self) -> Result<Level> {
            Ok(Level {
                level: self.level.load(Ordering::SeqCst),
            })
        }

        async fn write(&self, command: i32) -> Result<()> {
            self.level.store(command, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast() -> WorkerOptions {
        WorkerOptions::new("level").with_period(Duration::from_millis(1))
    }

    #[test]
    fn message_wire_format() {
        let write: WorkerMessage<i32> = WorkerMessage::Write { command: 5 };
        assert_eq!(
            serde_json::to_string(&write).unwrap(),
            r#"{"op":"write","command":5}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkerMessage::<i32>::Shutdown).unwrap(),
            r#"{"op":"shutdown"}"#
        );
    }

    #[tokio::test]
    async fn polls_without_being_asked_and_applies_commands() {
        let memory = MemoryLogger::new();
        let (mut cmd_tx, cmd_rx) = tokio::io::duplex(1024);
        let (rec_tx, mut rec_rx) = tokio::io::duplex(1 << 16);

        let worker = tokio::spawn(run_worker(
            LevelDriver::default(),
            fast(),
            Arc::new(memory.clone()),
            cmd_rx,
            rec_tx,
        ));

        let mut frame = [0u8; 4];
        rec_rx.read_exact(&mut frame).await.unwrap();
        assert_eq!(Level::decode(&frame).unwrap(), Level { level: 0 });

        cmd_tx
            .write_all(b"{\"op\":\"write\",\"command\":42}\n")
            .await
            .unwrap();
        loop {
            rec_rx.read_exact(&mut frame).await.unwrap();
            if Level::decode(&frame).unwrap().level == 42 {
                break;
            }
        }

        cmd_tx.write_all(b"{\"op\":\"shutdown\"}\n").await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), async {
            // Keep draining so the worker never blocks on a full pipe.
            let mut sink = Vec::new();
            let _ = rec_rx.read_to_end(&mut sink).await;
            worker.await.unwrap()
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(exit, WorkerExit::Shutdown);

        let telemetry = memory.telemetry();
        assert!(telemetry.len() >= 2);
        assert!(telemetry.iter().all(|t| t.device() == "level"));
        assert!(telemetry.iter().any(|t| t.field("level") == Some(42.0)));
    }

    #[tokio::test]
    async fn closed_commands_end_the_loop() {
        let (cmd_tx, cmd_rx) = tokio::io::duplex(64);
        let (rec_tx, _rec_rx) = tokio::io::duplex(1 << 16);
        drop(cmd_tx);

        let exit = run_worker(
            LevelDriver::default(),
            fast(),
            crate::logging::null(),
            cmd_rx,
            rec_tx,
        )
        .await
        .unwrap();
        assert_eq!(exit, WorkerExit::CommandsClosed);
    }

    #[tokio::test]
    async fn broken_record_pipe_ends_the_loop() {
        let (_cmd_tx, cmd_rx) = tokio::io::duplex(64);
        let (rec_tx, rec_rx) = tokio::io::duplex(64);
        drop(rec_rx);

        let exit = run_worker(
            LevelDriver::default(),
            fast(),
            crate::logging::null(),
            cmd_rx,
            rec_tx,
        )
        .await
        .unwrap();
        assert_eq!(exit, WorkerExit::RecordsClosed);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (mut cmd_tx, cmd_rx) = tokio::io::duplex(1024);
        let (rec_tx, mut rec_rx) = tokio::io::duplex(1 << 16);

        let worker = tokio::spawn(run_worker(
            LevelDriver::default(),
            fast(),
            crate::logging::null(),
            cmd_rx,
            rec_tx,
        ));

        cmd_tx
            .write_all(b"not json\n\n{\"op\":\"write\",\"command\":7}\n{\"op\":\"shutdown\"}\n")
            .await
            .unwrap();

        let mut frames = Vec::new();
        rec_rx.read_to_end(&mut frames).await.unwrap();
        assert_eq!(worker.await.unwrap().unwrap(), WorkerExit::Shutdown);
        assert_eq!(frames.len() % Level::SIZE, 0);
    }

    #[tokio::test]
    async fn zero_period_is_rejected() {
        let (_cmd_tx, cmd_rx) = tokio::io::duplex(64);
        let (rec_tx, _rec_rx) = tokio::io::duplex(64);
        let result = run_worker(
            LevelDriver::default(),
            WorkerOptions::new("level").with_period(Duration::ZERO),
            crate::logging::null(),
            cmd_rx,
            rec_tx,
        )
        .await;
        assert!(matches!(result, Err(HarnessError::Configuration(_))));
    }
}
