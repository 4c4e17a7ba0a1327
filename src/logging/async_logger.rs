//! Asynchronous decoupling sink.
//!
//! [`AsyncLogger`] hides a delegate's latency from the hot path: `log()` pushes the
//! record onto an unbounded FIFO and returns immediately, and one background worker
//! forwards records to the delegate in submission order.
//!
//! # Drain Guarantee
//!
//! `close()` is a drain barrier. It returns only after every record enqueued before
//! the call has been handed to the delegate, then closes the delegate. Nothing is
//! dropped, reordered or duplicated between enqueue and drain. Records still queued
//! when the process exits without `close()` are lost.
//!
//! # Example
//!
//! ```rust,ignore
//! let sink: SharedLogger = Arc::new(ConsoleLogger::stdout());
//! let logger = AsyncLogger::spawn(sink);
//! logger.log(LogEvent::pass("psu", 4.9, 5.0, 5.1).into());
//! logger.close().await?;
//! ```

use super::{Logger, SharedLogger};
use crate::error::HarnessResult;
use crate::event::Record;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Queues records for a background worker that feeds a delegate logger.
pub struct AsyncLogger {
    sender: Mutex<Option<UnboundedSender<Record>>>,
    worker: Mutex<Option<JoinHandle<u64>>>,
    delegate: SharedLogger,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AsyncLogger {
    /// Start the background worker.
    ///
    /// The worker runs on Tokio's blocking pool because delegates may do blocking I/O,
    /// so this must be called from within a Tokio runtime.
    pub fn spawn(delegate: SharedLogger) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker_delegate = delegate.clone();
        let worker = tokio::task::spawn_blocking(move || forward(receiver, worker_delegate));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            delegate,
        }
    }

    /// Whether `close()` has already been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }
}

/// Worker body: forward until every sender is gone and the queue is empty.
fn forward(mut receiver: UnboundedReceiver<Record>, delegate: SharedLogger) -> u64 {
    let mut forwarded = 0;
    while let Some(record) = receiver.blocking_recv() {
        delegate.log(record);
        forwarded += 1;
    }
    forwarded
}

#[async_trait]
impl Logger for AsyncLogger {
    fn log(&self, record: Record) {
        match lock(&self.sender).as_ref() {
            Some(sender) => {
                if sender.send(record).is_err() {
                    warn!("async logger worker is gone; record dropped");
                }
            }
            None => warn!("log() called on a closed async logger; record dropped"),
        }
    }

    async fn close(&self) -> HarnessResult<()> {
        // Dropping the only sender lets the worker finish the backlog and exit.
        drop(lock(&self.sender).take());

        let worker = lock(&self.worker).take();
        let Some(worker) = worker else {
            return Ok(());
        };

        let forwarded = worker.await.map_err(std::io::Error::from)?;
        debug!(forwarded, "async logger drained");
        self.delegate.close().await
    }
}
