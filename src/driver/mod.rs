//! Hardware drivers
//!
//! A [`Driver`] is the thin, device-specific layer a component reads from and writes
//! to. Drivers come in two shapes:
//!
//! - **Direct**: the driver runs in the calling task, e.g. [`crate::devices::NetworkDriver`].
//! - **Background**: [`BackgroundDriver`] moves a direct driver into a separate worker
//!   process, which polls it on a fixed period. Each reading crosses the process
//!   boundary as a [`FixedRecord`] frame, and the foreground always sees the latest one.
//!
//! Both shapes implement the same trait, so a component does not know which one it has.
//!
//! # Design Philosophy
//!
//! - Async (uses `#[async_trait]`)
//! - Thread-safe (requires `Send + Sync`, methods take `&self`)
//! - Uses `anyhow::Result` for errors; driver errors are fatal to the run

mod background;
mod record;
mod worker;

pub use background::{BackgroundDriver, WorkerSpec};
pub use record::FixedRecord;
pub use worker::{run_worker, WorkerExit, WorkerMessage, WorkerOptions};

use anyhow::Result;
use async_trait::async_trait;

/// Reads telemetry from and sends commands to one piece of hardware.
///
/// # Contract
/// - `read` returns the current reading; it may block briefly on I/O
/// - `write` applies one command; what a command means is up to the driver
/// - Errors are not measurement outcomes: they abort the run
///
/// # Thread Safety
/// - All methods take `&self`; drivers keep state behind interior mutability
#[async_trait]
pub trait Driver: Send + Sync {
    /// What `read` returns.
    type Reading: Send;
    /// What `write` accepts.
    type Command: Send;

    /// Take one reading.
    async fn read(&self) -> Result<Self::Reading>;

    /// Apply one command.
    async fn write(&self, command: Self::Command) -> Result<()>;
}

#[async_trait]
impl<T> Driver for std::sync::Arc<T>
where
    T: Driver + ?Sized,
{
    type Reading = T::Reading;
    type Command = T::Command;

    async fn read(&self) -> Result<Self::Reading> {
        (**self).read().await
    }

    async fn write(&self, command: Self::Command) -> Result<()> {
        (**self).write(command).await
    }
}
