//! # hwtest
//!
//! A hardware-in-the-loop test harness. A test drives a device through a scripted
//! procedure, periodically samples its state, checks the samples against expected
//! bounds, and records pass/fail outcomes and telemetry for later analysis.
//!
//! ## Crate Structure
//!
//! - **`controller`**: the [`Controller`](controller::Controller) runs a
//!   [`Procedure`](controller::Procedure) one [`Step`](controller::Step) at a time and
//!   checks every registered component after each step's wait. `run()` returns the
//!   number of failed checks.
//! - **`component`**: the [`Component`](component::Component) trait and the
//!   [`Probe`](component::Probe) that turns a measurement into a logged Pass or Fail.
//! - **`driver`**: the [`Driver`](driver::Driver) trait, fixed-layout records, and the
//!   [`BackgroundDriver`](driver::BackgroundDriver) that runs a driver in a worker
//!   process.
//! - **`logging`**: record sinks (null, console, CSV, memory, fan-out) and the
//!   [`AsyncLogger`](logging::AsyncLogger) that decouples a slow sink from the run.
//! - **`event`** / **`telemetry`**: the immutable records loggers consume.
//! - **`devices`**: a loopback network interface and a simulated pulse counter.
//! - **`config`**: figment-based configuration (`hwtest.toml` + `HWTEST_*`).
//! - **`tracing_config`**: diagnostics subscriber setup.
//! - **`error`**: the crate-wide [`HarnessError`](error::HarnessError).

pub mod component;
pub mod config;
pub mod controller;
pub mod devices;
pub mod driver;
pub mod error;
pub mod event;
pub mod logging;
pub mod telemetry;
pub mod tracing_config;

pub use component::{Component, Probe};
pub use controller::{ActionKind, Controller, Procedure, Step};
pub use driver::{Driver, FixedRecord};
pub use error::{HarnessError, HarnessResult};
pub use event::{LogEvent, Record, Verdict};
pub use logging::{Logger, SharedLogger};
pub use telemetry::Telemetry;
