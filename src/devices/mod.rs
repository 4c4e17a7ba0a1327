//! Example devices.
//!
//! Each device comes as a direct [`Driver`](crate::driver::Driver), a
//! [`FixedRecord`](crate::driver::FixedRecord) reading so it can run in a background
//! worker, and a component that judges it.

mod counter;
mod network;

pub use counter::{Counter, CounterCommand, CounterDriver, CounterReading};
pub use network::{
    transmitted_bytes, Network, NetworkCommand, NetworkDriver, NetworkReading, PROC_NET_DEV,
};
