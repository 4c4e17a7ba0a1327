//! CLI entry point for hwtest
//!
//! Runs the example test procedures against the example devices, and hosts the
//! background worker that [`BackgroundDriver`] spawns.
//!
//! # Usage
//!
//! Run the network test with drivers in-process:
//! ```bash
//! hwtest run network
//! ```
//!
//! Run the counter test with its driver polled by a worker process:
//! ```bash
//! hwtest run counter --background --config hwtest.toml
//! ```
//!
//! The exit status is 0 when no check failed and 1 otherwise.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use hwtest::config::{HarnessConfig, SinkKind};
use hwtest::controller::{Controller, Procedure, Step};
use hwtest::devices::{
    Counter, CounterCommand, CounterDriver, CounterReading, Network, NetworkCommand,
    NetworkDriver, NetworkReading,
};
use hwtest::driver::{run_worker, BackgroundDriver, Driver, WorkerOptions, WorkerSpec};
use hwtest::logging::{self, ConsoleLogger, SharedLogger};
use hwtest::tracing_config::{self, OutputFormat, TracingConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "hwtest")]
#[command(about = "Hardware-in-the-loop test harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an example test procedure
    Run {
        /// Device under test
        device: DeviceKind,

        /// Configuration file (defaults to hwtest.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Poll the driver from a background worker process
        #[arg(long)]
        background: bool,
    },

    /// Serve a driver to a foreground harness over stdin/stdout
    Worker {
        /// Driver to host
        #[arg(long)]
        driver: DeviceKind,

        /// Device tag for logged telemetry (defaults to the driver name)
        #[arg(long)]
        device: Option<String>,

        /// Polling period in milliseconds
        #[arg(long, default_value_t = 20)]
        period_ms: u64,

        /// Where the worker logs telemetry
        #[arg(long, value_enum, default_value_t = WorkerLog::Console)]
        log: WorkerLog,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceKind {
    Network,
    Counter,
}

impl DeviceKind {
    fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Network => "network",
            DeviceKind::Counter => "counter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WorkerLog {
    Console,
    Null,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            device,
            config,
            background,
        } => run_test(device, config, background).await,
        Commands::Worker {
            driver,
            device,
            period_ms,
            log,
        } => {
            let device = device.unwrap_or_else(|| driver.as_str().to_string());
            serve_worker(driver, device, period_ms, log).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_test(device: DeviceKind, config: Option<PathBuf>, background: bool) -> Result<ExitCode> {
    let config = match config {
        Some(path) => HarnessConfig::load_from(path)?,
        None => HarnessConfig::load()?,
    };
    config.validate()?;
    tracing_config::init_from_config(&config)?;

    info!(
        application = %config.application.name,
        device = device.as_str(),
        background,
        "starting test"
    );

    let logger = logging::logger_from_config(&config.logging)?;
    let controller = Controller::from_config(&config.controller)?;

    let outcome = match (device, background) {
        (DeviceKind::Network, false) => {
            let driver = NetworkDriver::loopback().await?;
            run_network(controller, driver, logger.clone()).await
        }
        (DeviceKind::Counter, false) => {
            run_counter(controller, CounterDriver::new(), logger.clone()).await
        }
        (DeviceKind::Network, true) => {
            let driver = Arc::new(BackgroundDriver::<NetworkReading, NetworkCommand>::spawn(
                worker_spec(device, &config)?,
            )?);
            let outcome = run_network(controller, driver.clone(), logger.clone()).await;
            driver.shutdown().await?;
            outcome
        }
        (DeviceKind::Counter, true) => {
            let driver = Arc::new(BackgroundDriver::<CounterReading, CounterCommand>::spawn(
                worker_spec(device, &config)?,
            )?);
            let outcome = run_counter(controller, driver.clone(), logger.clone()).await;
            driver.shutdown().await?;
            outcome
        }
    };

    logger.close().await?;
    let fails = outcome?;
    println!("{fails} failures");

    Ok(if fails == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn worker_spec(device: DeviceKind, config: &HarnessConfig) -> Result<WorkerSpec> {
    let log = match config.background.worker_sink {
        SinkKind::Null => "null",
        _ => "console",
    };
    let period_ms = config.background.period_ms.to_string();
    let spec = WorkerSpec::current_exe()
        .context("locating the hwtest executable")?
        .args([
            "worker",
            "--driver",
            device.as_str(),
            "--period-ms",
            period_ms.as_str(),
            "--log",
            log,
        ])
        .with_config(&config.background);
    Ok(spec)
}

async fn serve_worker(driver: DeviceKind, device: String, period_ms: u64, log: WorkerLog) -> Result<()> {
    tracing_config::init(TracingConfig::new(Level::INFO).with_format(OutputFormat::Compact))?;

    let logger: SharedLogger = match log {
        WorkerLog::Console => Arc::new(ConsoleLogger::stderr()),
        WorkerLog::Null => logging::null(),
    };
    let options = WorkerOptions::new(device).with_period(Duration::from_millis(period_ms));
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let exit = match driver {
        DeviceKind::Network => {
            let driver = NetworkDriver::loopback().await?;
            run_worker(driver, options, logger, stdin, stdout).await?
        }
        DeviceKind::Counter => run_worker(CounterDriver::new(), options, logger, stdin, stdout).await?,
    };
    info!(?exit, "worker finished");
    Ok(())
}

async fn run_network<D>(mut controller: Controller, driver: D, logger: SharedLogger) -> Result<u64>
where
    D: Driver<Reading = NetworkReading, Command = NetworkCommand> + 'static,
{
    let network = Arc::new(Network::new(driver, logger));
    controller.register_component(network.clone())?;
    Ok(controller.run(&mut NetworkTest::new(network)).await?)
}

async fn run_counter<D>(mut controller: Controller, driver: D, logger: SharedLogger) -> Result<u64>
where
    D: Driver<Reading = CounterReading, Command = CounterCommand> + 'static,
{
    let counter = Arc::new(Counter::new(driver, logger));
    controller.register_component(counter.clone())?;
    Ok(controller.run(&mut CounterTest::new(counter, 5)).await?)
}

/// Quiet check, quiet double check, then ping and expect traffic.
struct NetworkTest<D> {
    network: Arc<Network<D>>,
    stage: u8,
}

impl<D> NetworkTest<D> {
    fn new(network: Arc<Network<D>>) -> Self {
        Self { network, stage: 0 }
    }
}

#[async_trait]
impl<D> Procedure for NetworkTest<D>
where
    D: Driver<Reading = NetworkReading, Command = NetworkCommand> + 'static,
{
    fn name(&self) -> &str {
        "network"
    }

    async fn next_step(&mut self) -> Result<Option<Step>> {
        let step = match self.stage {
            0 => Some(Step::after(Duration::ZERO)),
            1 => Some(Step::after(Duration::from_secs(1))),
            2 => {
                self.network.send().await?;
                Some(Step::after(Duration::from_secs(1)))
            }
            _ => None,
        };
        self.stage = self.stage.saturating_add(1);
        Ok(step)
    }
}

/// A quiet check followed by rounds of increasing pulse bursts.
struct CounterTest<D> {
    counter: Arc<Counter<D>>,
    rounds: i32,
    round: i32,
    started: bool,
}

impl<D> CounterTest<D> {
    fn new(counter: Arc<Counter<D>>, rounds: i32) -> Self {
        Self {
            counter,
            rounds,
            round: 0,
            started: false,
        }
    }
}

#[async_trait]
impl<D> Procedure for CounterTest<D>
where
    D: Driver<Reading = CounterReading, Command = CounterCommand> + 'static,
{
    fn name(&self) -> &str {
        "counter"
    }

    async fn next_step(&mut self) -> Result<Option<Step>> {
        if !self.started {
            self.started = true;
            return Ok(Some(Step::defaults()));
        }
        if self.round >= self.rounds {
            return Ok(None);
        }
        self.round += 1;
        self.counter.pulse(self.round).await?;
        Ok(Some(Step::check_and_wait(Duration::from_millis(200))))
    }

    async fn teardown(&mut self) -> Result<()> {
        self.counter.driver().write(CounterCommand::Reset).await
    }
}
