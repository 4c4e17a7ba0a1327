//! End-to-end runs of the controller against the simulated counter.

use async_trait::async_trait;
use hwtest::config::{LoggingConfig, SinkKind};
use hwtest::controller::{steps, Controller, Procedure, Sleeper, Step};
use hwtest::devices::{Counter, CounterCommand, CounterDriver};
use hwtest::logging::{self, FanoutLogger, MemoryLogger, SharedLogger};
use hwtest::{Component, Driver, HarnessError, Logger, Verdict};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().unwrap().push(duration);
    }
}

/// Pulses before every check; the last round "forgets" to pulse.
struct PulseRounds {
    counter: Arc<Counter<CounterDriver>>,
    round: u32,
}

#[async_trait]
impl Procedure for PulseRounds {
    async fn next_step(&mut self) -> anyhow::Result<Option<Step>> {
        self.round += 1;
        match self.round {
            1..=3 => {
                self.counter.pulse(self.round as i32).await?;
                Ok(Some(Step::check_and_wait(Duration::from_millis(10))))
            }
            4 => {
                // Expect units that never arrive.
                self.counter.pulse(0).await?;
                Ok(Some(Step::check()))
            }
            _ => Ok(None),
        }
    }
}

#[tokio::test]
async fn counter_run_counts_one_failure() {
    let memory = MemoryLogger::new();
    let counter = Arc::new(Counter::new(CounterDriver::new(), Arc::new(memory.clone())));
    let sleeper = Arc::new(RecordingSleeper::default());

    let mut controller = Controller::new().with_sleeper(sleeper.clone());
    controller.register_component(counter.clone()).unwrap();

    let fails = controller
        .run(&mut PulseRounds {
            counter: counter.clone(),
            round: 0,
        })
        .await
        .unwrap();

    assert_eq!(fails, 1);
    assert_eq!(memory.count(Verdict::Pass), 3);
    assert_eq!(memory.count(Verdict::Fail), 1);
    let values: Vec<f64> = memory.events().iter().map(|e| e.value()).collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 0.0]);
    assert_eq!(
        *sleeper.calls.lock().unwrap(),
        vec![Duration::from_millis(10); 3]
    );
}

#[tokio::test]
async fn events_reach_every_fanout_sink() {
    let first = MemoryLogger::new();
    let second = MemoryLogger::new();
    let fanout: SharedLogger = Arc::new(
        FanoutLogger::new()
            .with(Arc::new(first.clone()))
            .with(Arc::new(second.clone())),
    );

    let counter = Arc::new(Counter::new(CounterDriver::new(), fanout.clone()));
    let mut controller = Controller::new();
    controller.register_component(counter).unwrap();

    let fails = controller
        .run(&mut steps([Step::defaults(), Step::defaults()]))
        .await
        .unwrap();
    fanout.close().await.unwrap();

    assert_eq!(fails, 0);
    assert_eq!(first.events(), second.events());
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn async_logger_from_config_drains_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        sink: SinkKind::Csv,
        csv_dir: dir.path().to_path_buf(),
        asynchronous: true,
    };
    let logger = logging::logger_from_config(&config).unwrap();

    let counter = Arc::new(Counter::new(
        CounterDriver::new().with_telemetry(logger.clone()),
        logger.clone(),
    ));
    let mut controller = Controller::new();
    controller.register_component(counter.clone()).unwrap();

    let fails = controller
        .run(&mut steps(vec![Step::defaults(); 20]))
        .await
        .unwrap();
    logger.close().await.unwrap();
    assert_eq!(fails, 0);

    let events = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
    assert_eq!(events.lines().count(), 21);
    let telemetry = std::fs::read_to_string(dir.path().join("telemetry_counter.csv")).unwrap();
    assert_eq!(
        telemetry.lines().next(),
        Some("device,timestamp,incremental_units,cumulative_units")
    );
    assert_eq!(telemetry.lines().count(), 21);
}

#[tokio::test]
async fn driver_error_aborts_run() {
    struct Unplugged {
        probe: hwtest::Probe,
    }

    #[async_trait]
    impl Component for Unplugged {
        fn probe(&self) -> &hwtest::Probe {
            &self.probe
        }

        async fn check(&self) -> anyhow::Result<()> {
            let driver = CounterDriver::new();
            driver.write(CounterCommand::Pulse { count: -5 }).await?;
            Ok(())
        }
    }

    let mut controller = Controller::new();
    controller
        .register_component(Arc::new(Unplugged {
            probe: hwtest::Probe::new("unplugged", logging::null()),
        }))
        .unwrap();

    let err = controller
        .run(&mut steps([Step::defaults()]))
        .await
        .unwrap_err();
    match err {
        HarnessError::Check { component, source } => {
            assert_eq!(component, "unplugged");
            assert!(source.to_string().contains("non-negative"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
