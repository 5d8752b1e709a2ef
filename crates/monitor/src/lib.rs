//! Vehicle Monitor
//!
//! Runs the OBD-II polling loop and the collision classifier side by side,
//! writing readings, link state changes and collision events to stdout as
//! JSON lines. Operator answers (`help`, `ok`, `reconnect`) come from stdin.

pub mod config;
pub mod output;

pub use config::MonitorConfig;
pub use output::{OperatorCommand, Output};

use crash_detector::{CollisionClassifier, IngestHandle, MotionSnapshot, SampleIngest};
use obd_protocol::open_serial;
use obd_scheduler::{ConnectionState, ConnectionSupervisor, PollingController, SerialConnector};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Motion lines are written at most this often
const MOTION_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Initialize tracing; `RUST_LOG` wins over the configured level
pub fn init_logging(default_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

/// Run both pipelines until Ctrl-C
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let reconnect = Arc::new(Notify::new());

    let mut supervisor = ConnectionSupervisor::new(
        SerialConnector::new(config.adapter.clone()),
        config.supervisor.clone(),
    );
    let mut poller = PollingController::new(config.polling.clone());
    let readings = poller.subscribe();
    let states = supervisor.subscribe();

    let polling = {
        let cancel = cancel.clone();
        let reconnect = reconnect.clone();
        tokio::spawn(async move { poller.run(&mut supervisor, &reconnect, cancel).await })
    };

    let (ingest, handle) = SampleIngest::new(CollisionClassifier::new(config.classifier.clone()));
    let acks = handle.acknowledger();
    let sensor = match open_serial(&config.sensor) {
        Ok(stream) => {
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                match ingest.run(stream, cancel).await {
                    Ok(ingest) => info!("Sample ingestion ended, {} samples dropped", ingest.dropped()),
                    Err(e) => error!("Sample ingestion failed: {}", e),
                }
            }))
        }
        Err(e) => {
            error!("Sensor unavailable on {}: {}; collision detection disabled", config.sensor.device, e);
            None
        }
    };

    let reporter = tokio::spawn(report(
        readings,
        states.clone(),
        handle,
        cancel.clone(),
        std::io::stdout(),
    ));
    let operator = tokio::spawn(operator_input(spawn_stdin_reader(), acks, states, reconnect, cancel.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    polling.await??;
    if let Some(sensor) = sensor {
        sensor.await?;
    }
    reporter.await??;
    operator.abort();

    info!("Vehicle monitor stopped");
    Ok(())
}

/// Write every output line to `out` until cancelled.
///
/// Motion snapshots are throttled: the newest one seen since the last motion
/// line is written on each tick, so the final value still appears after the
/// sensor goes quiet.
async fn report<W: Write>(
    mut readings: watch::Receiver<Option<obd_scheduler::Reading>>,
    mut states: watch::Receiver<ConnectionState>,
    mut collisions: IngestHandle,
    cancel: CancellationToken,
    mut out: W,
) -> anyhow::Result<W> {
    let mut motion_tick = tokio::time::interval(MOTION_REPORT_INTERVAL);
    motion_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending_motion: Option<MotionSnapshot> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Ok(()) = readings.changed() => {
                let reading = readings.borrow_and_update().clone();
                if let Some(reading) = reading {
                    Output::Reading(&reading).write_to(&mut out)?;
                }
            }
            Ok(()) = states.changed() => {
                let state = *states.borrow_and_update();
                Output::Connection(state).write_to(&mut out)?;
            }
            Some(event) = collisions.events.recv() => {
                info!("Collision event: {:?}", event);
                Output::Collision(&event).write_to(&mut out)?;
            }
            Ok(()) = collisions.motion.changed() => {
                if let Some(snapshot) = *collisions.motion.borrow_and_update() {
                    pending_motion = Some(snapshot);
                }
            }
            _ = motion_tick.tick() => {
                if let Some(snapshot) = pending_motion.take() {
                    Output::Motion(&snapshot).write_to(&mut out)?;
                }
            }
        }
    }

    Ok(out)
}

/// Stdin lines, read on a plain thread that never blocks runtime shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn operator_input(
    mut lines: mpsc::Receiver<String>,
    acks: mpsc::Sender<bool>,
    states: watch::Receiver<ConnectionState>,
    reconnect: Arc<Notify>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        match OperatorCommand::parse(&line) {
            Some(OperatorCommand::Acknowledge { help_needed }) => {
                if acks.send(help_needed).await.is_err() {
                    warn!("Collision detection is not running");
                }
            }
            Some(OperatorCommand::Reconnect) => {
                if *states.borrow() == ConnectionState::Faulted {
                    reconnect.notify_one();
                } else {
                    info!("Adapter link is not faulted; ignoring reconnect");
                }
            }
            None => warn!("Unknown operator command: {:?}", line.trim()),
        }
    }
}
