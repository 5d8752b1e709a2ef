//! Polling Controller
//!
//! Drives the fixed command cycle (speed, RPM, coolant temperature, battery
//! voltage) over the supervisor's channel. Each command gets a bounded
//! number of attempts; protocol-level failures only leave a gap in the
//! reading, while a transport failure faults the link and abandons the cycle.

use crate::error::SchedulerError;
use crate::reading::Reading;
use crate::supervisor::{ConnectionState, ConnectionSupervisor, Connector};
use obd_protocol::{interpret, ChannelError, Command, CommandChannel, Measurement};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the polling controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Attempts per command before it is marked exhausted
    pub max_attempts: u8,
    /// Delay between attempts of the same command (ms)
    pub retry_delay_ms: u64,
    /// Delay between cycles (ms)
    pub cycle_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 200,
            cycle_delay_ms: 250,
        }
    }
}

impl PollingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }
}

/// Terminal state of one command within a cycle
#[derive(Debug)]
pub enum CommandOutcome {
    /// Decoded after `attempts` tries
    Succeeded { measurement: Measurement, attempts: u8 },
    /// Every attempt timed out, came back empty or failed to decode
    Exhausted { attempts: u8 },
    /// Transport failure; the cycle must stop
    Transport(ChannelError),
}

/// Fixed-cycle poller publishing one [`Reading`] per completed cycle
pub struct PollingController {
    config: PollingConfig,
    cycle: u64,
    reading_tx: watch::Sender<Option<Reading>>,
}

impl PollingController {
    pub fn new(config: PollingConfig) -> Self {
        let (reading_tx, _) = watch::channel(None);
        Self {
            config,
            cycle: 0,
            reading_tx,
        }
    }

    /// Latest-reading observer
    pub fn subscribe(&self) -> watch::Receiver<Option<Reading>> {
        self.reading_tx.subscribe()
    }

    /// Completed cycles so far
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// Query one command with the retry policy
    pub async fn poll_command<S>(
        &self,
        channel: &mut CommandChannel<S>,
        command: Command,
    ) -> CommandOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("Sending {} (attempt {}/{})", command, attempts, max_attempts);

            let failure = match channel.send(command).await {
                Ok(frame) => match interpret(command, &frame) {
                    Ok(measurement) => {
                        debug!("{} -> {}", command, measurement);
                        return CommandOutcome::Succeeded { measurement, attempts };
                    }
                    Err(e) => format!("invalid response {:?}: {}", frame.text(), e),
                },
                Err(e) if e.is_transport() => return CommandOutcome::Transport(e),
                Err(e) => e.to_string(),
            };

            warn!("{} attempt {} failed: {}", command, attempts, failure);
            if attempts >= max_attempts {
                warn!("Max attempts reached for {}", command);
                return CommandOutcome::Exhausted { attempts };
            }
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Run every command of the cycle once, in order.
    ///
    /// Returns the reading, or the transport error that cut the cycle short.
    pub async fn run_cycle<S>(&mut self, channel: &mut CommandChannel<S>) -> Result<Reading, SchedulerError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reading = Reading::new(self.cycle + 1);

        for command in Command::CYCLE {
            match self.poll_command(channel, command).await {
                CommandOutcome::Succeeded { measurement, .. } => reading.insert(measurement),
                CommandOutcome::Exhausted { .. } => {}
                CommandOutcome::Transport(e) => return Err(SchedulerError::Transport(e)),
            }
        }

        self.cycle += 1;
        reading.stamp();
        Ok(reading)
    }

    /// Poll until cancelled.
    ///
    /// Connects when disconnected, waits on `reconnect` while faulted, and
    /// closes the link before returning.
    pub async fn run<C: Connector>(
        &mut self,
        supervisor: &mut ConnectionSupervisor<C>,
        reconnect: &Notify,
        cancel: CancellationToken,
    ) -> Result<(), SchedulerError> {
        info!("Starting polling controller");

        while !cancel.is_cancelled() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.step(supervisor, reconnect) => {}
            }
        }

        supervisor.shutdown().await;
        info!("Polling controller stopped after {} cycles", self.cycle);
        Ok(())
    }

    async fn step<C: Connector>(&mut self, supervisor: &mut ConnectionSupervisor<C>, reconnect: &Notify) {
        match supervisor.state() {
            ConnectionState::Faulted => {
                reconnect.notified().await;
                if let Err(e) = supervisor.reconnect().await {
                    warn!("Reconnect failed: {}", e);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                if let Err(e) = supervisor.connect().await {
                    warn!("Connect failed: {}", e);
                }
            }
            ConnectionState::Ready => {
                let channel = match supervisor.channel() {
                    Ok(channel) => channel,
                    Err(e) => {
                        supervisor.fault(&e.to_string()).await;
                        return;
                    }
                };
                match self.run_cycle(channel).await {
                    Ok(reading) => {
                        let missing = reading.missing();
                        if missing.is_empty() {
                            info!("Cycle {} complete", reading.cycle);
                        } else {
                            info!("Cycle {} complete, missing {:?}", reading.cycle, missing);
                        }
                        self.reading_tx.send_replace(Some(reading));
                        tokio::time::sleep(self.config.cycle_delay()).await;
                    }
                    Err(e) => supervisor.fault(&e.to_string()).await,
                }
            }
        }
    }
}

impl Default for PollingController {
    fn default() -> Self {
        Self::new(PollingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{count, healthy, healthy_reply, MockConnector, Reply, Script};
    use crate::supervisor::{BackoffProfile, SupervisorConfig};
    use std::sync::Arc;

    fn supervisor(scripts: Vec<Option<Script>>) -> (ConnectionSupervisor<MockConnector>, crate::mock::RequestLog) {
        let connector = MockConnector::new(scripts);
        let log = connector.log.clone();
        let config = SupervisorConfig {
            backoff: BackoffProfile::Fast,
            ..Default::default()
        };
        (ConnectionSupervisor::new(connector, config), log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle() {
        let (mut supervisor, log) = supervisor(vec![Some(healthy())]);
        supervisor.connect().await.unwrap();
        let mut poller = PollingController::default();

        let reading = poller.run_cycle(supervisor.channel().unwrap()).await.unwrap();

        assert_eq!(reading.cycle, 1);
        assert_eq!(reading.speed(), Some(30));
        assert_eq!(reading.rpm(), Some(1726));
        assert_eq!(reading.temperature_c(), Some(75));
        assert_eq!(reading.voltage_v(), Some(12.6));
        assert!(reading.is_complete());
        assert_eq!(
            *log.lock().unwrap(),
            ["ATZ", "ATE0", "010D", "010C", "0105", "ATRV"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_empty_is_exhausted_after_three_attempts() {
        let script: Script = Arc::new(|command: &str, _: usize| match command {
            "010C" => Some(Reply::Frame("\r\r>".to_string())),
            other => healthy_reply(other),
        });
        let (mut supervisor, log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let poller = PollingController::default();

        let outcome = poller.poll_command(supervisor.channel().unwrap(), Command::Rpm).await;
        assert!(matches!(outcome, CommandOutcome::Exhausted { attempts: 3 }));
        assert_eq!(count(&log, "010C"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_command_takes_bounded_time() {
        let script: Script = Arc::new(|command: &str, _: usize| match command {
            "010C" => Some(Reply::Silent),
            other => healthy_reply(other),
        });
        let (mut supervisor, log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let poller = PollingController::default();

        let started = tokio::time::Instant::now();
        let outcome = poller.poll_command(supervisor.channel().unwrap(), Command::Rpm).await;
        let elapsed = started.elapsed();

        // Three read timeouts plus two retry delays
        assert!(matches!(outcome, CommandOutcome::Exhausted { attempts: 3 }));
        assert_eq!(count(&log, "010C"), 3);
        assert!(elapsed >= Duration::from_millis(3 * 500 + 2 * 200), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worst_case_cycle_is_bounded() {
        let silent: Script = Arc::new(|command: &str, _: usize| match command {
            "ATZ" | "ATE0" => None,
            _ => Some(Reply::Silent),
        });
        let (mut supervisor, _log) = supervisor(vec![Some(silent)]);
        supervisor.connect().await.unwrap();
        let mut poller = PollingController::default();

        let started = tokio::time::Instant::now();
        let reading = poller.run_cycle(supervisor.channel().unwrap()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(reading.is_empty());
        assert_eq!(reading.missing(), Command::CYCLE.to_vec());
        assert!(elapsed >= Duration::from_millis(4 * 1900), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(8000), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_command_is_absent_and_cycle_continues() {
        let script: Script = Arc::new(|command: &str, _: usize| match command {
            "010C" => Some(Reply::Silent),
            other => healthy_reply(other),
        });
        let (mut supervisor, log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let mut poller = PollingController::default();

        let reading = poller.run_cycle(supervisor.channel().unwrap()).await.unwrap();

        assert_eq!(reading.rpm(), None);
        assert_eq!(reading.missing(), vec![Command::Rpm]);
        assert_eq!(reading.temperature_c(), Some(75));
        assert_eq!(count(&log, "010C"), 3);
        assert_eq!(count(&log, "0105"), 1);
        assert_eq!(count(&log, "ATRV"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_takes_retry_path() {
        let script: Script = Arc::new(|command: &str, seen: usize| match (command, seen) {
            ("010D", 1) => Some(Reply::Frame("STOPPED>".to_string())),
            (other, _) => healthy_reply(other),
        });
        let (mut supervisor, log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let poller = PollingController::default();

        let outcome = poller.poll_command(supervisor.channel().unwrap(), Command::Speed).await;
        match outcome {
            CommandOutcome::Succeeded { measurement, attempts } => {
                assert_eq!(measurement, Measurement::Speed(30));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(count(&log, "010D"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_speed_is_recorded() {
        let script: Script = Arc::new(|command: &str, _: usize| match command {
            "010D" => Some(Reply::Frame("41 0D 00\r\r>".to_string())),
            other => healthy_reply(other),
        });
        let (mut supervisor, _log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let mut poller = PollingController::default();

        let reading = poller.run_cycle(supervisor.channel().unwrap()).await.unwrap();
        assert_eq!(reading.speed(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_aborts_cycle() {
        let script: Script = Arc::new(|command: &str, _: usize| match command {
            "010C" => Some(Reply::Hangup),
            other => healthy_reply(other),
        });
        let (mut supervisor, log) = supervisor(vec![Some(script)]);
        supervisor.connect().await.unwrap();
        let mut poller = PollingController::default();

        let err = poller.run_cycle(supervisor.channel().unwrap()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Transport(ref e) if e.is_transport()));
        assert_eq!(count(&log, "010C"), 1);
        assert_eq!(count(&log, "0105"), 0);
        assert_eq!(poller.cycles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_readings_and_closes_on_cancel() {
        let (supervisor, _log) = supervisor(vec![Some(healthy())]);
        let mut poller = PollingController::default();
        let mut readings = poller.subscribe();
        let states = supervisor.subscribe();
        let cancel = CancellationToken::new();
        let reconnect = Arc::new(Notify::new());

        let task = {
            let cancel = cancel.clone();
            let reconnect = reconnect.clone();
            tokio::spawn(async move {
                let mut supervisor = supervisor;
                poller.run(&mut supervisor, &reconnect, cancel).await.unwrap();
                poller.cycles()
            })
        };

        let mut published = Vec::new();
        for expected in 1..=2 {
            readings.changed().await.unwrap();
            published.push(tokio::time::Instant::now());
            let reading = readings.borrow_and_update().clone().unwrap();
            assert_eq!(reading.cycle, expected);
            assert!(reading.is_complete());
        }

        // Cycle delay, then four commands at least 100 ms apart
        let gap = published[1] - published[0];
        assert!(gap >= Duration::from_millis(250 + 3 * 100), "{:?}", gap);
        assert!(gap < Duration::from_millis(600), "{:?}", gap);

        cancel.cancel();
        let cycles = task.await.unwrap();
        assert!(cycles >= 2);
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_waits_for_reconnect_request() {
        let hangup: Script = Arc::new(|command: &str, _: usize| match command {
            "010D" => Some(Reply::Hangup),
            other => healthy_reply(other),
        });
        let (supervisor, _log) = supervisor(vec![Some(hangup), Some(healthy())]);
        let mut poller = PollingController::default();
        let mut readings = poller.subscribe();
        let mut states = supervisor.subscribe();
        let cancel = CancellationToken::new();
        let reconnect = Arc::new(Notify::new());

        let task = {
            let cancel = cancel.clone();
            let reconnect = reconnect.clone();
            tokio::spawn(async move {
                let mut supervisor = supervisor;
                poller.run(&mut supervisor, &reconnect, cancel).await.unwrap();
            })
        };

        states.wait_for(|s| *s == ConnectionState::Faulted).await.unwrap();

        // Stays faulted without an explicit request
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*states.borrow(), ConnectionState::Faulted);
        assert!(readings.borrow().is_none());

        reconnect.notify_one();
        readings.changed().await.unwrap();
        assert_eq!(readings.borrow().as_ref().map(|r| r.speed()), Some(Some(30)));

        cancel.cancel();
        task.await.unwrap();
    }
}
