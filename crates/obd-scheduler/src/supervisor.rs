//! Connection Supervisor
//!
//! Owns the adapter link and its state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Ready
//!                     |           |
//!                     v           v  (transport error)
//!                   Faulted <-----+
//! ```
//!
//! A faulted link stays faulted until [`ConnectionSupervisor::reconnect`] is
//! called, so a persistent hardware problem is never masked by silent retries.

use crate::error::SchedulerError;
use obd_protocol::{
    open_serial, ChannelTiming, CommandChannel, InitCommand, SerialConfig, SerialStream,
    TransportError,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Link state as seen by the polling controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Faulted,
}

/// Fixed delay between connect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffProfile {
    /// 300 ms, for adapters on a local bus
    Fast,
    /// 2 s, for Bluetooth links that need time to settle
    Standard,
}

impl BackoffProfile {
    pub fn delay(&self) -> Duration {
        match self {
            BackoffProfile::Fast => Duration::from_millis(300),
            BackoffProfile::Standard => Duration::from_millis(2000),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Connect attempts before settling into `Faulted`
    pub connect_attempts: u8,
    /// Delay between connect attempts
    pub backoff: BackoffProfile,
    /// Settle time after each init command (ms)
    pub init_settle_ms: u64,
    /// Minimum spacing between writes (ms)
    pub min_spacing_ms: u64,
    /// Prompt deadline per command (ms)
    pub read_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            backoff: BackoffProfile::Standard,
            init_settle_ms: 500,
            min_spacing_ms: obd_protocol::DEFAULT_MIN_SPACING_MS,
            read_timeout_ms: obd_protocol::DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl SupervisorConfig {
    pub fn channel_timing(&self) -> ChannelTiming {
        ChannelTiming {
            min_spacing: Duration::from_millis(self.min_spacing_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

/// Opens a fresh duplex stream to the adapter
pub trait Connector: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;
}

/// Connector for serial / RFCOMM devices
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    type Stream = SerialStream;

    async fn connect(&mut self) -> Result<SerialStream, TransportError> {
        open_serial(&self.config)
    }
}

/// Connection state machine around a [`Connector`]
pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    config: SupervisorConfig,
    channel: Option<CommandChannel<C::Stream>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, config: SupervisorConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            config,
            channel: None,
            state_tx,
        }
    }

    /// Current state (a snapshot; it may change right after)
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Channel to drive, only while `Ready`
    pub fn channel(&mut self) -> Result<&mut CommandChannel<C::Stream>, SchedulerError> {
        match self.state() {
            ConnectionState::Ready => self.channel.as_mut().ok_or(SchedulerError::NotReady),
            ConnectionState::Faulted => Err(SchedulerError::Faulted),
            ConnectionState::Disconnected | ConnectionState::Connecting => Err(SchedulerError::NotReady),
        }
    }

    /// Bring the link up from `Disconnected`.
    ///
    /// Refuses to run from `Faulted`; use [`reconnect`](Self::reconnect).
    pub async fn connect(&mut self) -> Result<(), SchedulerError> {
        match self.state() {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Faulted => return Err(SchedulerError::Faulted),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.close_channel().await;
        self.set_state(ConnectionState::Connecting);

        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            info!("Connecting to OBD adapter (attempt {}/{})", attempt, attempts);
            match self.connector.connect().await {
                Ok(stream) => {
                    let mut channel = CommandChannel::new(stream, self.config.channel_timing());
                    let settle = Duration::from_millis(self.config.init_settle_ms);
                    Self::initialize(&mut channel, settle).await;
                    self.channel = Some(channel);
                    self.set_state(ConnectionState::Ready);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff.delay()).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Faulted);
        Err(SchedulerError::ConnectFailed { attempts })
    }

    /// Explicit external request to recover from any state
    pub async fn reconnect(&mut self) -> Result<(), SchedulerError> {
        info!("Reconnect requested");
        self.close_channel().await;
        self.set_state(ConnectionState::Disconnected);
        self.connect().await
    }

    /// Record a transport failure reported by the polling controller
    pub async fn fault(&mut self, reason: &str) {
        if self.state() == ConnectionState::Faulted {
            return;
        }
        error!("OBD link faulted: {}", reason);
        self.close_channel().await;
        self.set_state(ConnectionState::Faulted);
    }

    /// Close the link and return to `Disconnected`
    pub async fn shutdown(&mut self) {
        self.close_channel().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Reset and echo-off; failures are logged and otherwise ignored
    async fn initialize(channel: &mut CommandChannel<C::Stream>, settle: Duration) {
        for command in InitCommand::SEQUENCE {
            match channel.send_init(command).await {
                Ok(frame) => debug!("{} -> {}", command.mnemonic(), frame),
                Err(e) => warn!("Init command {} failed: {}", command.mnemonic(), e),
            }
            tokio::time::sleep(settle).await;
        }
    }

    async fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    /// Publish and log a transition once; repeated states are not re-reported
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            match next {
                ConnectionState::Faulted => warn!("Connection state {:?} -> {:?}", previous, next),
                _ => info!("Connection state {:?} -> {:?}", previous, next),
            }
        }
    }
}
