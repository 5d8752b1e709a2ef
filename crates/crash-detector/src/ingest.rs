//! Sample ingestion task
//!
//! Reads newline-delimited datagrams from the sensor stream and feeds each
//! one synchronously into the classifier. Publishes the latest motion values
//! and every classifier event, and accepts acknowledgments from outside.

use crate::classifier::{CollisionClassifier, CollisionEvent};
use crate::sample::{parse_sample, ClassifierInputError};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest datagram accepted before the buffer is discarded
pub const MAX_DATAGRAM_BYTES: usize = 256;

/// How often the acknowledgment deadline is checked with no samples arriving
const DEADLINE_TICK: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Latest motion values for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionSnapshot {
    pub acceleration_g: f32,
    pub angular_rate_z: f32,
    pub alert_active: bool,
}

/// Consumer side of a running [`SampleIngest`]
pub struct IngestHandle {
    /// Classifier events in order
    pub events: mpsc::Receiver<CollisionEvent>,
    /// Latest motion snapshot
    pub motion: watch::Receiver<Option<MotionSnapshot>>,
    acks: mpsc::Sender<bool>,
}

impl IngestHandle {
    /// Answer the active alert
    pub async fn acknowledge(&self, help_needed: bool) -> bool {
        self.acks.send(help_needed).await.is_ok()
    }

    /// Sender that can answer alerts from elsewhere
    pub fn acknowledger(&self) -> mpsc::Sender<bool> {
        self.acks.clone()
    }
}

/// Owns the classifier for the lifetime of the sensor stream
pub struct SampleIngest {
    classifier: CollisionClassifier,
    events_tx: mpsc::Sender<CollisionEvent>,
    motion_tx: watch::Sender<Option<MotionSnapshot>>,
    acks_rx: mpsc::Receiver<bool>,
    /// Alert transitions waiting for room in the event channel
    backlog: VecDeque<CollisionEvent>,
    pending: Vec<u8>,
    dropped: u64,
}

impl SampleIngest {
    pub fn new(classifier: CollisionClassifier) -> (Self, IngestHandle) {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (motion_tx, motion) = watch::channel(None);
        let (acks, acks_rx) = mpsc::channel(4);

        let ingest = Self {
            classifier,
            events_tx,
            motion_tx,
            acks_rx,
            backlog: VecDeque::new(),
            pending: Vec::new(),
            dropped: 0,
        };
        (ingest, IngestHandle { events, motion, acks })
    }

    pub fn classifier(&self) -> &CollisionClassifier {
        &self.classifier
    }

    /// Malformed datagrams dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Read until EOF, a read error, or cancellation
    pub async fn run<R>(mut self, mut reader: R, cancel: CancellationToken) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        info!("Starting sample ingestion");
        let mut buf = [0u8; 512];
        let mut tick = tokio::time::interval(DEADLINE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !self.flush_backlog(&cancel).await {
                info!("Sample ingestion cancelled");
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sample ingestion cancelled");
                    break;
                }
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            info!("Sensor stream closed");
                            break;
                        }
                        Ok(n) => self.feed(&buf[..n], Instant::now()),
                        Err(e) => {
                            error!("Sensor read error: {}", e);
                            return Err(e);
                        }
                    }
                }
                Some(help_needed) = self.acks_rx.recv() => {
                    if let Some(event) = self.classifier.acknowledge(help_needed) {
                        self.publish(event);
                    }
                    self.publish_motion_flag();
                }
                _ = tick.tick() => {
                    if let Some(event) = self.classifier.poll_deadline(Instant::now()) {
                        self.publish(event);
                        self.publish_motion_flag();
                    }
                }
            }
        }

        Ok(self)
    }

    /// Split a chunk into datagrams and classify each complete one
    pub fn feed(&mut self, chunk: &[u8], now: Instant) {
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            if text.trim().is_empty() {
                continue;
            }
            self.ingest(&text, now);
        }

        if self.pending.len() > MAX_DATAGRAM_BYTES {
            self.reject(ClassifierInputError::Overlong(MAX_DATAGRAM_BYTES));
            self.pending.clear();
        }
    }

    fn ingest(&mut self, datagram: &str, now: Instant) {
        let sample = match parse_sample(datagram, now) {
            Ok(sample) => sample,
            Err(e) => return self.reject(e),
        };

        for event in self.classifier.process(&sample) {
            self.publish(event);
        }

        self.motion_tx.send_replace(Some(MotionSnapshot {
            acceleration_g: sample.acceleration_g,
            angular_rate_z: sample.angular_rate_z,
            alert_active: self.classifier.alert_active(),
        }));
    }

    fn reject(&mut self, err: ClassifierInputError) {
        self.dropped += 1;
        debug!("Dropping sample: {}", err);
    }

    /// Hand an event to the consumer.
    ///
    /// `Impact` notifications are dropped when the channel is full; alert
    /// transitions are queued and delivered in order by [`run`](Self::run).
    fn publish(&mut self, event: CollisionEvent) {
        if !self.backlog.is_empty() {
            self.defer(event);
            return;
        }

        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.defer(event),
            Err(TrySendError::Closed(event)) => debug!("No event consumer, dropping {:?}", event),
        }
    }

    fn defer(&mut self, event: CollisionEvent) {
        if event.is_alert_transition() {
            debug!("Event channel full, queueing {:?}", event);
            self.backlog.push_back(event);
        } else {
            warn!("Event channel full, dropping {:?}", event);
        }
    }

    /// Deliver queued alert transitions, waiting for the consumer.
    ///
    /// Returns `false` if cancelled first.
    async fn flush_backlog(&mut self, cancel: &CancellationToken) -> bool {
        while let Some(event) = self.backlog.pop_front() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                sent = self.events_tx.send(event) => {
                    if sent.is_err() {
                        debug!("No event consumer, discarding {} queued events", self.backlog.len());
                        self.backlog.clear();
                    }
                }
            }
        }
        true
    }

    /// Alert transitions not yet delivered
    pub fn queued(&self) -> usize {
        self.backlog.len()
    }

    fn publish_motion_flag(&self) {
        let alert_active = self.classifier.alert_active();
        self.motion_tx.send_if_modified(|snapshot| match snapshot {
            Some(s) if s.alert_active != alert_active => {
                s.alert_active = alert_active;
                true
            }
            _ => false,
        });
    }
}
