//! Collision Classifier
//!
//! An acceleration spike alone is not treated as an accident (potholes and
//! hard braking produce them too). An accident is raised when a reverse
//! rotation follows a recorded impact within the correlation window. Once
//! raised, the alert stays active until it is acknowledged or the
//! acknowledgment deadline passes; no duplicate alerts fire in between.
//!
//! O(1) per sample, no buffering.

use crate::sample::SamplePair;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Classifier thresholds and windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Acceleration above which a sample counts as an impact (g)
    pub impact_threshold_g: f32,
    /// Angular rate below which rotation corroborates an accident (deg/s)
    pub reverse_threshold: f32,
    /// Max time from impact to rotation (ms)
    pub window_ms: u64,
    /// Auto-acknowledge an unanswered alert after this long (ms)
    pub ack_deadline_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            impact_threshold_g: 3.0,
            reverse_threshold: -20.0,
            window_ms: 10_000,
            ack_deadline_ms: 30_000,
        }
    }
}

impl ClassifierConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }
}

/// Something the outside world should hear about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollisionEvent {
    /// Acceleration crossed the impact threshold; not an alert by itself
    Impact { g_force: f32 },
    /// Impact followed by reverse rotation inside the window
    Accident {
        g_force: f32,
        angular_rate: f32,
        since_impact_ms: u64,
    },
    /// Rider answered the alert
    Acknowledged { help_needed: bool },
    /// Nobody answered before the deadline; assume help is needed
    AutoAcknowledged,
}

impl CollisionEvent {
    /// Events that change or resolve the alert; these must never be dropped
    pub fn is_alert_transition(&self) -> bool {
        !matches!(self, CollisionEvent::Impact { .. })
    }
}

/// Mutable classifier state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CollisionState {
    /// Time of the most recent impact
    pub last_impact_time: Option<Instant>,
    /// Acceleration of the most recent impact
    pub last_impact_g: f32,
    /// An accident alert is awaiting acknowledgment
    pub alert_active: bool,
    /// When the active alert was raised
    pub alert_raised_at: Option<Instant>,
}

/// Push-model accident detector
#[derive(Debug, Clone)]
pub struct CollisionClassifier {
    config: ClassifierConfig,
    state: CollisionState,
}

impl CollisionClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        info!(
            "Collision classifier: impact > {} g, rotation < {}, window {} ms",
            config.impact_threshold_g, config.reverse_threshold, config.window_ms
        );
        Self {
            config,
            state: CollisionState::default(),
        }
    }

    pub fn state(&self) -> &CollisionState {
        &self.state
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn alert_active(&self) -> bool {
        self.state.alert_active
    }

    /// Change the impact threshold at runtime
    pub fn set_impact_threshold(&mut self, threshold_g: f32) {
        info!("Impact threshold set to {} g", threshold_g);
        self.config.impact_threshold_g = threshold_g;
    }

    /// Feed one sample; returns the events it caused, oldest first
    pub fn process(&mut self, sample: &SamplePair) -> Vec<CollisionEvent> {
        let now = sample.timestamp;
        let mut events = Vec::new();

        events.extend(self.poll_deadline(now));

        if sample.acceleration_g > self.config.impact_threshold_g {
            debug!("Impact detected: {} g", sample.acceleration_g);
            // A burst of high-g samples is one impact; only its first sample is reported
            let pending = self.impact_pending(now);
            self.state.last_impact_time = Some(now);
            self.state.last_impact_g = sample.acceleration_g;
            if !pending {
                events.push(CollisionEvent::Impact {
                    g_force: sample.acceleration_g,
                });
            }
        }

        if sample.angular_rate_z < self.config.reverse_threshold {
            events.extend(self.on_reverse(sample.angular_rate_z, now));
        }

        events
    }

    /// An impact is recorded and still inside the correlation window
    fn impact_pending(&self, now: Instant) -> bool {
        self.state
            .last_impact_time
            .is_some_and(|at| now.saturating_duration_since(at) <= self.config.window())
    }

    fn on_reverse(&mut self, angular_rate: f32, now: Instant) -> Option<CollisionEvent> {
        let Some(impact_at) = self.state.last_impact_time else {
            debug!("Rotation {} without a prior impact", angular_rate);
            return None;
        };

        let since_impact = now.saturating_duration_since(impact_at);
        if since_impact > self.config.window() {
            debug!("Rotation {} outside window ({:?} after impact)", angular_rate, since_impact);
            return None;
        }

        if self.state.alert_active {
            debug!("Alert already active, suppressing duplicate");
            return None;
        }

        self.state.alert_active = true;
        self.state.alert_raised_at = Some(now);
        warn!(
            "Accident detected: {} g impact followed by rotation {} after {:?}",
            self.state.last_impact_g, angular_rate, since_impact
        );

        Some(CollisionEvent::Accident {
            g_force: self.state.last_impact_g,
            angular_rate,
            since_impact_ms: since_impact.as_millis() as u64,
        })
    }

    /// External answer to an active alert.
    ///
    /// Also forgets the impact that caused it. A reverse rotation arriving
    /// after the answer but still inside that impact's window does not alert
    /// again; only a new impact re-arms the classifier.
    pub fn acknowledge(&mut self, help_needed: bool) -> Option<CollisionEvent> {
        if !self.state.alert_active {
            debug!("Acknowledgment with no active alert ignored");
            return None;
        }
        info!("Alert acknowledged (help needed: {})", help_needed);
        self.clear_alert();
        Some(CollisionEvent::Acknowledged { help_needed })
    }

    /// Auto-acknowledge once the deadline has passed
    pub fn poll_deadline(&mut self, now: Instant) -> Option<CollisionEvent> {
        let raised_at = self.state.alert_raised_at.filter(|_| self.state.alert_active)?;
        if now.saturating_duration_since(raised_at) < self.config.ack_deadline() {
            return None;
        }
        warn!("No response within {:?}, assuming help is needed", self.config.ack_deadline());
        self.clear_alert();
        Some(CollisionEvent::AutoAcknowledged)
    }

    /// Time left before the active alert auto-acknowledges
    pub fn deadline_remaining(&self, now: Instant) -> Option<Duration> {
        let raised_at = self.state.alert_raised_at.filter(|_| self.state.alert_active)?;
        Some(self.config.ack_deadline().saturating_sub(now.saturating_duration_since(raised_at)))
    }

    fn clear_alert(&mut self) {
        self.state.alert_active = false;
        self.state.alert_raised_at = None;
        self.state.last_impact_time = None;
    }
}

impl Default for CollisionClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
