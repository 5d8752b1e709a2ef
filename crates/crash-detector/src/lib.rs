//! Crash Detection
//!
//! Correlates two inertial signals, acceleration magnitude and angular rate
//! around Z, to decide whether an impact was followed by motion consistent
//! with an accident. Raises one debounced alert per event sequence.

mod classifier;
mod ingest;
mod sample;

pub use classifier::{ClassifierConfig, CollisionClassifier, CollisionEvent, CollisionState};
pub use ingest::{IngestHandle, MotionSnapshot, SampleIngest, MAX_DATAGRAM_BYTES};
pub use sample::{parse_sample, ClassifierInputError, SamplePair};
