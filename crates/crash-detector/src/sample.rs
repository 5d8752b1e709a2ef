//! Inertial sample datagrams
//!
//! The sensor node sends one ASCII line per sample:
//! `<acceleration_g>,<angular_rate_z>[,<ignored>...]`.

use thiserror::Error;
use tokio::time::Instant;

/// Malformed sample; it is dropped and classifier state is left untouched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierInputError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field} value: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Datagram exceeds {0} bytes without a line break")]
    Overlong(usize),
}

/// One acceleration / angular-rate reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePair {
    /// Acceleration magnitude (g)
    pub acceleration_g: f32,
    /// Angular rate around Z (deg/s, signed)
    pub angular_rate_z: f32,
    /// Arrival time
    pub timestamp: Instant,
}

impl SamplePair {
    pub fn new(acceleration_g: f32, angular_rate_z: f32, timestamp: Instant) -> Self {
        Self {
            acceleration_g,
            angular_rate_z,
            timestamp,
        }
    }
}

/// Parse one datagram received at `timestamp`
pub fn parse_sample(datagram: &str, timestamp: Instant) -> Result<SamplePair, ClassifierInputError> {
    let mut fields = datagram.trim().split(',');

    let acceleration_g = parse_field(fields.next(), "acceleration")?;
    let angular_rate_z = parse_field(fields.next(), "angular_rate")?;

    Ok(SamplePair::new(acceleration_g, angular_rate_z, timestamp))
}

fn parse_field(raw: Option<&str>, field: &'static str) -> Result<f32, ClassifierInputError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(ClassifierInputError::MissingField(field))?;

    raw.parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ClassifierInputError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_fields() {
        let now = Instant::now();
        let sample = parse_sample("4.0,-25\r\n", now).unwrap();
        assert_eq!(sample.acceleration_g, 4.0);
        assert_eq!(sample.angular_rate_z, -25.0);
        assert_eq!(sample.timestamp, now);
    }

    #[test]
    fn test_extra_fields_ignored() {
        let sample = parse_sample(" 1.2 , 3.4 ,0.1,9.8", Instant::now()).unwrap();
        assert_eq!(sample.acceleration_g, 1.2);
        assert_eq!(sample.angular_rate_z, 3.4);
    }

    #[test]
    fn test_missing_rate() {
        assert_eq!(
            parse_sample("2.5", Instant::now()),
            Err(ClassifierInputError::MissingField("angular_rate"))
        );
        assert_eq!(
            parse_sample("2.5,", Instant::now()),
            Err(ClassifierInputError::MissingField("angular_rate"))
        );
        assert_eq!(
            parse_sample("", Instant::now()),
            Err(ClassifierInputError::MissingField("acceleration"))
        );
    }

    #[test]
    fn test_non_numeric_and_non_finite() {
        assert!(matches!(
            parse_sample("abc,1", Instant::now()),
            Err(ClassifierInputError::InvalidNumber { field: "acceleration", .. })
        ));
        assert!(matches!(
            parse_sample("1,NaN", Instant::now()),
            Err(ClassifierInputError::InvalidNumber { field: "angular_rate", .. })
        ));
        assert!(parse_sample("inf,0", Instant::now()).is_err());
    }
}
