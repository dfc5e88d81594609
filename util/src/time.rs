//! General time utility functions

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert an optional timeout in seconds into a `std` duration.
///
/// Negative or non-finite values are treated as no timeout.
pub fn secs_to_duration(secs: Option<f64>) -> Option<std::time::Duration> {
    match secs {
        Some(s) if s.is_finite() && s >= 0.0 => Some(std::time::Duration::from_secs_f64(s)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration_to_seconds() {
        let d = chrono::Duration::milliseconds(1500);
        assert_eq!(duration_to_seconds(d), Some(1.5));
    }

    #[test]
    fn test_secs_to_duration() {
        assert_eq!(
            secs_to_duration(Some(0.25)),
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(secs_to_duration(Some(-1.0)), None);
        assert_eq!(secs_to_duration(Some(f64::NAN)), None);
        assert_eq!(secs_to_duration(None), None);
    }
}
