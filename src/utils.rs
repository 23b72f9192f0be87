use std::time::Duration;

/// Convert an MPRIS microsecond position to a Duration, clamping negatives
pub fn from_mpris_micros(micros: i64) -> Duration {
    Duration::from_micros(micros.max(0) as u64)
}

/// Convert a Duration to an MPRIS position in microseconds
pub fn to_mpris_micros(duration: Duration) -> i64 {
    duration.as_micros() as i64
}
