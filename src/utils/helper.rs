use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use std::time::Duration;

/// Current time truncated to whole seconds
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Round to the nearest whole second; exactly half a second rounds up.
pub fn round_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = time.trunc_subsecs(0);
    if time.timestamp_subsec_millis() >= 500 {
        truncated + TimeDelta::seconds(1)
    } else {
        truncated
    }
}

/// Request timestamp shared by every exchange polled in the same tick
pub fn request_time() -> DateTime<Utc> {
    round_to_second(Utc::now())
}

/// Pause between sequential calls for a `max` requests per `unit` seconds budget
pub fn rate_limit_pause(max: u32, unit: f64) -> Duration {
    if max == 0 || unit <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(unit / f64::from(max))
}
