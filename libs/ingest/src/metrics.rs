use std::time::{Duration, Instant};

/// Records per second over `elapsed`. Zero elapsed time yields zero.
pub fn throughput(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    records as f64 / secs
}

/// Status line for `records` observed between `start` and `now`.
pub fn report_at(records: u64, start: Instant, now: Instant) -> String {
    let elapsed = now.saturating_duration_since(start);
    format!(
        "throughput = {:.2} msgs/sec, count = {records}",
        throughput(records, elapsed)
    )
}

/// Status line for `records` observed since `start`.
pub fn report(records: u64, start: Instant) -> String {
    report_at(records, start, Instant::now())
}
