use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Identifier attached to every job so log lines, execution records and the
/// script-visible `request.id` can be correlated.
pub type TraceId = u64;

static TRACE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a process-unique trace id.
///
/// The upper 32 bits come from the wall clock, the lower 32 bits from a
/// monotonically increasing counter, so ids stay unique even when the clock
/// does not move between calls.
pub fn generate_trace_id() -> TraceId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = TRACE_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    (timestamp & 0xFFFF_FFFF_0000_0000) | (counter & 0xFFFF_FFFF)
}

/// Milliseconds since the Unix epoch, used for record and archive timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
