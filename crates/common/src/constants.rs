// Timing constants shared by the lease manager, task dispatcher, and worker.

use std::time::Duration;

/// How long a newly acquired or renewed lease remains active.
pub const LEASE_TTL: Duration = Duration::from_secs(30);

/// How often a worker is expected to heartbeat a claimed task.
///
/// Must satisfy `HEARTBEAT_INTERVAL * 2 <= LEASE_TTL` so a single dropped
/// heartbeat never expires the lease.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Returns `Ok(())` if the given TTL/heartbeat pair satisfies the 2x ratio
/// this system requires, `Err` with a human-readable message otherwise.
pub fn validate_ttl_ratio(lease_ttl: Duration, heartbeat_interval: Duration) -> Result<(), String> {
    if heartbeat_interval.checked_mul(2).map(|doubled| doubled <= lease_ttl).unwrap_or(false) {
        Ok(())
    } else {
        Err(format!(
            "heartbeat_interval ({heartbeat_interval:?}) * 2 must be <= lease_ttl ({lease_ttl:?})"
        ))
    }
}
