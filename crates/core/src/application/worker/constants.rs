// Worker constants (no magic values)
use std::time::Duration;

/// Default deadline for `wait_until_finished` (10 minutes)
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Sleep duration after a worker-loop error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How long shutdown waits for a worker to drain before aborting it (5s)
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
