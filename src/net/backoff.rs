//! Accept-loop backoff with jitter.
//!
//! Transient accept failures (fd exhaustion, aborted handshakes) should slow
//! a serve loop down, not end it.

use std::io;
use std::time::Duration;
use rand::Rng;

/// First retry delay.
pub const ACCEPT_BASE_DELAY_MS: u64 = 5;
/// Retry delay ceiling.
pub const ACCEPT_MAX_DELAY_MS: u64 = 1_000;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter: 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Whether an accept error is worth retrying.
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }

    // EMFILE / ENFILE / ENOBUFS / ENOMEM: resource pressure, may clear up.
    matches!(err.raw_os_error(), Some(23 | 24 | 105 | 12))
}
