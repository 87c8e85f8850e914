//! Run-wide rate limiting for every request the crawler makes.
//!
//! The catalog lives on a single host, so the [`RateLimiter`] enforces one
//! minimum interval between *any* two requests (page loads, track batches,
//! HEAD probes, file transfers), whichever worker issues them. Waiting on the
//! limiter is therefore a serialization point across the whole run.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ripper_core::download::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(200)));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//!
//! // Second request waits for the remainder of the interval
//! limiter.acquire().await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay over the run (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Shared limiter enforcing a minimum interval between requests.
///
/// Designed to be wrapped in `Arc` and shared by every spawned task. The
/// slot bookkeeping sits behind a `tokio::sync::Mutex` so that the
/// check-sleep-update sequence is atomic across workers.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    slot: Mutex<Slot>,
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct Slot {
    /// `None` until the first request; the first request is never delayed.
    last_request: Option<Instant>,
    /// Set by a server-mandated pause (Retry-After).
    hold_until: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval between requests.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = min_interval.as_millis()))]
    pub fn new(min_interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            min_interval,
            slot: Mutex::new(Slot::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a limiter that applies no interval.
    ///
    /// Server-mandated pauses recorded through [`RateLimiter::record_rate_limit`]
    /// are still honoured.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured minimum interval.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the next request may be issued, then claims the slot.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        let mut slot = self.slot.lock().await;
        let now = Instant::now();

        let mut ready_at = now;
        if let Some(last) = slot.last_request {
            ready_at = ready_at.max(last + self.min_interval);
        }
        if let Some(hold) = slot.hold_until {
            ready_at = ready_at.max(hold);
        }

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = self.add_cumulative_delay(delay);
            debug!(
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                && cumulative.saturating_sub(delay) < CUMULATIVE_DELAY_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider a lower request volume"
                );
            }
            tokio::time::sleep(delay).await;
        }

        slot.last_request = Some(Instant::now());
        slot.hold_until = None;
    }

    /// Records a server-mandated pause (from a Retry-After header).
    ///
    /// The next [`RateLimiter::acquire`] will not return before `delay` has
    /// elapsed from now.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, delay: Duration) {
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        let mut slot = self.slot.lock().await;
        slot.hold_until = Some(slot.hold_until.map_or(until, |current| current.max(until)));
        debug!(delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 forms: integer seconds (`120`) and an HTTP-date
/// (`Wed, 21 Oct 2025 07:28:00 GMT`). Returns `None` when unparseable; caps
/// values at 1 hour; dates in the past yield zero.
///
/// ```
/// use std::time::Duration;
/// use ripper_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) if duration > MAX_RETRY_AFTER => {
                warn!(
                    delay_secs = duration.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                Some(MAX_RETRY_AFTER)
            }
            Ok(duration) => Some(duration),
            Err(_) => Some(Duration::ZERO),
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
