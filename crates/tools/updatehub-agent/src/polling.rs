//! Scheduling of probes.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use updatehub_settings::PersistentPolling;

/// What to do according to the polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    ProbeNow,
    /// Wait before probing.
    Wait(Duration),
}

/// Compute the schedule at `now`.
///
/// A device that never polled before gets a first poll offset by `jitter`, which is
/// called with the interval and recorded in `polling`. A pending extra poll shortens
/// the wait if it falls before the next regular poll.
pub fn schedule(
    interval: Duration,
    polling: &mut PersistentPolling,
    now: DateTime<Utc>,
    jitter: impl FnOnce(Duration) -> Duration,
) -> Schedule {
    if polling.probe_asap {
        return Schedule::ProbeNow;
    }
    let Some(last_poll) = polling.last_poll else {
        let first_poll = *polling
            .first_poll
            .get_or_insert_with(|| add(now, jitter(interval)));
        return until(now, first_poll);
    };
    let next_poll = add(last_poll, interval);
    if let Some(extra_interval) = polling.extra_interval {
        let extra_poll = add(last_poll, extra_interval);
        if extra_poll < next_poll {
            return until(now, extra_poll);
        }
    }
    until(now, next_poll)
}

/// Delay before probing again after the first failed probe.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(60);

/// Delay before probing again after `retries` consecutive failed probes.
///
/// Doubles with every failure and never exceeds the polling interval.
pub fn retry_delay(retries: u64, interval: Duration) -> Duration {
    backoff(RETRY_BASE_DELAY, retries, interval.max(RETRY_BASE_DELAY))
}

/// Default delay before downloading again after the first failed attempt.
pub const DOWNLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// Longest delay between two download attempts.
pub const DOWNLOAD_RETRY_MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Delay before downloading again after `attempts` failed attempts.
pub fn download_retry_delay(base: Duration, attempts: u64) -> Duration {
    backoff(base, attempts, DOWNLOAD_RETRY_MAX_DELAY.max(base))
}

fn backoff(base: Duration, attempts: u64, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16) as u32;
    base.saturating_mul(1 << exponent).min(max)
}

/// Uniformly random offset below the interval, in whole seconds.
pub fn random_jitter(interval: Duration) -> Duration {
    match interval.as_secs() {
        0 => Duration::ZERO,
        seconds => Duration::from_secs(rand::thread_rng().gen_range(0..seconds)),
    }
}

fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Schedule {
    match (at - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => Schedule::Wait(remaining),
        _ => Schedule::ProbeNow,
    }
}

fn add(time: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
