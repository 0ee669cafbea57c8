use std::time::Duration;

use tracing::info;

use super::{CancelSlot, State, Transition, UpdateHubState, UpdateProbeState};
use crate::hub::UpdateHub;

/// Waits for the next probe, counting ticks of [`UpdateHub::poll_tick`].
#[derive(Debug)]
pub struct PollState {
    interval: Duration,
    ticks_count: u64,
    cancel: CancelSlot,
}

impl PollState {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticks_count: 0,
            cancel: CancelSlot::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks elapsed so far.
    pub fn ticks_count(&self) -> u64 {
        self.ticks_count
    }
}

const MIN_TICK: Duration = Duration::from_millis(1);

/// Number of ticks covering the interval, rounded up.
fn total_ticks(interval: Duration, tick: Duration) -> u64 {
    let tick = tick.as_nanos().max(1);
    interval.as_nanos().div_ceil(tick) as u64
}

impl State for PollState {
    fn id(&self) -> UpdateHubState {
        UpdateHubState::Poll
    }

    fn cancel_slot(&self) -> Option<&CancelSlot> {
        Some(&self.cancel)
    }

    fn handle(self: Box<Self>, hub: &mut UpdateHub) -> Transition {
        let mut this = *self;
        if let Some(next) = this.cancel.take_pending() {
            return Transition::cancelled(next);
        }
        let tick = hub.poll_tick.max(MIN_TICK);
        let total = total_ticks(this.interval, tick);
        info!("next probe in {}s", this.interval.as_secs());
        while this.ticks_count < total {
            if let Some(next) = this.cancel.wait_timeout(tick) {
                return Transition::cancelled(next);
            }
            this.ticks_count += 1;
        }
        Transition::to(UpdateProbeState::new())
    }
}
