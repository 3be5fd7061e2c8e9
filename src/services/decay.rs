//! Passive decay: periodic re-classification so online→away→offline happens
//! from elapsed time alone.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::services::presence::PresenceAggregator;

pub struct DecayTimer {
    presence: Arc<PresenceAggregator>,
    period: Duration,
}

impl DecayTimer {
    pub fn new(presence: Arc<PresenceAggregator>, period: Duration) -> Self {
        Self { presence, period }
    }

    /// One decay pass; returns how many uids changed state.
    pub fn tick(&self) -> usize {
        let changed = self.presence.rederive();
        if changed > 0 {
            debug!(changed, "presence decayed");
        }
        changed
    }

    /// Run [`tick`](Self::tick) every period until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}
