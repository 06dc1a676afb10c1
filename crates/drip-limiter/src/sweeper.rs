//! Background eviction of idle tracking records.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::AdmissionEngine;

/// Spawn the periodic eviction sweep for `engine`.
///
/// Ticks every `cleanup_interval_ms`. A sweep that overruns its slot delays
/// the next tick instead of queueing extra ones. The task holds only a weak
/// reference and exits once the engine is dropped.
pub fn spawn_sweeper(engine: &Arc<AdmissionEngine>) -> JoinHandle<()> {
    let period = Duration::from_millis(engine.config().cleanup_interval_ms);
    let weak: Weak<AdmissionEngine> = Arc::downgrade(engine);

    info!(interval_ms = period.as_millis() as u64, "sweeper: started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing is idle yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(engine) = weak.upgrade() else {
                debug!("sweeper: engine dropped, stopping");
                break;
            };
            let evicted = engine.evict_expired();
            debug!(evicted, tracked = engine.stats().store.tracked_keys, "sweeper: sweep complete");
        }
    })
}
