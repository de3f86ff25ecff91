use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bell::scheduler::BellScheduler;
use crate::playback::NotificationPort;
use crate::store::{SnapshotStore, StoreError};
use crate::time_provider::TimeProvider;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

pub type SharedScheduler<P> = Arc<Mutex<BellScheduler<P>>>;

/// A panic while holding the lock must not stop the bells.
pub fn lock_scheduler<P>(shared: &SharedScheduler<P>) -> MutexGuard<'_, BellScheduler<P>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copies the snapshot under the lock and writes it outside of it.
pub fn persist<P>(shared: &SharedScheduler<P>, store: &SnapshotStore) -> Result<(), StoreError> {
    let snapshot = lock_scheduler(shared).snapshot().clone();
    store.save(&snapshot)
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub bells_rung: usize,
    pub day_resets: usize,
    pub saved: bool,
}

pub struct TickRunner<P> {
    scheduler: SharedScheduler<P>,
    clock: Box<dyn TimeProvider>,
    store: SnapshotStore,
    period: Duration,
}

impl<P: NotificationPort> TickRunner<P> {
    pub fn new(
        scheduler: SharedScheduler<P>,
        clock: Box<dyn TimeProvider>,
        store: SnapshotStore,
    ) -> Self {
        Self {
            scheduler,
            clock,
            store,
            period: TICK_PERIOD,
        }
    }

    /// Ticks until `shutdown` resolves, then saves the snapshot once.
    pub async fn run_until<F>(&self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let mut summary = RunSummary::default();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        info!(clock = self.clock.label(), "tick loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let now = self.clock.now();
                    let outcome = lock_scheduler(&self.scheduler).tick(now);
                    summary.ticks += 1;
                    summary.bells_rung += outcome.rung;
                    if outcome.day_reset {
                        summary.day_resets += 1;
                    }
                    if outcome.matched > 0 {
                        debug!(
                            at = %now.format("%H:%M:%S"),
                            matched = outcome.matched,
                            rung = outcome.rung,
                            unassigned = outcome.unassigned,
                            failures = outcome.playback_failures,
                            "tick"
                        );
                    }
                }
            }
        }

        match persist(&self.scheduler, &self.store) {
            Ok(()) => {
                info!(path = %self.store.path().display(), "snapshot saved on shutdown");
                summary.saved = true;
            }
            Err(err) => warn!(error = %err, "final save failed"),
        }
        summary
    }
}
