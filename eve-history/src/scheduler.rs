//! A shared clock which periodically ticks every history subscribed to it.

use crate::error::HistoryError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Something which wants to be called on every tick of a `Scheduler`.
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// Called once per tick with the current time in seconds since the Unix epoch.
    async fn tick(&self, time: u32) -> Result<(), HistoryError>;
}

/// Identifies a subscription so it can later be cancelled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

/// A periodic clock shared between histories.
///
/// The clock only runs while there is at least one subscriber. Subscribers are held weakly, so a
/// history which is dropped without unsubscribing is pruned on the next tick. Subscribers are
/// ticked one after the other in subscription order, and a tick never starts before the previous
/// one has finished.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    period: Duration,
    state: Mutex<State>,
    /// Held for the duration of each tick.
    ticking: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct State {
    subscribers: Vec<(SubscriptionId, Weak<dyn TickHandler>)>,
    next_id: u64,
    clock: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                period,
                state: Mutex::new(State::default()),
                ticking: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Add a subscriber, starting the clock if it isn't already running. The clock needs a Tokio
    /// runtime; if there is none it won't be started.
    ///
    /// Returns `None` if the scheduler has been shut down.
    pub fn subscribe(&self, handler: Weak<dyn TickHandler>) -> Option<SubscriptionId> {
        let mut state = self.inner.lock();
        if state.shut_down {
            warn!("Scheduler has been shut down, not subscribing.");
            return None;
        }
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscribers.push((id, handler));

        if state.clock.is_none() {
            match Handle::try_current() {
                Ok(runtime) => {
                    info!("Starting history clock every {:?}", self.inner.period);
                    let start = Instant::now() + self.inner.period;
                    state.clock =
                        Some(runtime.spawn(run_clock(Arc::downgrade(&self.inner), start)));
                }
                Err(e) => error!("Can't start history clock: {}", e),
            }
        }
        Some(id)
    }

    /// Remove a subscriber, stopping the clock if it was the last one.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.inner.lock();
        state.subscribers.retain(|(subscriber, _)| *subscriber != id);
        if state.subscribers.is_empty() {
            if let Some(clock) = state.clock.take() {
                debug!("Last subscriber gone, stopping history clock.");
                clock.abort();
            }
        }
    }

    /// Stop the clock and refuse any further subscriptions.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.shut_down = true;
        state.subscribers.clear();
        if let Some(clock) = state.clock.take() {
            clock.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().clock.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Tick every subscriber now, without waiting for the clock.
    pub async fn tick_now(&self) {
        self.inner.tick(unix_time()).await;
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tick all live subscribers. Returns false if there are none left.
    async fn tick(&self, time: u32) -> bool {
        let _ticking = self.ticking.lock().await;
        let handlers: Vec<(SubscriptionId, Arc<dyn TickHandler>)> = {
            let mut state = self.lock();
            state
                .subscribers
                .retain(|(_, handler)| handler.strong_count() > 0);
            if state.subscribers.is_empty() {
                if let Some(clock) = state.clock.take() {
                    clock.abort();
                }
                return false;
            }
            state
                .subscribers
                .iter()
                .filter_map(|(id, handler)| Some((*id, handler.upgrade()?)))
                .collect()
        };

        for (id, handler) in handlers {
            if let Err(e) = handler.tick(time).await {
                error!("Tick failed for subscriber {:?}: {}", id, e);
            }
        }
        true
    }
}

async fn run_clock(inner: Weak<Inner>, start: Instant) {
    let period = match inner.upgrade() {
        Some(inner) => inner.period,
        None => return,
    };
    let mut interval = time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        if !inner.tick(unix_time()).await {
            debug!("No subscribers left, history clock stopped.");
            return;
        }
    }
}

/// The current time in seconds since the Unix epoch.
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since_epoch| since_epoch.as_secs() as u32)
}
