use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use crate::ClientRegistry;

/// How often to sweep, and how long a client may stay quiet before it is forgotten.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(180),
        }
    }
}

#[derive(Clone, Debug)]
struct SweeperMetrics {
    evicted: Counter<u64>,
}

/// Periodically removes idle clients from a [`ClientRegistry`].
///
/// Call [`sweep`](Self::sweep) to run a single pass, or [`spawn`](Self::spawn)
/// to run passes on a fixed interval until the returned handle is shut down.
#[derive(Debug)]
pub struct EvictionSweeper<K>
where
    K: Hash + Eq,
{
    registry: Arc<ClientRegistry<K>>,
    config: SweepConfig,
    instruments: SweeperMetrics,
}

impl<K> EvictionSweeper<K>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new(registry: Arc<ClientRegistry<K>>, config: SweepConfig) -> Self {
        let meter = global::meter("eviction_sweeper");
        let instruments = SweeperMetrics {
            evicted: meter.u64_counter("registry_evicted").build(),
        };

        Self {
            registry,
            config,
            instruments,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs one eviction pass and returns the number of clients removed.
    pub fn sweep(&self) -> usize {
        let evicted = self.registry.evict_idle(self.config.idle_threshold).len();
        if evicted > 0 {
            self.instruments.evicted.add(evicted as u64, &[]);
            debug!(
                evicted,
                remaining = self.registry.len(),
                "evicted idle clients"
            );
        } else {
            trace!(remaining = self.registry.len(), "no idle clients");
        }
        evicted
    }

    /// Moves the sweeper onto the tokio runtime.
    ///
    /// The first pass runs one full interval after this call. The loop stops when
    /// [`SweeperHandle::shutdown`] is called or the handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            // tokio intervals must be non-zero
            let period = self.config.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if std::panic::catch_unwind(AssertUnwindSafe(|| self.sweep())).is_err() {
                            error!("eviction sweep panicked; retrying on the next tick");
                        }
                    }
                }
            }
            debug!("eviction sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Controls a running [`EvictionSweeper`].
///
/// Dropping the handle also stops the sweeper, without waiting for it.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn shutdown(self) {
        // The task may already have exited, in which case nobody is listening.
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(%err, "eviction sweeper did not shut down cleanly");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
