#![allow(dead_code)]

use ingestor::store::MemoryStore;
use ingestor::IngestionCoordinator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub fn memory_coordinator() -> (Arc<MemoryStore>, IngestionCoordinator) {
    let store = Arc::new(MemoryStore::new());
    let coordinator = IngestionCoordinator::new(store.clone());
    (store, coordinator)
}

/// Counts WARN events seen by the thread-local subscriber.
#[derive(Clone, Default)]
pub struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Installs a counting subscriber for the current thread until the guard drops.
/// Use with the current-thread runtime so every poll happens on this thread.
pub fn capture_warnings() -> (WarnCounter, tracing::subscriber::DefaultGuard) {
    let counter = WarnCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (counter, guard)
}
