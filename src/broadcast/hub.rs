//! The broadcast hub and its dispatch loop.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::broadcast;

use crate::broadcast::observer::{Observer, ObserverId};
use crate::observability::metrics;
use crate::record::Event;

/// Startup faults of the hub. These are the only hub conditions reported
/// to the host.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("broadcast hub dispatch loop is already running")]
    AlreadyRunning,

    #[error("broadcast hub requires a running tokio runtime")]
    NoRuntime,
}

/// An event stamped with its publish sequence number.
struct Sequenced {
    seq: u64,
    event: Arc<Event>,
}

struct ObserverSlot {
    tx: mpsc::Sender<Arc<Event>>,
    /// First sequence number this observer may receive.
    from_seq: u64,
    missed: Arc<AtomicU64>,
}

/// Fan-out point between event producers and live observers.
pub struct BroadcastHub {
    inbound_tx: mpsc::Sender<Sequenced>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Sequenced>>>,
    observers: DashMap<ObserverId, ObserverSlot>,
    next_seq: AtomicU64,
    next_observer: AtomicU64,
    observer_capacity: usize,
    running: AtomicBool,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// Create a hub. `inbound_capacity` bounds events waiting for dispatch,
    /// `observer_capacity` is the default per-observer queue length.
    pub fn new(inbound_capacity: usize, observer_capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            observers: DashMap::new(),
            next_seq: AtomicU64::new(0),
            next_observer: AtomicU64::new(0),
            observer_capacity: observer_capacity.max(1),
            running: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Hand an event to the dispatch loop. Never blocks.
    ///
    /// With no observers the event is discarded. Before `run` starts,
    /// events wait in the inbound queue.
    pub fn publish(&self, event: Event) {
        if self.observers.is_empty() {
            return;
        }

        let kind = event.kind();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        match self.inbound_tx.try_send(Sequenced {
            seq,
            event: Arc::new(event),
        }) {
            Ok(()) => metrics::record_event_published(kind),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped("inbound_full");
                tracing::debug!(kind, seq, "Hub inbound queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped("hub_stopped");
            }
        }
    }

    /// Register an observer with the default queue length.
    pub fn subscribe(&self) -> Observer {
        self.subscribe_with_capacity(self.observer_capacity)
    }

    /// Register an observer with its own queue length.
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Observer {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let missed = Arc::new(AtomicU64::new(0));
        let from_seq = self.next_seq.load(Ordering::SeqCst);

        self.observers.insert(
            id,
            ObserverSlot {
                tx,
                from_seq,
                missed: missed.clone(),
            },
        );
        metrics::record_observers(self.observers.len());
        tracing::debug!(observer = %id, from_seq, "Observer subscribed");

        Observer { id, rx, missed }
    }

    /// Deregister an observer. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.observers.remove(&id).is_some();
        if removed {
            metrics::record_observers(self.observers.len());
            tracing::debug!(observer = %id, "Observer unsubscribed");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Events dropped before reaching the dispatch loop.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drive delivery until `shutdown` fires. May only be started once.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), HubError> {
        let mut inbound = self
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(HubError::AlreadyRunning)?;

        self.running.store(true, Ordering::Release);
        tracing::info!("Broadcast hub dispatch loop started");

        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => self.dispatch(msg),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        self.running.store(false, Ordering::Release);
        tracing::info!("Broadcast hub dispatch loop stopped");
        Ok(())
    }

    fn dispatch(&self, msg: Sequenced) {
        let mut closed = Vec::new();

        for entry in self.observers.iter() {
            let slot = entry.value();
            if msg.seq < slot.from_seq {
                continue;
            }
            match slot.tx.try_send(msg.event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    slot.missed.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_dropped("observer_full");
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removal must happen after the iterator's shard guards are released.
        if !closed.is_empty() {
            for id in closed {
                self.observers.remove(&id);
                tracing::debug!(observer = %id, "Pruned disconnected observer");
            }
            metrics::record_observers(self.observers.len());
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("observers", &self.observers.len())
            .field("running", &self.is_running())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RequestRecord;
    use std::time::{Duration, Instant};
    use tokio::time::timeout;

    fn started(path: &str) -> Event {
        Event::RequestStarted(Arc::new(RequestRecord::new("GET", path)))
    }

    fn path_of(event: &Event) -> String {
        match event {
            Event::RequestStarted(r) | Event::RequestEnded(r) => r.path.clone(),
            _ => String::new(),
        }
    }

    fn spawn_hub(hub: Arc<BroadcastHub>) -> broadcast::Sender<()> {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        tokio::spawn(async move { hub.run(stop_rx).await });
        stop_tx
    }

    #[tokio::test]
    async fn test_subscriber_gets_only_later_events() {
        let hub = Arc::new(BroadcastHub::new(64, 16));
        let _stop = spawn_hub(hub.clone());

        let mut early = hub.subscribe();
        hub.publish(started("/before"));

        let mut late = hub.subscribe();
        hub.publish(started("/after"));

        let first = timeout(Duration::from_secs(1), early.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), early.recv()).await.unwrap().unwrap();
        assert_eq!(path_of(&first), "/before");
        assert_eq!(path_of(&second), "/after");

        let only = timeout(Duration::from_secs(1), late.recv()).await.unwrap().unwrap();
        assert_eq!(path_of(&only), "/after");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_publish_without_observers_is_discarded() {
        let hub = Arc::new(BroadcastHub::new(4, 4));
        for i in 0..100 {
            hub.publish(started(&format!("/{}", i)));
        }
        assert_eq!(hub.dropped_events(), 0);

        let _stop = spawn_hub(hub.clone());
        let mut observer = hub.subscribe();
        hub.publish(started("/fresh"));
        let event = timeout(Duration::from_secs(1), observer.recv()).await.unwrap().unwrap();
        assert_eq!(path_of(&event), "/fresh");
    }

    #[tokio::test]
    async fn test_events_buffered_until_run() {
        let hub = Arc::new(BroadcastHub::new(16, 16));
        let mut observer = hub.subscribe();
        hub.publish(started("/queued"));
        assert!(!hub.is_running());

        let _stop = spawn_hub(hub.clone());
        let event = timeout(Duration::from_secs(1), observer.recv()).await.unwrap().unwrap();
        assert_eq!(path_of(&event), "/queued");
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let hub = Arc::new(BroadcastHub::new(4, 4));
        let _stop = spawn_hub(hub.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (_tx, rx) = broadcast::channel(1);
        assert!(matches!(hub.run(rx).await, Err(HubError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_slow_observer_is_isolated() {
        let hub = Arc::new(BroadcastHub::new(1024, 1024));
        let _stop = spawn_hub(hub.clone());

        let mut fast = hub.subscribe_with_capacity(1024);
        let slow = hub.subscribe_with_capacity(1);

        let begin = Instant::now();
        for i in 0..200 {
            hub.publish(started(&format!("/{}", i)));
        }
        assert!(begin.elapsed() < Duration::from_millis(500));

        for i in 0..200 {
            let event = timeout(Duration::from_secs(1), fast.recv()).await.unwrap().unwrap();
            assert_eq!(path_of(&event), format!("/{}", i));
        }
        assert_eq!(fast.missed(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slow.missed(), 199);
        assert_eq!(slow.take_missed(), 199);
        assert_eq!(slow.missed(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new(4, 4);
        let observer = hub.subscribe();
        let id = observer.id();
        assert_eq!(hub.observer_count(), 1);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_observer_is_pruned() {
        let hub = Arc::new(BroadcastHub::new(16, 4));
        let _stop = spawn_hub(hub.clone());

        let mut keeper = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.observer_count(), 2);

        hub.publish(started("/x"));
        timeout(Duration::from_secs(1), keeper.recv()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let hub = Arc::new(BroadcastHub::new(4, 4));
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let task = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.run(stop_rx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.is_running());

        stop_tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!hub.is_running());
    }
}
