use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use crate::store::{ErrorLogEntry, UsageLogEntry};

/// Everything the gateway announces while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Usage(UsageLogEntry),
    InferenceError(ErrorLogEntry),
    CooldownStart {
        provider: String,
        model: String,
        consecutive_failures: u32,
        duration_ms: u64,
    },
    CooldownEnd {
        provider: String,
        model: String,
    },
    ConfigReloaded,
}

/// A durable or side-channel consumer of events (e.g. the usage log).
pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Fan-out of events to live subscribers and registered sinks.
///
/// Emitting never blocks on a consumer: subscribers sit behind a bounded
/// broadcast channel (laggards drop frames), sink writes are spawned.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Event>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: Event) {
        if self.inner.tx.receiver_count() > 0 && self.inner.tx.send(event.clone()).is_err() {
            warn!(event = "event_bus_send_failed", "no live subscribers took the event");
        }
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Enough for a burst of requests; laggards drop frames by design.
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl EventSink for CountingSink {
        fn write<'a>(
            &'a self,
            _event: &'a Event,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(Event::ConfigReloaded).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ConfigReloaded));
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_block() {
        let bus = EventBus::new(1);
        bus.emit(Event::CooldownEnd {
            provider: "p".into(),
            model: "m".into(),
        })
        .await;
    }

    #[tokio::test]
    async fn sinks_are_invoked() {
        let bus = EventBus::new(8);
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        bus.add_sink(sink.clone()).await;
        bus.emit(Event::ConfigReloaded).await;
        // Sink writes are spawned; give the task a tick.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }
}
