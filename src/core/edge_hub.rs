use crate::core::debounce::Debouncer;
use crate::core::registry::lock;
use crate::domain::ports::{
    Edge, EdgeCallback, EdgeNotifier, EdgeSource, EventSourceId, HandlerOutcome, LineHandle,
    SubscriptionHandle,
};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Delivery {
    source: EventSourceId,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Edge notification layer over a raw [`EdgeSource`].
///
/// Each subscription gets its own delivery task, so callbacks for one source
/// run one at a time while different sources are delivered in parallel.
pub struct EdgeHub<S: EdgeSource> {
    source: Arc<S>,
    next_id: AtomicU64,
    sources: Mutex<HashMap<EventSourceId, LineHandle>>,
    deliveries: Mutex<HashMap<SubscriptionHandle, Delivery>>,
}

impl<S: EdgeSource> EdgeHub<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            next_id: AtomicU64::new(1),
            sources: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(HashMap::new()),
        }
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.deliveries).len()
    }

    pub fn mapped_sources(&self) -> usize {
        lock(&self.sources).len()
    }
}

#[async_trait]
impl<S: EdgeSource> EdgeNotifier for EdgeHub<S> {
    fn map_line_to_event_source(&self, handle: LineHandle) -> Result<EventSourceId> {
        let mut sources = lock(&self.sources);
        if let Some((id, _)) = sources.iter().find(|(_, h)| **h == handle) {
            return Ok(*id);
        }
        let id = EventSourceId(self.allocate());
        sources.insert(id, handle);
        tracing::debug!("{} is mapped to event source {}", handle.line(), id.0);
        Ok(id)
    }

    async fn subscribe(
        &self,
        source: EventSourceId,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<SubscriptionHandle> {
        let handle = lock(&self.sources).get(&source).copied().ok_or_else(|| {
            MonitorError::ConfigError {
                message: format!("unknown event source {}", source.0),
            }
        })?;

        let stream = self
            .source
            .edge_stream(handle)
            .map_err(|e| MonitorError::SubscriptionFailure {
                line: handle.line(),
                message: e.to_string(),
            })?;

        let (cancel, mut cancelled) = oneshot::channel();
        let mut events = stream.events;
        let mut debouncer = Debouncer::new(stream.debounce);
        let line = handle.line();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if event.edge != edge || !debouncer.accept(event.at) {
                            continue;
                        }
                        let HandlerOutcome::Handled = callback(source);
                    }
                }
            }
            tracing::debug!("Edge delivery for {} stopped", line);
        });

        let subscription = SubscriptionHandle(self.allocate());
        lock(&self.deliveries).insert(
            subscription,
            Delivery {
                source,
                cancel,
                task,
            },
        );
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: SubscriptionHandle) {
        let removed = {
            let mut deliveries = lock(&self.deliveries);
            let removed = deliveries.remove(&subscription);
            if let Some(delivery) = &removed {
                // The mapping goes with the last subscription on its source.
                if !deliveries.values().any(|d| d.source == delivery.source) {
                    lock(&self.sources).remove(&delivery.source);
                }
            }
            removed
        };
        let Some(delivery) = removed else {
            return;
        };
        // The task may already be gone if its stream closed.
        let _ = delivery.cancel.send(());
        if let Err(e) = delivery.task.await {
            tracing::warn!("Edge delivery task ended abnormally: {}", e);
        }
    }
}
