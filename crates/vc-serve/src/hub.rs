use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use vc_core::event::Event;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 16;
pub const DEFAULT_BROADCAST_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub subscriber_buffer: usize,
    pub broadcast_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            broadcast_buffer: DEFAULT_BROADCAST_BUFFER,
        }
    }
}

/// Unregisters the subscriber when the handle holding it is dropped, which
/// is how client disconnects reach the hub.
struct UnregisterGuard {
    id: u64,
    unregister_tx: mpsc::UnboundedSender<u64>,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        let _ = self.unregister_tx.send(self.id);
    }
}

/// One live-stream client. Dropping the subscriber unregisters it.
pub struct Subscriber {
    events: mpsc::Receiver<Event>,
    done: watch::Receiver<bool>,
    _guard: UnregisterGuard,
}

impl Subscriber {
    /// Next event in publish order; `None` once unsubscribed or the hub has
    /// stopped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Resolves when the hub closes this subscription.
    pub async fn done(&mut self) {
        let _ = self.done.wait_for(|closed| *closed).await;
    }
}

struct Registration {
    id: u64,
    events_tx: mpsc::Sender<Event>,
    done_tx: watch::Sender<bool>,
}

/// Fan-out hub handle. All state lives in the [`HubRunner`] loop task and is
/// reached only through channels, so the handle needs no locks.
#[derive(Clone)]
pub struct Hub {
    config: HubConfig,
    next_id: Arc<AtomicU64>,
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    broadcast_tx: mpsc::Sender<Event>,
    stop_tx: Arc<watch::Sender<bool>>,
    stopped_rx: watch::Receiver<bool>,
}

pub struct HubRunner {
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<u64>,
    broadcast_rx: mpsc::Receiver<Event>,
    stop_rx: watch::Receiver<bool>,
    stopped_tx: watch::Sender<bool>,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Hub, HubRunner) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_buffer.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (stopped_tx, stopped_rx) = watch::channel(false);

        (
            Hub {
                config,
                next_id: Arc::new(AtomicU64::new(1)),
                register_tx,
                unregister_tx,
                broadcast_tx,
                stop_tx: Arc::new(stop_tx),
                stopped_rx,
            },
            HubRunner {
                register_rx,
                unregister_rx,
                broadcast_rx,
                stop_rx,
                stopped_tx,
            },
        )
    }

    /// Register a new subscriber. On a stopped hub the returned subscriber's
    /// channels are already closed so the caller observes immediate
    /// completion.
    pub fn subscribe(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let (done_tx, done_rx) = watch::channel(false);

        let registration = Registration {
            id,
            events_tx,
            done_tx,
        };
        let guard = UnregisterGuard {
            id,
            unregister_tx: self.unregister_tx.clone(),
        };
        if self.register_tx.send(registration).is_err() {
            // Hub already stopped; events_tx was dropped with the failed
            // message, closing the receiver.
            let (_, closed_done) = watch::channel(true);
            return Subscriber {
                events: events_rx,
                done: closed_done,
                _guard: guard,
            };
        }

        Subscriber {
            events: events_rx,
            done: done_rx,
            _guard: guard,
        }
    }

    /// Non-blocking broadcast. A full hub queue drops the event with a
    /// warning; it never stalls the ingest hook.
    pub fn publish(&self, event: Event) {
        match self.broadcast_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    "broadcast queue full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Idempotent; waits until the loop has closed every subscriber.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut stopped = self.stopped_rx.clone();
        let _ = stopped.wait_for(|value| *value).await;
    }
}

impl HubRunner {
    pub async fn run(mut self) {
        let mut clients: HashMap<u64, (mpsc::Sender<Event>, watch::Sender<bool>)> =
            HashMap::new();

        loop {
            tokio::select! {
                registration = self.register_rx.recv() => {
                    if let Some(reg) = registration {
                        clients.insert(reg.id, (reg.events_tx, reg.done_tx));
                        debug!(count = clients.len(), "subscriber registered");
                    }
                }
                id = self.unregister_rx.recv() => {
                    if let Some(id) = id {
                        if let Some((_, done_tx)) = clients.remove(&id) {
                            let _ = done_tx.send(true);
                            debug!(count = clients.len(), "subscriber unregistered");
                        }
                    }
                }
                event = self.broadcast_rx.recv() => {
                    let Some(event) = event else { break };
                    for (events_tx, _) in clients.values() {
                        // Drop for this subscriber only; never block the loop
                        // on one slow reader.
                        if let Err(mpsc::error::TrySendError::Full(_)) =
                            events_tx.try_send(event.clone())
                        {
                            warn!(
                                event_id = event.id,
                                event_type = %event.event_type,
                                "subscriber buffer full, event dropped"
                            );
                        }
                    }
                }
                _ = self.stop_rx.changed() => break,
            }
        }

        for (_, (events_tx, done_tx)) in clients.drain() {
            drop(events_tx);
            let _ = done_tx.send(true);
        }
        let _ = self.stopped_tx.send(true);
    }
}
