use crate::backoff::{BackoffCalculator, BackoffConfig};
use crate::payload::build_payloads;
use crate::sender::{SendResult, Sender};
use crate::timer::{TimerFactory, TimerHandle, TokioTimerFactory};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};
use vc_core::derive::DerivedEvent;
use vc_core::time::{system_clock, Clock};

pub const DEFAULT_BATCH_DELAY_SECS: u32 = 3;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
const EVENT_CHANNEL_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterConfig {
    pub notify_on_join: bool,
    pub notify_on_leave: bool,
    pub notify_on_world_join: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NotifierStatus {
    pub disabled: bool,
    pub disabled_reason: String,
    pub disabled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct NotifierOptions {
    pub timer_factory: Arc<dyn TimerFactory>,
    pub clock: Arc<dyn Clock>,
    pub max_queue_size: usize,
    pub backoff: BackoffConfig,
}

impl Default for NotifierOptions {
    fn default() -> Self {
        Self {
            timer_factory: Arc::new(TokioTimerFactory),
            clock: system_clock(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            backoff: BackoffConfig::default(),
        }
    }
}

struct State {
    queue: Vec<DerivedEvent>,
    timer: Option<Box<dyn TimerHandle>>,
    status: NotifierStatus,
    backoff_attempt: u32,
    backoff_until: Option<DateTime<Utc>>,
}

struct Shared {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    timer_factory: Arc<dyn TimerFactory>,
    backoff: BackoffCalculator,
    batch_delay: Duration,
    max_queue_size: usize,
    flush_tx: mpsc::Sender<()>,
}

impl Shared {
    /// Arm the batch timer if none is pending. The callback only nudges the
    /// run loop; all real work happens there.
    fn arm_timer_locked(&self, state: &mut State, delay: Duration) {
        if state.timer.is_some() {
            return;
        }
        let flush_tx = self.flush_tx.clone();
        state.timer = Some(self.timer_factory.after(
            delay,
            Box::new(move || {
                let _ = flush_tx.try_send(());
            }),
        ));
    }
}

/// Cheap-clone handle for enqueueing and inspection. The paired
/// [`NotifierRunner`] owns the processing loop.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
    filter: FilterConfig,
    event_tx: mpsc::Sender<DerivedEvent>,
    stop_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
}

pub struct NotifierRunner {
    shared: Arc<Shared>,
    sender: Arc<dyn Sender>,
    event_rx: mpsc::Receiver<DerivedEvent>,
    flush_rx: mpsc::Receiver<()>,
    stop_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
}

impl Notifier {
    pub fn new(
        sender: Arc<dyn Sender>,
        batch_delay_secs: u32,
        filter: FilterConfig,
        options: NotifierOptions,
    ) -> (Notifier, NotifierRunner) {
        let batch_delay_secs = if batch_delay_secs == 0 {
            DEFAULT_BATCH_DELAY_SECS
        } else {
            batch_delay_secs
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: Vec::with_capacity(16),
                timer: None,
                status: NotifierStatus::default(),
                backoff_attempt: 0,
                backoff_until: None,
            }),
            clock: options.clock,
            timer_factory: options.timer_factory,
            backoff: BackoffCalculator::new(options.backoff),
            batch_delay: Duration::from_secs(batch_delay_secs as u64),
            max_queue_size: options.max_queue_size,
            flush_tx,
        });

        (
            Notifier {
                shared: shared.clone(),
                filter,
                event_tx,
                stop_tx: Arc::new(stop_tx),
                done_rx,
            },
            NotifierRunner {
                shared,
                sender,
                event_rx,
                flush_rx,
                stop_rx,
                done_tx,
            },
        )
    }

    /// Non-blocking enqueue. Disabled notifier and filtered-out events are
    /// discarded; a full channel drops with a warning rather than wedging
    /// the ingest hook.
    pub fn enqueue(&self, event: DerivedEvent) {
        if self.shared.state.lock().status.disabled {
            return;
        }
        if !self.should_notify(&event) {
            return;
        }
        if self.event_tx.try_send(event).is_err() {
            warn!("notification queue full, event dropped");
        }
    }

    fn should_notify(&self, event: &DerivedEvent) -> bool {
        match event {
            DerivedEvent::PlayerJoined { .. } => self.filter.notify_on_join,
            DerivedEvent::PlayerLeft { .. } => self.filter.notify_on_leave,
            DerivedEvent::WorldChanged { .. } => self.filter.notify_on_world_join,
        }
    }

    pub fn status(&self) -> NotifierStatus {
        self.shared.state.lock().status.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Idempotent; triggers a best-effort final flush and waits for the run
    /// loop to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|stopped| *stopped).await;
    }
}

impl NotifierRunner {
    /// Process enqueued events until stop or cancellation. Both exits run a
    /// final flush so a just-batched message is not lost on shutdown.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = self.flush_rx.recv() => self.flush().await,
                _ = self.stop_rx.changed() => {
                    self.flush().await;
                    break;
                }
                _ = cancel.changed() => {
                    self.flush().await;
                    break;
                }
            }
        }
        let _ = self.done_tx.send(true);
    }

    fn handle_event(&self, event: DerivedEvent) {
        let shared = &self.shared;
        let mut state = shared.state.lock();

        state.queue.push(event);
        coalesce(&mut state.queue);

        if state.queue.len() > shared.max_queue_size {
            let dropped = state.queue.len() - shared.max_queue_size;
            state.queue.drain(..dropped);
            warn!(dropped, "notification queue overflow, dropped oldest events");
        }

        shared.arm_timer_locked(&mut state, shared.batch_delay);
    }

    async fn flush(&self) {
        let shared = &self.shared;
        let events = {
            let mut state = shared.state.lock();
            state.timer = None;

            if state.queue.is_empty() {
                return;
            }

            // Inside a backoff window the batch stays queued; re-arm for the
            // remainder so the retry actually happens.
            let now = shared.clock.now();
            if let Some(until) = state.backoff_until {
                if now < until {
                    let remaining = (until - now)
                        .to_std()
                        .unwrap_or(shared.batch_delay);
                    debug!(
                        queue_size = state.queue.len(),
                        remaining_ms = remaining.as_millis() as u64,
                        "in backoff window, keeping events queued"
                    );
                    shared.arm_timer_locked(&mut state, remaining);
                    return;
                }
            }

            std::mem::take(&mut state.queue)
        };

        let payloads = build_payloads(&events);
        let mut failed = false;
        for payload in &payloads {
            let (result, retry_after) = self.sender.send(payload).await;
            self.handle_send_result(result, retry_after);
            if result != SendResult::Ok {
                failed = result == SendResult::Retryable;
                break;
            }
        }

        if failed {
            // Put the batch back so the retry resends it, coalesced with
            // anything that arrived meanwhile.
            let mut state = shared.state.lock();
            let mut queue = events;
            queue.append(&mut state.queue);
            state.queue = queue;
            coalesce(&mut state.queue);
            if let Some(until) = state.backoff_until {
                let remaining = (until - shared.clock.now())
                    .to_std()
                    .unwrap_or(shared.batch_delay);
                shared.arm_timer_locked(&mut state, remaining);
            }
        }
    }

    fn handle_send_result(&self, result: SendResult, retry_after: Option<Duration>) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let now = shared.clock.now();

        match result {
            SendResult::Ok => {
                state.backoff_attempt = 0;
                state.backoff_until = None;
            }
            SendResult::Retryable => {
                state.backoff_attempt += 1;
                let delay = retry_after
                    .unwrap_or_else(|| shared.backoff.calculate(state.backoff_attempt));
                state.backoff_until =
                    Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()));
                state.status.last_error = Some("delivery failed, backing off".to_string());
                warn!(
                    attempt = state.backoff_attempt,
                    delay_ms = delay.as_millis() as u64,
                    "webhook send failed, backing off"
                );
            }
            SendResult::Fatal => {
                state.status.disabled = true;
                state.status.disabled_reason =
                    "fatal error (invalid webhook or authentication failed)".to_string();
                state.status.disabled_at = Some(now);
                state.status.last_error = Some("fatal delivery error".to_string());
                error!("webhook send fatal error, notifications disabled");
            }
        }
    }
}

/// Keep at most one pending event per logical key, replacing older entries
/// in place so first-seen order of distinct keys is preserved.
fn coalesce(queue: &mut Vec<DerivedEvent>) {
    if queue.len() <= 1 {
        return;
    }

    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut result: Vec<DerivedEvent> = Vec::with_capacity(queue.len());

    for event in queue.drain(..) {
        let key = event_key(&event);
        match key {
            Some(key) => match seen.get(&key) {
                Some(&index) => result[index] = event,
                None => {
                    seen.insert(key, result.len());
                    result.push(event);
                }
            },
            None => result.push(event),
        }
    }

    *queue = result;
}

fn event_key(event: &DerivedEvent) -> Option<String> {
    match event {
        DerivedEvent::WorldChanged { .. } => Some("world".to_string()),
        DerivedEvent::PlayerJoined { event } | DerivedEvent::PlayerLeft { event } => {
            let key = event.player_key();
            if key.is_empty() {
                None
            } else {
                Some(format!("player:{key}"))
            }
        }
    }
}
