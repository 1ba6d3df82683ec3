use std::time::Duration;

/// Handle to a scheduled callback; `stop` cancels it if it has not fired.
pub trait TimerHandle: Send {
    fn stop(&self);
}

/// Schedules a callback to run once after a delay. Injectable so tests can
/// fire timers by hand instead of sleeping.
pub trait TimerFactory: Send + Sync {
    fn after(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle>;
}

pub struct TokioTimerFactory;

struct TokioTimerHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl TimerHandle for TokioTimerHandle {
    fn stop(&self) {
        self.handle.abort();
    }
}

impl TimerFactory for TokioTimerFactory {
    fn after(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> Box<dyn TimerHandle> {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Box::new(TokioTimerHandle { handle })
    }
}
