pub mod backoff;
pub mod notifier;
pub mod payload;
pub mod sender;
pub mod timer;

pub use crate::backoff::{BackoffConfig, BackoffCalculator};
pub use crate::notifier::{FilterConfig, Notifier, NotifierOptions, NotifierRunner, NotifierStatus};
pub use crate::payload::{WebhookEmbed, WebhookPayload};
pub use crate::sender::{SendResult, Sender, WebhookSender};
pub use crate::timer::{TimerFactory, TimerHandle, TokioTimerFactory};
