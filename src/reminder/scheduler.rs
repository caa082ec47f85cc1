//! Alarm and notification seams, with tokio/tracing implementations.

use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Platform alarm: at most one pending alarm at a time.
pub trait AlarmScheduler: Send + Sync {
    /// Arm the alarm for `at`, replacing any pending one.
    fn schedule(&self, at: DateTime<FixedOffset>);

    fn cancel(&self);
}

/// Delivers the reminder to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes reminders to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title, "{}", body);
    }
}

/// Alarm backed by a tokio timer task. Firing sends the scheduled time on the
/// channel returned by `new`.
pub struct TokioAlarmScheduler {
    pending: Mutex<Option<JoinHandle<()>>>,
    fired: mpsc::UnboundedSender<DateTime<FixedOffset>>,
}

impl TokioAlarmScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DateTime<FixedOffset>>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: Mutex::new(None),
                fired,
            },
            rx,
        )
    }
}

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule(&self, at: DateTime<FixedOffset>) {
        let delay = (at.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or_default();
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(at);
        });

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
        tracing::info!("Reminder alarm set for {}", at);
    }

    fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
            tracing::info!("Reminder alarm cancelled");
        }
    }
}
