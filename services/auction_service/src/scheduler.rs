//! Clock/scheduler gateway.
//!
//! The engine never sleeps on its own: every future transition (auction
//! start, auction end, payment timeout) is handed to a [`CommandScheduler`]
//! as "deliver this command no earlier than time T".  Delivery is
//! at-least-once and unordered across command types; an armed command is
//! never unscheduled — a superseded one is neutralised by the state guards
//! in its handler.
//!
//! The in-process implementation backs each armed command with a tokio
//! timer and funnels due commands into a single mpsc queue drained by the
//! service dispatcher.  A durable deployment swaps in a delay-queue backed
//! implementation behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::commands::EngineCommand;

/// "Deliver `command` to the engine no earlier than `at`, at-least-once."
#[async_trait]
pub trait CommandScheduler: Send + Sync + 'static {
    async fn schedule(&self, at: DateTime<Utc>, command: EngineCommand);
}

/// Tokio-timer scheduler delivering into an in-process queue.
#[derive(Clone, Debug)]
pub struct TimerScheduler {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl TimerScheduler {
    /// Returns the scheduler plus the delivery queue the dispatcher drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl CommandScheduler for TimerScheduler {
    async fn schedule(&self, at: DateTime<Utc>, command: EngineCommand) {
        let tx = self.tx.clone();
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!(kind = command.kind(), due = %at, "command armed");
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(command).is_err() {
                tracing::debug!("delivery queue closed, dropping due command");
            }
        });
    }
}
