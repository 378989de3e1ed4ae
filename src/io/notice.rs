//! Passive user-visible notices
//!
//! Failures and confirmations are reported here instead of being raised to
//! callers. A UI layer drains a `ChannelNotifier`; the daemon logs them.

use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!(message = %notice.message, "notice"),
            NoticeLevel::Warning => warn!(message = %notice.message, "notice"),
        }
    }
}

/// Forwards notices to a bounded channel.
/// Non-blocking - if the channel is full, notices are dropped.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notice>,
}

impl ChannelNotifier {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // Use try_send to avoid blocking - drop if channel full
        let _ = self.tx.try_send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_drops_when_full() {
        let (notifier, mut rx) = ChannelNotifier::new(1);
        notifier.notify(Notice::info("first"));
        notifier.notify(Notice::warning("second"));

        assert_eq!(rx.try_recv().unwrap(), Notice::info("first"));
        assert!(rx.try_recv().is_err());
    }
}
