//! Dispatch gateway - hands encoded messages to the outbound messaging channel
//!
//! The gateway validates the target, times the send and records the outcome.
//! It never retries; retry policy belongs to the callers.

use crate::domain::types::{DispatchTarget, EncodedMessage};
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Missing authorization on the channel (no retry)
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("malformed target: {0}")]
    MalformedTarget(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DispatchError::PermissionDenied(_))
    }
}

/// Outbound text-messaging primitive
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Short channel name for logs
    fn name(&self) -> &'static str;

    async fn send_text(&self, to: &str, body: &str) -> Result<(), DispatchError>;
}

/// Sends encoded messages over a messaging channel.
///
/// Cheap to clone. Concurrent sends from several producers are passed
/// straight through; serialization is the channel's business.
#[derive(Clone)]
pub struct DispatchGateway {
    channel: Arc<dyn MessagingChannel>,
    metrics: Arc<Metrics>,
}

impl DispatchGateway {
    pub fn new(channel: Arc<dyn MessagingChannel>, metrics: Arc<Metrics>) -> Self {
        Self { channel, metrics }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Send one message. An empty target is rejected without touching the channel.
    pub async fn send(
        &self,
        target: &DispatchTarget,
        payload: &EncodedMessage,
    ) -> Result<(), DispatchError> {
        if target.is_empty() {
            return Err(DispatchError::MalformedTarget("empty phone number".to_string()));
        }

        let start = Instant::now();
        let result = self.channel.send_text(target.phone_number(), payload.as_str()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => {
                self.metrics.record_dispatch_sent(latency_ms);
                info!(
                    channel = %self.channel.name(),
                    target = %target,
                    bytes = %payload.len(),
                    latency_ms = %latency_ms,
                    "dispatch_sent"
                );
            }
            Err(e) => {
                self.metrics.record_dispatch_failed();
                error!(
                    channel = %self.channel.name(),
                    target = %target,
                    latency_ms = %latency_ms,
                    error = %e,
                    "dispatch_failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording channel double shared by the service tests

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Records every send; pops scripted failures before succeeding
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<(String, String)>>,
        failures: Mutex<VecDeque<DispatchError>>,
        always_fail: Mutex<Option<DispatchError>>,
    }

    impl RecordingChannel {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn failing(error: DispatchError) -> Arc<Self> {
            let channel = Self::default();
            *channel.always_fail.lock() = Some(error);
            Arc::new(channel)
        }

        pub fn fail_next(&self, error: DispatchError) {
            self.failures.lock().push_back(error);
        }

        pub fn calls(&self) -> usize {
            self.sent.lock().len()
        }

        pub fn last_body(&self) -> Option<String> {
            self.sent.lock().last().map(|(_, body)| body.clone())
        }
    }

    #[async_trait]
    impl MessagingChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_text(&self, to: &str, body: &str) -> Result<(), DispatchError> {
            self.sent.lock().push((to.to_string(), body.to_string()));
            if let Some(e) = self.failures.lock().pop_front() {
                return Err(e);
            }
            if let Some(e) = self.always_fail.lock().clone() {
                return Err(e);
            }
            Ok(())
        }
    }
}
