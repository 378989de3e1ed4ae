//! Report -> canonical text -> dot-dash payload -> dispatch
//!
//! Shared by the foreground tracker and the periodic job. Callers decide
//! what to do with failures; the pipeline never retries.

use crate::domain::morse::Encoder;
use crate::domain::report::Report;
use crate::domain::types::{DispatchTarget, EncodedMessage};
use crate::infra::metrics::Metrics;
use crate::io::gateway::{DispatchError, DispatchGateway};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// No contact number configured
    Skipped,
    /// The report has no canonical text (e.g. a dwell transition)
    NotReportable,
}

#[derive(Clone)]
pub struct Pipeline {
    encoder: Encoder,
    gateway: DispatchGateway,
}

impl Pipeline {
    pub fn new(encoder: Encoder, gateway: DispatchGateway) -> Self {
        Self { encoder, gateway }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.gateway.metrics()
    }

    pub fn encode(&self, report: &Report) -> Option<EncodedMessage> {
        report.canonical_text().map(|text| self.encoder.encode_message(&text))
    }

    pub async fn dispatch(
        &self,
        target: &DispatchTarget,
        report: &Report,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Some(payload) = self.encode(report) else {
            debug!(kind = %report.kind(), "report_not_reportable");
            return Ok(DispatchOutcome::NotReportable);
        };

        if target.is_empty() {
            self.gateway.metrics().record_dispatch_skipped();
            debug!(kind = %report.kind(), "dispatch_skipped_no_contact");
            return Ok(DispatchOutcome::Skipped);
        }

        self.gateway.send(target, &payload).await?;
        Ok(DispatchOutcome::Sent)
    }
}
