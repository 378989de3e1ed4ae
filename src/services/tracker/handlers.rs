//! Per-item handlers for the tracker workers
//!
//! Failures end here as notices. Nothing is retried: the next fix or
//! transition is handled on its own.

use super::WorkerContext;
use crate::domain::report::Report;
use crate::domain::types::{LocationFix, ZoneTransitionEvent};
use crate::infra::preferences::read_or_default;
use crate::io::notice::Notice;
use crate::services::pipeline::DispatchOutcome;
use tracing::{debug, info};

impl WorkerContext {
    /// Share a fix with the contact if periodic sharing is on
    pub(crate) async fn handle_fix(&self, fix: LocationFix) {
        let prefs = read_or_default(self.prefs.as_ref()).await;
        if !prefs.periodic_sharing_enabled {
            debug!("fix_ignored_sharing_disabled");
            return;
        }

        let report = Report::Coordinate(fix.coordinate);
        match self.pipeline.dispatch(&prefs.target(), &report).await {
            Ok(DispatchOutcome::Sent) => {
                info!(coordinate = %fix.coordinate, "location_shared");
                self.notifier.notify(Notice::info(report.notice_text()));
            }
            Ok(_) => {}
            Err(e) => {
                self.notifier.notify(Notice::warning(format!("Failed to share location: {e}")));
            }
        }
    }

    /// Report a zone transition regardless of the sharing flag
    pub(crate) async fn handle_zone_event(&self, event: ZoneTransitionEvent) {
        self.metrics.record_zone_event();
        let prefs = read_or_default(self.prefs.as_ref()).await;

        let report = Report::Zone(event);
        match self.pipeline.dispatch(&prefs.target(), &report).await {
            Ok(DispatchOutcome::Sent) => {
                info!(notice = %report.notice_text(), "zone_event_dispatched");
                self.notifier.notify(Notice::info(report.notice_text()));
            }
            Ok(DispatchOutcome::Skipped) => debug!("zone_event_no_contact"),
            Ok(DispatchOutcome::NotReportable) => {}
            Err(e) => {
                self.notifier.notify(Notice::warning(format!("Failed to send zone alert: {e}")));
            }
        }
    }
}
