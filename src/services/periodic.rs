//! Background periodic location sharing job

use crate::domain::report::Report;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::preferences::{read_or_default, PreferenceStore};
use crate::io::location::{LocationError, LocationProvider};
use crate::io::notice::{Notice, Notifier};
use crate::services::pipeline::{DispatchOutcome, Pipeline};
use crate::services::scheduler::{Job, JobOutcome, PeriodicSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Stable schedule id; re-enqueueing under it replaces the pending schedule
pub const PERIODIC_JOB_ID: &str = "periodic_location_update";

/// Attempts per cycle, counting the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Hourly, 15 min flex, gated on the configured network probe
pub fn periodic_spec(config: &Config) -> PeriodicSpec {
    PeriodicSpec {
        interval: config.periodic_interval(),
        flex: config.periodic_flex(),
        retry_backoff: config.periodic_retry_backoff(),
        network_check: config.network_check_addr().map(str::to_string),
    }
}

pub struct PeriodicLocationJob {
    prefs: Arc<dyn PreferenceStore>,
    location: Arc<dyn LocationProvider>,
    pipeline: Pipeline,
    notifier: Arc<dyn Notifier>,
    last_fix_timeout: Duration,
    max_attempts: u32,
}

impl PeriodicLocationJob {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        location: Arc<dyn LocationProvider>,
        pipeline: Pipeline,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            prefs,
            location,
            pipeline,
            notifier,
            last_fix_timeout: Duration::from_secs(30),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_last_fix_timeout(mut self, last_fix_timeout: Duration) -> Self {
        self.last_fix_timeout = last_fix_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn metrics(&self) -> &Arc<Metrics> {
        self.pipeline.metrics()
    }

    fn fail(&self, message: String) -> JobOutcome {
        self.metrics().record_periodic_failure();
        self.notifier.notify(Notice::warning(message));
        JobOutcome::Failure
    }
}

#[async_trait]
impl Job for PeriodicLocationJob {
    fn name(&self) -> &'static str {
        PERIODIC_JOB_ID
    }

    async fn run(&self, attempt: u32) -> JobOutcome {
        self.metrics().record_periodic_run();

        let prefs = read_or_default(self.prefs.as_ref()).await;
        let target = prefs.target();
        if !prefs.periodic_sharing_enabled || target.is_empty() {
            debug!(enabled = %prefs.periodic_sharing_enabled, "periodic_share_skipped");
            return JobOutcome::Success;
        }

        let fix = match timeout(self.last_fix_timeout, self.location.last_known()).await {
            Ok(Ok(Some(fix))) => fix,
            Ok(Ok(None)) => {
                debug!("periodic_no_last_fix");
                return JobOutcome::Success;
            }
            Ok(Err(LocationError::PermissionDenied)) => {
                return self.fail("Location permission not granted".to_string());
            }
            Ok(Err(e)) => {
                debug!(error = %e, "periodic_location_unavailable");
                return JobOutcome::Success;
            }
            Err(_) => {
                warn!(timeout_secs = %self.last_fix_timeout.as_secs(), "periodic_last_fix_timeout");
                return JobOutcome::Success;
            }
        };

        let report = Report::Coordinate(fix.coordinate);
        match self.pipeline.dispatch(&target, &report).await {
            Ok(DispatchOutcome::Sent) => {
                info!(coordinate = %fix.coordinate, attempt = %attempt, "periodic_location_shared");
                JobOutcome::Success
            }
            Ok(_) => JobOutcome::Success,
            Err(e) if e.is_permission_denied() => {
                self.fail(format!("Messaging not permitted: {e}"))
            }
            Err(e) => {
                let attempts_made = attempt + 1;
                if attempts_made < self.max_attempts {
                    self.metrics().record_periodic_retry();
                    warn!(attempts = %attempts_made, error = %e, "periodic_dispatch_retry");
                    JobOutcome::Retry
                } else {
                    self.fail(format!(
                        "Periodic location update failed after {attempts_made} attempts: {e}"
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::morse::{encode, Encoder};
    use crate::domain::types::{Coordinate, LocationFix};
    use crate::infra::preferences::{MemoryPreferenceStore, UserPreferences};
    use crate::io::gateway::testing::RecordingChannel;
    use crate::io::gateway::{DispatchError, DispatchGateway};
    use crate::io::location::testing::FeedLocationProvider;
    use crate::io::notice::{ChannelNotifier, NoticeLevel};
    use tokio::sync::mpsc;

    struct StalledProvider;

    #[async_trait]
    impl LocationProvider for StalledProvider {
        async fn subscribe(
            &self,
            _request: crate::io::location::LocationRequest,
        ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
            Err(LocationError::Unavailable("stalled".to_string()))
        }

        async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
            std::future::pending().await
        }
    }

    fn prefs(contact: &str, sharing: bool) -> Arc<MemoryPreferenceStore> {
        Arc::new(MemoryPreferenceStore::with_preferences(UserPreferences {
            contact_number: contact.to_string(),
            periodic_sharing_enabled: sharing,
            ..UserPreferences::default()
        }))
    }

    fn job(
        prefs: Arc<MemoryPreferenceStore>,
        location: Arc<dyn LocationProvider>,
        channel: Arc<RecordingChannel>,
    ) -> (PeriodicLocationJob, mpsc::Receiver<Notice>) {
        let (notifier, notices) = ChannelNotifier::new(16);
        let gateway = DispatchGateway::new(channel, Arc::new(Metrics::new()));
        let job = PeriodicLocationJob::new(
            prefs,
            location,
            Pipeline::new(Encoder::standard(), gateway),
            Arc::new(notifier),
        );
        (job, notices)
    }

    fn home() -> Coordinate {
        Coordinate::new(37.422, -122.084).unwrap()
    }

    #[tokio::test]
    async fn test_sharing_disabled_is_success_without_dispatch() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::with_last_known(home());
        let (job, _notices) = job(prefs("+15551234", false), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Success);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_contact_is_success_without_dispatch() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::with_last_known(home());
        let (job, _notices) = job(prefs("  ", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Success);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_shares_last_known_fix() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::with_last_known(home());
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Success);
        let sent = channel.sent.lock().clone();
        assert_eq!(sent, vec![("+15551234".to_string(), encode("LAT 37.422000 LON -122.084000"))]);
    }

    #[tokio::test]
    async fn test_no_fix_is_success() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::new();
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Success);
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_fix_wait_is_bounded() {
        let channel = RecordingChannel::new();
        let location = Arc::new(StalledProvider);
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());
        let job = job.with_last_fix_timeout(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        assert_eq!(job.run(0).await, JobOutcome::Success);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(channel.calls(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_end_on_third_attempt() {
        let channel = RecordingChannel::failing(DispatchError::Unavailable("no signal".into()));
        let location = FeedLocationProvider::with_last_known(home());
        let (job, mut notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Retry);
        assert_eq!(job.run(1).await, JobOutcome::Retry);
        assert_eq!(job.run(2).await, JobOutcome::Failure);
        assert_eq!(channel.calls(), 3);

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert!(notice.message.contains("after 3 attempts"));

        let summary = job.metrics().report();
        assert_eq!(summary.periodic_runs, 3);
        assert_eq!(summary.periodic_retries, 2);
        assert_eq!(summary.periodic_failures, 1);
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let channel = RecordingChannel::new();
        channel.fail_next(DispatchError::Transport("timeout".into()));
        let location = FeedLocationProvider::with_last_known(home());
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Retry);
        assert_eq!(job.run(1).await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_location_permission_denied_aborts() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::new();
        *location.last_error.lock() = Some(LocationError::PermissionDenied);
        let (job, mut notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Failure);
        assert_eq!(channel.calls(), 0);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice, Notice::warning("Location permission not granted"));
    }

    #[tokio::test]
    async fn test_location_unavailable_is_benign() {
        let channel = RecordingChannel::new();
        let location = FeedLocationProvider::new();
        *location.last_error.lock() = Some(LocationError::Unavailable("gps off".into()));
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_channel_permission_denied_is_not_retried() {
        let channel = RecordingChannel::failing(DispatchError::PermissionDenied("sms".into()));
        let location = FeedLocationProvider::with_last_known(home());
        let (job, _notices) = job(prefs("+15551234", true), location, channel.clone());

        assert_eq!(job.run(0).await, JobOutcome::Failure);
        assert_eq!(channel.calls(), 1);
    }
}
