//! User-facing control surface
//!
//! Wires the foreground tracker, the preference store and the periodic job
//! schedule together. Store failures are reported as notices; the only
//! error returned to callers is malformed coordinate input.

use crate::domain::types::{Coordinate, CoordinateError};
use crate::infra::preferences::{
    read_or_default, PreferenceStore, PreferencesUpdate, UserPreferences,
};
use crate::io::notice::{Notice, Notifier};
use crate::services::periodic::PERIODIC_JOB_ID;
use crate::services::scheduler::{ExistingWorkPolicy, Job, PeriodicSpec, Scheduler};
use crate::services::tracker::{ForegroundTracker, TrackerState};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(#[from] CoordinateError),
}

pub struct TrackerCore {
    prefs: Arc<dyn PreferenceStore>,
    tracker: ForegroundTracker,
    scheduler: Arc<dyn Scheduler>,
    periodic_job: Arc<dyn Job>,
    periodic_spec: PeriodicSpec,
    notifier: Arc<dyn Notifier>,
}

impl TrackerCore {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        tracker: ForegroundTracker,
        scheduler: Arc<dyn Scheduler>,
        periodic_job: Arc<dyn Job>,
        periodic_spec: PeriodicSpec,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { prefs, tracker, scheduler, periodic_job, periodic_spec, notifier }
    }

    pub async fn start(&self) {
        self.tracker.start().await;
    }

    pub async fn stop(&self) {
        self.tracker.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.tracker.state().await == TrackerState::Running
    }

    pub async fn preferences(&self) -> UserPreferences {
        read_or_default(self.prefs.as_ref()).await
    }

    /// Persist the sharing flag and (un)schedule the periodic job to match
    pub async fn enable(&self, enabled: bool) {
        self.save(PreferencesUpdate::periodic_sharing(enabled), "sharing flag").await;
        if enabled {
            self.schedule_periodic();
            self.notifier.notify(Notice::info("Periodic sharing enabled"));
        } else {
            self.scheduler.cancel(PERIODIC_JOB_ID);
            self.notifier.notify(Notice::info("Periodic sharing disabled"));
        }
    }

    pub async fn disable(&self) {
        self.enable(false).await;
    }

    pub async fn update_contact_number(&self, number: &str) {
        if self.save(PreferencesUpdate::contact_number(number), "contact number").await {
            self.notifier.notify(Notice::info("Contact number saved"));
        }
    }

    pub async fn update_home_zone(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<(), ControlError> {
        let center = Coordinate::parse(latitude, longitude)?;
        if self.save(PreferencesUpdate::home_zone(center), "home zone").await {
            self.notifier.notify(Notice::info("Home location saved"));
        }
        Ok(())
    }

    pub async fn update_college_zone(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<(), ControlError> {
        let center = Coordinate::parse(latitude, longitude)?;
        if self.save(PreferencesUpdate::college_zone(center), "college zone").await {
            self.notifier.notify(Notice::info("College location saved"));
        }
        Ok(())
    }

    /// Reset every preference to its default and drop the periodic schedule
    pub async fn clear_preferences(&self) {
        self.scheduler.cancel(PERIODIC_JOB_ID);
        match self.prefs.clear().await {
            Ok(()) => {
                info!("preferences_cleared");
                self.notifier.notify(Notice::info("Preferences cleared"));
            }
            Err(e) => {
                error!(error = %e, "preferences_clear_failed");
                self.notifier.notify(Notice::warning(format!("Failed to clear preferences: {e}")));
            }
        }
    }

    /// Re-create the periodic schedule at boot if sharing was left on
    pub async fn resume(&self) {
        if self.preferences().await.periodic_sharing_enabled {
            info!("periodic_sharing_resumed");
            self.schedule_periodic();
        }
    }

    fn schedule_periodic(&self) {
        self.scheduler.enqueue_unique_periodic(
            PERIODIC_JOB_ID,
            self.periodic_spec.clone(),
            ExistingWorkPolicy::Replace,
            self.periodic_job.clone(),
        );
    }

    async fn save(&self, update: PreferencesUpdate, what: &str) -> bool {
        match self.prefs.write(update).await {
            Ok(()) => {
                info!(what = %what, "preferences_saved");
                true
            }
            Err(e) => {
                error!(what = %what, error = %e, "preferences_save_failed");
                self.notifier.notify(Notice::warning(format!("Failed to save {what}: {e}")));
                false
            }
        }
    }
}
