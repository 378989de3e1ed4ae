//! Foreground tracker
//!
//! While running, two workers consume two independent streams:
//! - location fixes, shared as coordinate reports when sharing is enabled
//! - zone transitions for HOME and COLLEGE, always reported to the contact
//!
//! Each worker reads preferences fresh for every item. Zone definitions are
//! captured once at `start`, so zone edits only apply on the next start.

mod handlers;

use crate::domain::types::{LocationFix, ZoneTransitionEvent, COLLEGE_ZONE_ID, HOME_ZONE_ID};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::preferences::{read_or_default, PreferenceStore};
use crate::io::geofence::{GeofenceError, TriggerPolicy, ZoneTransitionDetector};
use crate::io::location::{LocationError, LocationProvider, LocationRequest};
use crate::io::notice::{Notice, Notifier};
use crate::services::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Stopped,
    Running,
}

/// Subscription parameters fixed for the life of a tracker
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub location_request: LocationRequest,
    pub zone_radius_m: f64,
    pub trigger: TriggerPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            location_request: LocationRequest::foreground(),
            zone_radius_m: 1000.0,
            trigger: TriggerPolicy::default(),
        }
    }
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        let mut location_request = LocationRequest::foreground();
        location_request.interval = config.tracking_interval();
        location_request.min_interval = config.tracking_min_interval();
        Self {
            location_request,
            zone_radius_m: config.zone_radius_m(),
            trigger: TriggerPolicy {
                initial_enter: config.initial_trigger_enter(),
                loitering_delay: config.loitering_delay(),
            },
        }
    }
}

/// Everything a worker needs to turn an item into a dispatch
pub(crate) struct WorkerContext {
    pub(crate) prefs: Arc<dyn PreferenceStore>,
    pub(crate) pipeline: Pipeline,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) metrics: Arc<Metrics>,
}

struct RunningWorkers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct ForegroundTracker {
    ctx: Arc<WorkerContext>,
    location: Arc<dyn LocationProvider>,
    geofence: Arc<dyn ZoneTransitionDetector>,
    settings: TrackerSettings,
    /// `Some` while running; the lock also serializes start/stop
    running: Mutex<Option<RunningWorkers>>,
}

impl ForegroundTracker {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        location: Arc<dyn LocationProvider>,
        geofence: Arc<dyn ZoneTransitionDetector>,
        pipeline: Pipeline,
        notifier: Arc<dyn Notifier>,
        settings: TrackerSettings,
    ) -> Self {
        let metrics = pipeline.metrics().clone();
        Self {
            ctx: Arc::new(WorkerContext { prefs, pipeline, notifier, metrics }),
            location,
            geofence,
            settings,
            running: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> TrackerState {
        if self.running.lock().await.is_some() {
            TrackerState::Running
        } else {
            TrackerState::Stopped
        }
    }

    /// Open both subscriptions and spawn their workers. No-op when running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("tracker_already_running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(2);

        match self.location.subscribe(self.settings.location_request).await {
            Ok(fixes) => {
                let ctx = self.ctx.clone();
                let floor = self.settings.location_request.min_interval;
                let shutdown = shutdown_rx.clone();
                handles.push(tokio::spawn(run_location_worker(ctx, fixes, shutdown, floor)));
            }
            Err(LocationError::PermissionDenied) => {
                warn!("location_permission_denied");
                self.ctx.notifier.notify(Notice::warning("Location permission not granted"));
            }
            Err(e) => {
                error!(error = %e, "location_subscribe_failed");
                self.ctx.notifier.notify(Notice::warning(format!("Location updates failed: {e}")));
            }
        }

        let prefs = read_or_default(self.ctx.prefs.as_ref()).await;
        let zones = prefs.zones(self.settings.zone_radius_m);
        match self.geofence.register(zones, self.settings.trigger).await {
            Ok(events) => {
                self.ctx.notifier.notify(Notice::info("Zone monitoring registered"));
                let ctx = self.ctx.clone();
                handles.push(tokio::spawn(run_zone_worker(ctx, events, shutdown_rx)));
            }
            Err(GeofenceError::PermissionDenied) => {
                warn!("geofence_permission_denied");
                self.ctx.notifier.notify(Notice::warning("Location permission not granted"));
            }
            Err(e) => {
                error!(error = %e, "geofence_register_failed");
                self.ctx
                    .notifier
                    .notify(Notice::warning(format!("Zone monitoring failed: {e}")));
            }
        }

        info!(
            workers = %handles.len(),
            home = %prefs.home_zone,
            college = %prefs.college_zone,
            "tracker_started"
        );
        *running = Some(RunningWorkers { shutdown: shutdown_tx, handles });
    }

    /// Stop both workers, wait for them, then release the zones. No-op when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(workers) = running.take() else {
            debug!("tracker_not_running");
            return;
        };

        let _ = workers.shutdown.send(true);
        for handle in workers.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "tracker_worker_join_failed");
            }
        }

        self.geofence.release(&[HOME_ZONE_ID.to_string(), COLLEGE_ZONE_ID.to_string()]).await;
        info!("tracker_stopped");
    }
}

async fn run_location_worker(
    ctx: Arc<WorkerContext>,
    mut fixes: mpsc::Receiver<LocationFix>,
    mut shutdown: watch::Receiver<bool>,
    floor: Duration,
) {
    let mut last_handled: Option<Instant> = None;

    loop {
        let fix = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            fix = fixes.recv() => match fix {
                Some(fix) => fix,
                None => {
                    warn!("location_stream_ended");
                    break;
                }
            },
        };
        ctx.metrics.record_fix_received();

        let now = Instant::now();
        if last_handled.is_some_and(|t| now.duration_since(t) < floor) {
            ctx.metrics.record_fix_throttled();
            debug!(floor_secs = %floor.as_secs(), "fix_throttled");
            continue;
        }
        last_handled = Some(now);

        ctx.handle_fix(fix).await;
    }
    debug!("location_worker_exited");
}

async fn run_zone_worker(
    ctx: Arc<WorkerContext>,
    mut events: mpsc::Receiver<ZoneTransitionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("zone_stream_ended");
                    break;
                }
            },
        };
        ctx.handle_zone_event(event).await;
    }
    debug!("zone_worker_exited");
}
