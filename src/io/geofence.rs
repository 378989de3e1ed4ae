//! Zone transition detection
//!
//! `SoftGeofence` derives enter/exit/dwell transitions from a low-power fix
//! subscription. Zones are keyed by id: registering an id again replaces its
//! definition, and releasing the last zone stops the fix subscription.

use crate::domain::types::{
    Coordinate, Direction, LocationFix, ZoneDefinition, ZoneTransitionEvent,
};
use crate::io::location::{LocationError, LocationProvider, LocationRequest, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeofenceError {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("geofencing unavailable: {0}")]
    Unavailable(String),
}

impl From<LocationError> for GeofenceError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::PermissionDenied => GeofenceError::PermissionDenied,
            LocationError::Unavailable(reason) => GeofenceError::Unavailable(reason),
        }
    }
}

/// How registered zones fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    /// Fire Enter when the first fix is already inside a zone
    pub initial_enter: bool,
    /// Fire Dwell after staying inside this long
    pub loitering_delay: Option<Duration>,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self { initial_enter: true, loitering_delay: None }
    }
}

#[async_trait]
pub trait ZoneTransitionDetector: Send + Sync {
    /// Register (or replace) zones and return the transition stream
    async fn register(
        &self,
        zones: Vec<ZoneDefinition>,
        policy: TriggerPolicy,
    ) -> Result<mpsc::Receiver<ZoneTransitionEvent>, GeofenceError>;

    /// Stop watching the given zone ids; unknown ids are ignored
    async fn release(&self, zone_ids: &[String]);
}

#[derive(Debug, Clone)]
pub(crate) struct ZoneState {
    def: ZoneDefinition,
    /// None until the first fix has been evaluated
    inside: Option<bool>,
    entered_at: Option<Instant>,
    dwell_reported: bool,
}

impl ZoneState {
    fn new(def: ZoneDefinition) -> Self {
        Self { def, inside: None, entered_at: None, dwell_reported: false }
    }
}

type ZoneRegistry = FxHashMap<String, ZoneState>;

/// Advance every zone with one fix and collect the transitions it caused
pub(crate) fn evaluate(
    zones: &mut ZoneRegistry,
    point: &Coordinate,
    now: Instant,
    policy: &TriggerPolicy,
) -> SmallVec<[ZoneTransitionEvent; 2]> {
    let mut events: SmallVec<[ZoneTransitionEvent; 2]> = SmallVec::new();

    for (id, state) in zones.iter_mut() {
        let contained = state.def.contains(point);
        let direction = match (state.inside, contained) {
            (None, true) => {
                state.entered_at = Some(now);
                policy.initial_enter.then_some(Direction::Enter)
            }
            (None, false) | (Some(false), false) => None,
            (Some(false), true) => {
                state.entered_at = Some(now);
                state.dwell_reported = false;
                Some(Direction::Enter)
            }
            (Some(true), false) => {
                state.entered_at = None;
                Some(Direction::Exit)
            }
            (Some(true), true) => match (policy.loitering_delay, state.entered_at) {
                (Some(delay), Some(entered)) if !state.dwell_reported && now - entered >= delay => {
                    state.dwell_reported = true;
                    Some(Direction::Dwell)
                }
                _ => None,
            },
        };
        state.inside = Some(contained);

        if let Some(direction) = direction {
            events.push(ZoneTransitionEvent::new(id, direction));
        }
    }

    events.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
    events
}

#[derive(Default)]
struct GeofenceInner {
    zones: ZoneRegistry,
    policy: TriggerPolicy,
    task: Option<JoinHandle<()>>,
}

/// Software geofence over a location provider
pub struct SoftGeofence {
    provider: Arc<dyn LocationProvider>,
    interval: Duration,
    inner: Arc<Mutex<GeofenceInner>>,
}

impl SoftGeofence {
    pub fn new(provider: Arc<dyn LocationProvider>, interval: Duration) -> Self {
        Self { provider, interval, inner: Arc::new(Mutex::new(GeofenceInner::default())) }
    }

    pub fn zone_count(&self) -> usize {
        self.inner.lock().zones.len()
    }

    async fn watch(
        inner: Arc<Mutex<GeofenceInner>>,
        mut fixes: mpsc::Receiver<LocationFix>,
        tx: mpsc::Sender<ZoneTransitionEvent>,
    ) {
        loop {
            let fix = tokio::select! {
                _ = tx.closed() => break,
                fix = fixes.recv() => match fix {
                    Some(fix) => fix,
                    None => {
                        warn!("geofence_fix_stream_ended");
                        break;
                    }
                },
            };

            let events = {
                let mut guard = inner.lock();
                let policy = guard.policy;
                evaluate(&mut guard.zones, &fix.coordinate, Instant::now(), &policy)
            };

            for event in events {
                debug!(zone = %event.zone_id, direction = %event.direction, "geofence_transition");
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl ZoneTransitionDetector for SoftGeofence {
    async fn register(
        &self,
        zones: Vec<ZoneDefinition>,
        policy: TriggerPolicy,
    ) -> Result<mpsc::Receiver<ZoneTransitionEvent>, GeofenceError> {
        let fixes = self.provider.subscribe(LocationRequest::balanced(self.interval)).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let mut guard = self.inner.lock();
        for def in zones {
            let changed = guard.zones.get(&def.id).map_or(true, |state| state.def != def);
            if changed {
                guard.zones.insert(def.id.clone(), ZoneState::new(def));
            }
        }
        guard.policy = policy;

        // One stream at a time; the newest registration owns it
        if let Some(task) = guard.task.take() {
            task.abort();
        }
        guard.task = Some(tokio::spawn(Self::watch(self.inner.clone(), fixes, tx)));

        info!(
            zones = %guard.zones.len(),
            initial_enter = %policy.initial_enter,
            "geofence_registered"
        );
        Ok(rx)
    }

    async fn release(&self, zone_ids: &[String]) {
        let mut guard = self.inner.lock();
        for id in zone_ids {
            guard.zones.remove(id);
        }
        if guard.zones.is_empty() {
            if let Some(task) = guard.task.take() {
                task.abort();
            }
        }
        info!(released = %zone_ids.len(), remaining = %guard.zones.len(), "geofence_released");
    }
}
