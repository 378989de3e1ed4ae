//! Location provider interface and the replay provider
//!
//! A subscription is an `mpsc` stream of fixes. Dropping the receiver ends
//! the subscription; providers stop producing once their sender is closed.

use crate::domain::types::{Coordinate, LocationFix};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Fixes buffered per subscription before the provider starts dropping
pub const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission not granted")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyTier {
    HighAccuracy,
    Balanced,
    LowPower,
}

/// Delivery cadence requested from a provider. The provider may deliver
/// less often than `interval`, never more often than `min_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRequest {
    pub priority: AccuracyTier,
    pub interval: Duration,
    pub min_interval: Duration,
}

impl LocationRequest {
    /// High accuracy, 60 s target, 30 s floor
    pub fn foreground() -> Self {
        Self {
            priority: AccuracyTier::HighAccuracy,
            interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(30),
        }
    }

    pub fn balanced(interval: Duration) -> Self {
        Self { priority: AccuracyTier::Balanced, interval, min_interval: interval / 2 }
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Start a fix stream at the requested cadence
    async fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError>;

    /// Best-effort last known fix; `None` when the provider has none
    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError>;
}

/// Parse a `lat,lon` line; blank lines and `#` comments yield None
pub fn parse_fix_line(line: &str) -> Option<Coordinate> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (lat, lon) = line.split_once(',')?;
    Coordinate::parse(lat, lon).ok()
}

/// Replays coordinates from a file, one fix per request interval, looping
/// at the end of the file.
pub struct ReplayLocationProvider {
    coordinates: Arc<Vec<Coordinate>>,
    last_fix: Arc<Mutex<Option<LocationFix>>>,
}

impl ReplayLocationProvider {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let coordinates = Self::parse(&content);
        if coordinates.is_empty() {
            anyhow::bail!("Replay file {} has no valid fixes", path.display());
        }
        info!(file = %path.display(), fixes = %coordinates.len(), "replay_provider_loaded");
        Ok(Self::new(coordinates))
    }

    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self { coordinates: Arc::new(coordinates), last_fix: Arc::new(Mutex::new(None)) }
    }

    fn parse(content: &str) -> Vec<Coordinate> {
        let mut coordinates = Vec::new();
        for (n, line) in content.lines().enumerate() {
            match parse_fix_line(line) {
                Some(c) => coordinates.push(c),
                None if line.trim().is_empty() || line.trim().starts_with('#') => {}
                None => warn!(line = %(n + 1), "replay_line_invalid"),
            }
        }
        coordinates
    }
}

#[async_trait]
impl LocationProvider for ReplayLocationProvider {
    async fn subscribe(
        &self,
        request: LocationRequest,
    ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
        if self.coordinates.is_empty() {
            return Err(LocationError::Unavailable("replay file is empty".to_string()));
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let coordinates = self.coordinates.clone();
        let last_fix = self.last_fix.clone();
        let period = request.interval.max(request.min_interval);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            for coordinate in coordinates.iter().cycle() {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                let fix = LocationFix::new(*coordinate);
                *last_fix.lock() = Some(fix.clone());
                if tx.send(fix).await.is_err() {
                    break;
                }
            }
            debug!("replay_subscription_closed");
        });

        Ok(rx)
    }

    async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
        if let Some(fix) = self.last_fix.lock().clone() {
            return Ok(Some(fix));
        }
        Ok(self.coordinates.first().map(|c| LocationFix::new(*c)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Hand-fed provider used by the service tests

    use super::*;

    /// Fixes are pushed by the test through `feed`
    #[derive(Default)]
    pub struct FeedLocationProvider {
        pub senders: Mutex<Vec<mpsc::Sender<LocationFix>>>,
        pub last: Mutex<Option<LocationFix>>,
        pub last_error: Mutex<Option<LocationError>>,
        pub subscribe_error: Mutex<Option<LocationError>>,
        pub requests: Mutex<Vec<LocationRequest>>,
    }

    impl FeedLocationProvider {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_last_known(coordinate: Coordinate) -> Arc<Self> {
            let provider = Self::default();
            *provider.last.lock() = Some(LocationFix::new(coordinate));
            Arc::new(provider)
        }

        /// Deliver a fix to every open subscription; returns how many accepted it
        pub fn feed(&self, coordinate: Coordinate) -> usize {
            let fix = LocationFix::new(coordinate);
            let mut senders = self.senders.lock();
            senders.retain(|tx| !tx.is_closed());
            senders.iter().filter(|tx| tx.try_send(fix.clone()).is_ok()).count()
        }

        pub fn open_subscriptions(&self) -> usize {
            let mut senders = self.senders.lock();
            senders.retain(|tx| !tx.is_closed());
            senders.len()
        }
    }

    #[async_trait]
    impl LocationProvider for FeedLocationProvider {
        async fn subscribe(
            &self,
            request: LocationRequest,
        ) -> Result<mpsc::Receiver<LocationFix>, LocationError> {
            if let Some(e) = self.subscribe_error.lock().clone() {
                return Err(e);
            }
            self.requests.lock().push(request);
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            self.senders.lock().push(tx);
            Ok(rx)
        }

        async fn last_known(&self) -> Result<Option<LocationFix>, LocationError> {
            if let Some(e) = self.last_error.lock().clone() {
                return Err(e);
            }
            Ok(self.last.lock().clone())
        }
    }
}
