//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `location` - Location provider interface and the file replay provider
//! - `gpsd` - gpsd client location provider
//! - `geofence` - Zone transition detection over a location provider
//! - `gateway` - Dispatch gateway and the messaging channel interface
//! - `sms_http` - HTTP SMS gateway channel
//! - `modem` - AT command SMS channel over a serial modem
//! - `outbox` - JSONL outbox channel for dry runs
//! - `notice` - Passive user-visible notices
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod gateway;
pub mod geofence;
pub mod gpsd;
pub mod location;
pub mod modem;
pub mod notice;
pub mod outbox;
pub mod prometheus;
pub mod sms_http;

// Re-export commonly used types
pub use gateway::{DispatchError, DispatchGateway, MessagingChannel};
pub use geofence::{GeofenceError, SoftGeofence, TriggerPolicy, ZoneTransitionDetector};
pub use gpsd::GpsdLocationProvider;
pub use location::{
    AccuracyTier, LocationError, LocationProvider, LocationRequest, ReplayLocationProvider,
};
pub use modem::ModemSmsChannel;
pub use notice::{ChannelNotifier, LogNotifier, Notice, NoticeLevel, Notifier};
pub use outbox::OutboxChannel;
pub use sms_http::HttpSmsChannel;
