//! morse-tracker library
//!
//! Turns location fixes and HOME/COLLEGE zone transitions into dot-dash
//! text messages for a configured contact.
//!
//! Module structure:
//! - `domain/` - Value types, report texts and the encoder
//! - `io/` - Location, geofence, messaging channels, notices, Prometheus
//! - `services/` - Pipeline, foreground tracker, periodic job, scheduler, control
//! - `infra/` - Config, preferences, metrics

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
