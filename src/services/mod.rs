//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `pipeline` - Report encoding and dispatch shared by both producers
//! - `tracker` - Foreground tracker (location and zone-transition workers)
//! - `periodic` - Background periodic location job
//! - `scheduler` - Periodic job scheduler with bounded retry
//! - `control` - User-facing control surface

pub mod control;
pub mod periodic;
pub mod pipeline;
pub mod scheduler;
pub mod tracker;

// Re-export commonly used types
pub use control::{ControlError, TrackerCore};
pub use periodic::{periodic_spec, PeriodicLocationJob, PERIODIC_JOB_ID};
pub use pipeline::{DispatchOutcome, Pipeline};
pub use scheduler::{ExistingWorkPolicy, Job, JobOutcome, PeriodicSpec, Scheduler, TokioScheduler};
pub use tracker::{ForegroundTracker, TrackerSettings, TrackerState};
