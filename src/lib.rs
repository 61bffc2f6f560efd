//! # beacon
//!
//! Keeps a Route 53 record pointed at the WAN address of a UniFi OS gateway.
//!
//! On every scheduler tick beacon logs in to the controller, reads the
//! gateway's uplink IP, compares it with the configured record and upserts
//! the record when they differ. After a successful upsert it can also tell
//! NextDNS about the new address.
//!
//! ## Usage
//!
//! ```bash
//! # Run the reconciler on its cron schedule
//! beacon daemon
//!
//! # Run a single reconciliation tick
//! beacon run-once
//!
//! # Show the controller's current uplink IP
//! beacon status
//! ```

pub mod build_info;
pub mod clients;
pub mod config;
pub mod error;
pub mod job;
pub mod scheduler;

pub use build_info::BuildInfo;
pub use config::Config;
pub use error::{BeaconError, Result};
pub use job::{ReconciliationJob, TickOutcome};
pub use scheduler::{ScheduledJob, Scheduler};
