//! Oxibot Cron — scheduled task service.
//!
//! This crate contains:
//! - **types**: schedule/payload/job-state types and on-disk store
//! - **service**: the async scheduler loop, persistence, and job API

pub mod service;
pub mod types;

pub use service::{CronService, CronServiceStatus, OnJobFn};
pub use types::{CronJob, CronPayload, CronSchedule, CronStore, JobStatus, ScheduleKind};
