//! Scheduled task service — cron-style jobs that wake the agent.

pub mod service;
pub mod types;

pub use service::{CronService, OnJobFn};
pub use types::{
    CronJob, CronJobState, CronPayload, CronPayloadKind, CronSchedule, CronStore, JobStatus,
    ScheduleKind, compute_next_run_from,
};
