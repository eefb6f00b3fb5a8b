//! Sync orchestration: config, reconciliation, the per-cycle pipeline and the
//! schedulers that repeat it.

pub mod config;
pub mod pipeline;
pub mod reconcile;
pub mod scheduler;

pub use config::{MissingSnapshotPolicy, SyncConfig};
pub use pipeline::{CycleSummary, SnapshotDigest, SyncCycle, SyncPipeline};
pub use reconcile::{missing_ids, FailedInsert, LoadedSnapshots, ReconcileReport, Reconciler};
pub use scheduler::{
    build_cron_scheduler, run_exclusive, IntervalScheduler, ScheduleMode, SchedulerReport, Sleeper,
    TokioSleeper,
};

pub const CRATE_NAME: &str = "vidsync-sync";

/// Builds a pipeline from the process environment.
pub fn pipeline_from_env() -> anyhow::Result<SyncPipeline> {
    SyncPipeline::new(SyncConfig::from_env()?)
}
