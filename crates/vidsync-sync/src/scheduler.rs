use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::pipeline::{CycleSummary, SyncCycle};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerReport {
    pub cycles: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs cycles back to back with a fixed pause in between. A failed cycle is
/// logged and the loop moves on to the next one.
pub struct IntervalScheduler<S = TokioSleeper> {
    interval: Duration,
    sleeper: S,
}

impl IntervalScheduler<TokioSleeper> {
    pub fn new(interval: Duration) -> Self {
        Self::with_sleeper(interval, TokioSleeper)
    }
}

impl<S: Sleeper> IntervalScheduler<S> {
    pub fn with_sleeper(interval: Duration, sleeper: S) -> Self {
        Self { interval, sleeper }
    }

    /// One cycle, with its error absorbed into the log.
    pub async fn tick(&self, cycle: &dyn SyncCycle) -> Option<CycleSummary> {
        match cycle.run_cycle().await {
            Ok(summary) => Some(summary),
            Err(err) => {
                error!(error = %format!("{err:#}"), "sync cycle failed; continuing with next cycle");
                None
            }
        }
    }

    /// Loops forever when `max_cycles` is `None`. No sleep follows the last
    /// bounded cycle.
    pub async fn run(&self, cycle: &dyn SyncCycle, max_cycles: Option<usize>) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        loop {
            report.cycles += 1;
            match self.tick(cycle).await {
                Some(_) => report.succeeded += 1,
                None => report.failed += 1,
            }

            if max_cycles.is_some_and(|max| report.cycles >= max) {
                return report;
            }
            info!(secs = self.interval.as_secs(), "sleeping until next cycle");
            self.sleeper.sleep(self.interval).await;
        }
    }
}

/// How `run` repeats cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleMode {
    Interval { max_cycles: Option<usize> },
    Cron(String),
}

impl ScheduleMode {
    /// A cron schedule has no notion of a cycle count, so the two are rejected
    /// together.
    pub fn resolve(cron: Option<&str>, max_cycles: Option<usize>) -> Result<Self> {
        match (cron, max_cycles) {
            (Some(cron), Some(_)) => {
                bail!("--max-cycles only applies to interval mode; unset VIDSYNC_CRON ({cron}) to use it")
            }
            (Some(cron), None) => Ok(Self::Cron(cron.to_string())),
            (None, max_cycles) => Ok(Self::Interval { max_cycles }),
        }
    }
}

/// Runs a cycle unless one is already in flight.
pub async fn run_exclusive(cycle: &dyn SyncCycle, gate: &Mutex<()>) -> Option<Result<CycleSummary>> {
    let Ok(_guard) = gate.try_lock() else {
        warn!("previous sync cycle still running; skipping this tick");
        return None;
    };
    Some(cycle.run_cycle().await)
}

/// Cron-driven alternative to [`IntervalScheduler`]. Ticks that arrive while a
/// cycle is running are skipped, so cycles never overlap.
pub async fn build_cron_scheduler(cycle: Arc<dyn SyncCycle>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let gate = Arc::new(Mutex::new(()));
    let job = Job::new_async(cron, move |_uuid, _l| {
        let cycle = Arc::clone(&cycle);
        let gate = Arc::clone(&gate);
        Box::pin(async move {
            match run_exclusive(cycle.as_ref(), &gate).await {
                Some(Ok(summary)) => info!(run_id = %summary.run_id, "scheduled sync finished"),
                Some(Err(err)) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                None => {}
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use anyhow::anyhow;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::pipeline::SnapshotDigest;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: StdMutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    /// Fails on the cycle numbers listed in `fail_on` (1-based).
    struct ScriptedCycle {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl ScriptedCycle {
        fn new(fail_on: &[usize]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: fail_on.to_vec(),
            }
        }
    }

    #[async_trait]
    impl SyncCycle for ScriptedCycle {
        async fn run_cycle(&self) -> Result<CycleSummary> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&n) {
                return Err(anyhow!("collection API returned 500"));
            }
            let now = Utc::now();
            Ok(CycleSummary {
                run_id: Uuid::new_v4(),
                started_at: now,
                finished_at: now,
                playlist_videos: 0,
                playlist_snapshot: None,
                collection_items: 0,
                collection_snapshot: SnapshotDigest {
                    path: "wix_data.csv".into(),
                    rows: 0,
                    bytes: 4,
                    sha256: String::new(),
                },
                missing: Vec::new(),
                inserted: Vec::new(),
                failed: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn bounded_run_sleeps_between_cycles_only() {
        let scheduler =
            IntervalScheduler::with_sleeper(Duration::from_secs(3600), RecordingSleeper::default());
        let cycle = ScriptedCycle::new(&[]);

        let report = scheduler.run(&cycle, Some(3)).await;
        assert_eq!(report.cycles, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            *scheduler.sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(3600); 2]
        );
    }

    #[tokio::test]
    async fn failed_cycle_does_not_stop_the_loop() {
        let scheduler =
            IntervalScheduler::with_sleeper(Duration::from_secs(5), RecordingSleeper::default());
        let cycle = ScriptedCycle::new(&[2]);

        let report = scheduler.run(&cycle, Some(4)).await;
        assert_eq!(report.cycles, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 3);
        assert_eq!(cycle.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn tick_absorbs_errors() {
        let scheduler = IntervalScheduler::with_sleeper(Duration::ZERO, RecordingSleeper::default());
        assert!(scheduler.tick(&ScriptedCycle::new(&[1])).await.is_none());
        assert!(scheduler.tick(&ScriptedCycle::new(&[])).await.is_some());
        assert!(scheduler.sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exclusive_run_skips_while_a_cycle_holds_the_gate() {
        let gate = Mutex::new(());
        let cycle = ScriptedCycle::new(&[]);

        let held = gate.lock().await;
        assert!(run_exclusive(&cycle, &gate).await.is_none());
        drop(held);

        assert!(matches!(run_exclusive(&cycle, &gate).await, Some(Ok(_))));
        assert_eq!(cycle.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn schedule_mode_rejects_cycle_cap_with_cron() {
        assert_eq!(
            ScheduleMode::resolve(None, Some(3)).expect("interval"),
            ScheduleMode::Interval { max_cycles: Some(3) }
        );
        assert_eq!(
            ScheduleMode::resolve(Some("0 0 * * * *"), None).expect("cron"),
            ScheduleMode::Cron("0 0 * * * *".into())
        );
        let err = ScheduleMode::resolve(Some("0 0 * * * *"), Some(3)).expect_err("conflict");
        assert!(err.to_string().contains("--max-cycles"));
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let cycle: Arc<dyn SyncCycle> = Arc::new(ScriptedCycle::new(&[]));
        assert!(build_cron_scheduler(cycle, "every hour please").await.is_err());
    }
}
