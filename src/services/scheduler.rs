//! In-process periodic job scheduler
//!
//! One schedule per id. Each period the job runs once, when the flex window
//! opens (`interval - flex` after the period starts). A `Retry` outcome
//! re-runs the same cycle after an exponential backoff; `Success` and
//! `Failure` end the cycle. Cancelling stops future runs and pending retries
//! but never interrupts a run in progress.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const NETWORK_REPROBE_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Run the same cycle again after a backoff
    Retry,
    /// End the cycle without further attempts
    Failure,
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// `attempt` is 0 for the first invocation of a cycle
    async fn run(&self, attempt: u32) -> JobOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicSpec {
    pub interval: Duration,
    pub flex: Duration,
    /// Base delay; attempt `n` waits `retry_backoff * 2^n`
    pub retry_backoff: Duration,
    /// Address that must accept a TCP connection before a cycle runs
    pub network_check: Option<String>,
}

impl PeriodicSpec {
    fn window_opening(&self) -> Duration {
        self.interval.saturating_sub(self.flex)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Cancel the pending schedule and install the new one
    Replace,
    /// Leave a live schedule untouched
    Keep,
}

pub trait Scheduler: Send + Sync {
    fn enqueue_unique_periodic(
        &self,
        id: &str,
        spec: PeriodicSpec,
        policy: ExistingWorkPolicy,
        job: Arc<dyn Job>,
    );

    fn cancel(&self, id: &str);

    fn is_scheduled(&self, id: &str) -> bool;
}

struct ScheduleEntry {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduleEntry {
    fn is_live(&self) -> bool {
        !*self.cancel.borrow() && !self.handle.is_finished()
    }
}

/// Scheduler backed by tokio timers
#[derive(Default)]
pub struct TokioScheduler {
    entries: Mutex<FxHashMap<String, ScheduleEntry>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every schedule
    pub fn shutdown(&self) {
        for (id, entry) in self.entries.lock().drain() {
            let _ = entry.cancel.send(true);
            debug!(id = %id, "schedule_cancelled");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn enqueue_unique_periodic(
        &self,
        id: &str,
        spec: PeriodicSpec,
        policy: ExistingWorkPolicy,
        job: Arc<dyn Job>,
    ) {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(id) {
            if policy == ExistingWorkPolicy::Keep && existing.is_live() {
                debug!(id = %id, "schedule_kept");
                return;
            }
            let _ = existing.cancel.send(true);
        }

        info!(
            id = %id,
            job = %job.name(),
            interval_secs = %spec.interval.as_secs(),
            flex_secs = %spec.flex.as_secs(),
            network_check = ?spec.network_check,
            "schedule_enqueued"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_schedule(id.to_string(), spec, job, cancel_rx));
        entries.insert(id.to_string(), ScheduleEntry { cancel: cancel_tx, handle });
    }

    fn cancel(&self, id: &str) {
        if let Some(entry) = self.entries.lock().remove(id) {
            let _ = entry.cancel.send(true);
            info!(id = %id, "schedule_cancelled");
        }
    }

    fn is_scheduled(&self, id: &str) -> bool {
        self.entries.lock().get(id).is_some_and(ScheduleEntry::is_live)
    }
}

/// Sleep until `deadline`; false if cancelled first
async fn wait_until(cancel: &mut watch::Receiver<bool>, deadline: Instant) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = sleep_until(deadline) => !*cancel.borrow(),
        _ = cancel.changed() => false,
    }
}

/// True if `addr` accepts a TCP connection
pub async fn network_available(addr: &str) -> bool {
    matches!(timeout(NETWORK_PROBE_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Probe until the network is up or the period ends; false if cancelled or out of time
async fn wait_for_network(
    cancel: &mut watch::Receiver<bool>,
    addr: &str,
    period_end: Instant,
) -> bool {
    loop {
        if network_available(addr).await {
            return true;
        }
        let next_probe = Instant::now() + NETWORK_REPROBE_DELAY;
        if next_probe >= period_end {
            return false;
        }
        debug!(addr = %addr, "network_unavailable_reprobing");
        if !wait_until(cancel, next_probe).await {
            return false;
        }
    }
}

async fn run_schedule(
    id: String,
    spec: PeriodicSpec,
    job: Arc<dyn Job>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut period_start = Instant::now();

    loop {
        if !wait_until(&mut cancel, period_start + spec.window_opening()).await {
            break;
        }
        let period_end = period_start + spec.interval;

        let ready = match &spec.network_check {
            Some(addr) => wait_for_network(&mut cancel, addr, period_end).await,
            None => true,
        };
        if *cancel.borrow() {
            break;
        }

        if ready {
            run_cycle(&id, &spec, job.as_ref(), &mut cancel).await;
        } else {
            warn!(id = %id, "periodic_cycle_skipped_no_network");
        }

        // A cycle that overran its period starts the next one now
        period_start = period_end.max(Instant::now());
    }
    debug!(id = %id, "schedule_exited");
}

async fn run_cycle(
    id: &str,
    spec: &PeriodicSpec,
    job: &dyn Job,
    cancel: &mut watch::Receiver<bool>,
) {
    let mut attempt = 0u32;

    loop {
        if *cancel.borrow() {
            return;
        }
        // Not raced against cancel: an invocation always runs to completion
        let outcome = job.run(attempt).await;
        debug!(id = %id, attempt = %attempt, outcome = ?outcome, "job_invocation_finished");

        match outcome {
            JobOutcome::Success | JobOutcome::Failure => return,
            JobOutcome::Retry => {
                let backoff = spec.backoff(attempt);
                attempt += 1;
                info!(
                    id = %id,
                    attempt = %attempt,
                    backoff_secs = %backoff.as_secs(),
                    "job_retry_scheduled"
                );
                if !wait_until(cancel, Instant::now() + backoff).await {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Replays scripted outcomes and reports each invocation as (attempt, elapsed)
    struct ScriptedJob {
        outcomes: Mutex<VecDeque<JobOutcome>>,
        started: Instant,
        runs: mpsc::UnboundedSender<(u32, Duration)>,
        work: Duration,
    }

    impl ScriptedJob {
        fn new(
            outcomes: Vec<JobOutcome>,
            work: Duration,
        ) -> (Arc<Self>, mpsc::UnboundedReceiver<(u32, Duration)>) {
            let (runs, rx) = mpsc::unbounded_channel();
            let job = Self {
                outcomes: Mutex::new(outcomes.into()),
                started: Instant::now(),
                runs,
                work,
            };
            (Arc::new(job), rx)
        }
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, attempt: u32) -> JobOutcome {
            let _ = self.runs.send((attempt, self.started.elapsed()));
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.outcomes.lock().pop_front().unwrap_or(JobOutcome::Success)
        }
    }

    fn hourly() -> PeriodicSpec {
        PeriodicSpec {
            interval: Duration::from_secs(3600),
            flex: Duration::from_secs(900),
            retry_backoff: Duration::from_secs(30),
            network_check: None,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_backoff_doubles() {
        let spec = hourly();
        assert_eq!(spec.backoff(0), secs(30));
        assert_eq!(spec.backoff(1), secs(60));
        assert_eq!(spec.backoff(2), secs(120));
        assert_eq!(spec.window_opening(), secs(2700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period_at_window_opening() {
        let scheduler = TokioScheduler::new();
        let (job, mut runs) = ScriptedJob::new(vec![], Duration::ZERO);
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, job);

        assert_eq!(runs.recv().await.unwrap(), (0, secs(2700)));
        assert_eq!(runs.recv().await.unwrap(), (0, secs(6300)));
        assert!(scheduler.is_scheduled("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_and_attempt_counter() {
        let scheduler = TokioScheduler::new();
        let outcomes = vec![JobOutcome::Retry, JobOutcome::Retry, JobOutcome::Failure];
        let (job, mut runs) = ScriptedJob::new(outcomes, Duration::ZERO);
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, job);

        assert_eq!(runs.recv().await.unwrap(), (0, secs(2700)));
        assert_eq!(runs.recv().await.unwrap(), (1, secs(2730)));
        assert_eq!(runs.recv().await.unwrap(), (2, secs(2790)));
        // Next cycle starts over at attempt 0
        assert_eq!(runs.recv().await.unwrap(), (0, secs(6300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_future_runs() {
        let scheduler = TokioScheduler::new();
        let (job, mut runs) = ScriptedJob::new(vec![], Duration::ZERO);
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, job);

        scheduler.cancel("job");
        assert!(!scheduler.is_scheduled("job"));

        tokio::time::sleep(secs(3 * 3600)).await;
        assert!(runs.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_interrupt_running_invocation() {
        let scheduler = TokioScheduler::new();
        let (job, mut runs) =
            ScriptedJob::new(vec![JobOutcome::Retry, JobOutcome::Retry], secs(10));
        let probe = job.clone();
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, job);

        assert_eq!(runs.recv().await.unwrap().0, 0);
        scheduler.cancel("job");

        // The invocation finishes and consumes its outcome; the retry never happens
        tokio::time::sleep(secs(3600)).await;
        assert_eq!(probe.outcomes.lock().len(), 1);
        assert!(runs.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_policy_swaps_job() {
        let scheduler = TokioScheduler::new();
        let (first, mut first_runs) = ScriptedJob::new(vec![], Duration::ZERO);
        let (second, mut second_runs) = ScriptedJob::new(vec![], Duration::ZERO);

        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, first);
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Replace, second);

        assert_eq!(second_runs.recv().await.unwrap().0, 0);
        assert!(first_runs.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_policy_leaves_live_schedule() {
        let scheduler = TokioScheduler::new();
        let (first, mut first_runs) = ScriptedJob::new(vec![], Duration::ZERO);
        let (second, mut second_runs) = ScriptedJob::new(vec![], Duration::ZERO);

        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Keep, first);
        scheduler.enqueue_unique_periodic("job", hourly(), ExistingWorkPolicy::Keep, second);

        assert_eq!(first_runs.recv().await.unwrap().0, 0);
        assert!(second_runs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_network_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(network_available(&addr).await);

        drop(listener);
        assert!(!network_available(&addr).await);
    }
}
