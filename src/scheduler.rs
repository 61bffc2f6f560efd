//! Cron-driven scheduler with a bounded worker pool.

use crate::config::SchedulerConfig;
use crate::error::{BeaconError, Result};
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Work the scheduler runs on every firing.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    /// Run once. Failures are the job's own business.
    async fn execute(&self);
}

/// Scheduler lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Started,
    Stopped,
}

/// Fires a [`ScheduledJob`] on a cron schedule.
///
/// The trigger holds each firing until one of `thread_pool_size` permits is
/// free, so at most that many ticks overlap and nothing queues behind them.
/// Firings that fall due while every permit is busy are coalesced into one.
pub struct Scheduler {
    job: Arc<dyn ScheduledJob>,
    schedule: Schedule,
    use_daemons: bool,
    permits: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
    shutdown: watch::Sender<bool>,
    trigger: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<tokio::sync::Mutex<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn ScheduledJob>, config: &SchedulerConfig) -> Result<Self> {
        let schedule = Schedule::from_str(&config.cron_expression)?;
        if config.thread_pool_size == 0 {
            return Err(BeaconError::Config(
                "scheduler.thread_pool_size must be at least 1".to_string(),
            ));
        }

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            job,
            schedule,
            use_daemons: config.use_daemons,
            permits: Arc::new(Semaphore::new(config.thread_pool_size)),
            state: Mutex::new(SchedulerState::Created),
            shutdown,
            trigger: Mutex::new(None),
            in_flight: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin firing. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BeaconError::Scheduler(format!("no async runtime: {}", e)))?;

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SchedulerState::Created {
                return Err(BeaconError::Scheduler(format!(
                    "cannot start a scheduler in state {:?}",
                    *state
                )));
            }
            *state = SchedulerState::Started;
        }

        let trigger = Trigger {
            job: self.job.clone(),
            schedule: self.schedule.clone(),
            permits: self.permits.clone(),
            in_flight: self.in_flight.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        let handle = runtime.spawn(trigger.run());
        *self.trigger.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            job = self.job.name(),
            permits = self.permits.available_permits(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop firing.
    ///
    /// A firing still waiting for a permit is dropped. Ticks already running
    /// are left to finish; unless `use_daemons` is set, this waits for them.
    pub async fn stop(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, SchedulerState::Stopped)
        };

        match previous {
            SchedulerState::Stopped => return Ok(()),
            SchedulerState::Created => {
                self.permits.close();
                return Ok(());
            }
            SchedulerState::Started => {}
        }

        self.shutdown.send_replace(true);
        self.permits.close();

        let trigger = self
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = trigger {
            if let Err(e) = handle.await {
                warn!("Scheduler trigger ended abnormally: {}", e);
            }
        }

        let mut in_flight = self.in_flight.lock().await;
        if self.use_daemons {
            in_flight.detach_all();
        } else {
            debug!("Waiting for {} in-flight tick(s)", in_flight.len());
            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    warn!("Tick ended abnormally: {}", e);
                }
            }
        }

        info!(job = self.job.name(), "Scheduler stopped");
        Ok(())
    }
}

struct Trigger {
    job: Arc<dyn ScheduledJob>,
    schedule: Schedule,
    permits: Arc<Semaphore>,
    in_flight: Arc<tokio::sync::Mutex<JoinSet<()>>>,
    shutdown: watch::Receiver<bool>,
}

impl Trigger {
    async fn run(mut self) {
        let mut last = Utc::now();

        loop {
            let from = last.max(Utc::now());
            let Some(next) = self.schedule.after(&from).next() else {
                info!("Cron schedule has no further firings");
                break;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.changed() => break,
            }
            if *self.shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.changed() => break,
            };
            if *self.shutdown.borrow() {
                break;
            }
            last = next;

            self.fire(permit).await;
        }
    }

    async fn fire(&self, permit: OwnedSemaphorePermit) {
        let mut in_flight = self.in_flight.lock().await;
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                warn!("Tick ended abnormally: {}", e);
            }
        }

        let job = self.job.clone();
        debug!(job = job.name(), "Firing");
        in_flight.spawn(async move {
            let _permit = permit;
            job.execute().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Instant};

    const EVERY_SECOND: &str = "* * * * * *";

    struct CountingJob {
        work: Duration,
        runs: AtomicUsize,
        finished: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl CountingJob {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                runs: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn execute(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            sleep(self.work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(pool: usize, use_daemons: bool) -> SchedulerConfig {
        SchedulerConfig {
            cron_expression: EVERY_SECOND.to_string(),
            thread_pool_size: pool,
            use_daemons,
        }
    }

    async fn wait_for_first_run(job: &CountingJob) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while job.runs() == 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
    }

    #[test]
    fn test_rejects_invalid_cron() {
        let mut config = config(1, true);
        config.cron_expression = "every five minutes".to_string();

        let result = Scheduler::new(CountingJob::new(Duration::ZERO), &config);
        assert!(matches!(result, Err(BeaconError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_pool() {
        let result = Scheduler::new(CountingJob::new(Duration::ZERO), &config(0, true));
        assert!(matches!(result, Err(BeaconError::Config(_))));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let scheduler = Scheduler::new(CountingJob::new(Duration::ZERO), &config(1, true)).unwrap();

        assert!(matches!(scheduler.start(), Err(BeaconError::Scheduler(_))));
        assert_eq!(scheduler.state(), SchedulerState::Created);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let scheduler = Scheduler::new(CountingJob::new(Duration::ZERO), &config(1, true)).unwrap();

        tokio_test::assert_ok!(scheduler.start());
        tokio_test::assert_err!(scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Started);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_then_start_fails() {
        let scheduler = Scheduler::new(CountingJob::new(Duration::ZERO), &config(1, true)).unwrap();

        tokio_test::assert_ok!(scheduler.stop().await);
        tokio_test::assert_ok!(scheduler.stop().await);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(matches!(scheduler.start(), Err(BeaconError::Scheduler(_))));
    }

    #[tokio::test]
    async fn test_fires_on_schedule() {
        let job = CountingJob::new(Duration::ZERO);
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await.unwrap();

        assert!(job.runs() >= 1);
    }

    #[tokio::test]
    async fn test_no_firings_after_stop() {
        let job = CountingJob::new(Duration::ZERO);
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        wait_for_first_run(&job).await;
        scheduler.stop().await.unwrap();
        let runs_at_stop = job.runs();

        sleep(Duration::from_millis(2000)).await;

        assert!(runs_at_stop >= 1);
        assert_eq!(job.runs(), runs_at_stop);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_tick() {
        let job = CountingJob::new(Duration::from_millis(1500));
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        wait_for_first_run(&job).await;
        scheduler.stop().await.unwrap();

        assert!(job.runs() >= 1);
        assert_eq!(job.finished.load(Ordering::SeqCst), job.runs());
    }

    #[tokio::test]
    async fn test_single_permit_serialises_ticks() {
        let job = CountingJob::new(Duration::from_millis(1500));
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        sleep(Duration::from_millis(4000)).await;
        scheduler.stop().await.unwrap();

        assert!(job.runs() >= 1);
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_larger_pool_allows_overlap() {
        // Ticks outlast three firings, so two of them must overlap.
        let job = CountingJob::new(Duration::from_millis(3000));
        let scheduler = Scheduler::new(job.clone(), &config(2, false)).unwrap();

        scheduler.start().unwrap();
        sleep(Duration::from_millis(4500)).await;
        scheduler.stop().await.unwrap();

        assert_eq!(job.max_active.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_ticks_do_not_build_a_backlog() {
        let job = CountingJob::new(Duration::from_millis(2500));
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        let mut most_in_flight = 0;
        let deadline = Instant::now() + Duration::from_secs(6);
        while Instant::now() < deadline {
            most_in_flight = most_in_flight.max(scheduler.in_flight.lock().await.len());
            sleep(Duration::from_millis(200)).await;
        }
        scheduler.stop().await.unwrap();

        // One running tick plus at most one finished tick not yet reaped.
        assert!(most_in_flight <= 2, "{} ticks in flight", most_in_flight);
        assert!(job.runs() <= 3, "{} runs in 6s", job.runs());
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_drops_firing_waiting_for_permit() {
        let job = CountingJob::new(Duration::from_millis(1500));
        let scheduler = Scheduler::new(job.clone(), &config(1, false)).unwrap();

        scheduler.start().unwrap();
        wait_for_first_run(&job).await;
        sleep(Duration::from_millis(1100)).await;
        scheduler.stop().await.unwrap();
        let runs_at_stop = job.runs();

        sleep(Duration::from_millis(1500)).await;

        assert_eq!(job.runs(), runs_at_stop);
        assert_eq!(job.finished.load(Ordering::SeqCst), runs_at_stop);
    }
}
