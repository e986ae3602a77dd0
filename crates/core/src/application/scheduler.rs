//! Scheduler - turns recurring schedules into job insertions
//!
//! Delayed and retried jobs need no promotion: the lease query only hands out
//! jobs whose `not_before` has passed. This component only handles recurring
//! schedules (cron or fixed interval).
//!
//! Each due schedule is fired through `ScheduleStore::fire`, which advances the
//! watermark with a compare-and-swap and inserts the job in one transaction, so
//! concurrent ticks (or several engine instances) never fire an occurrence twice.

use crate::application::worker::ShutdownToken;
use crate::error::Result;
use crate::port::{IdProvider, ScheduleStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

pub struct Scheduler {
    schedule_store: Arc<dyn ScheduleStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Scheduler {
    pub fn new(
        schedule_store: Arc<dyn ScheduleStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            schedule_store,
            id_provider,
            time_provider,
        }
    }

    /// Fire every due schedule once. Returns the number of jobs inserted.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let due = self.schedule_store.due_schedules(now).await?;
        let mut fired = 0;

        for schedule in due {
            let next_run_at = match schedule.advance(now) {
                Ok(next) => next,
                Err(e) => {
                    error!(schedule = %schedule.name, error = %e, "Cannot compute next run");
                    continue;
                }
            };
            let job = schedule.spawn_job(self.id_provider.generate_id(), now);

            let fired_job = match self.schedule_store.fire(&schedule, next_run_at, &job).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(schedule = %schedule.name, error = %e, "Failed to fire schedule");
                    continue;
                }
            };
            match fired_job {
                Some(job_id) => {
                    fired += 1;
                    info!(
                        schedule = %schedule.name,
                        job_id = %job_id,
                        task_name = %schedule.task_name,
                        occurrence = schedule.next_run_at,
                        next_run_at = next_run_at,
                        "Recurring schedule fired"
                    );
                }
                None => {
                    debug!(
                        schedule = %schedule.name,
                        occurrence = schedule.next_run_at,
                        "Occurrence already fired elsewhere"
                    );
                }
            }
        }
        Ok(fired)
    }

    /// Tick every `period` until shutdown
    pub async fn run(&self, period: Duration, mut shutdown: ShutdownToken) {
        info!(period_ms = period.as_millis() as u64, "Scheduler started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
        info!("Scheduler stopped");
    }
}
