//! Cooperative periodic job runner.
//!
//! One loop checks every job's due time on a short fixed cadence and runs
//! due jobs one after another on the calling task. A job's next due time is
//! taken from when it finished, so a slow run pushes its own schedule back
//! and missed periods are never replayed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Work run by the scheduler. Failures are the job's own business.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self);
}

/// Due-ness of a job at a given instant. A job is running only while `tick`
/// is awaiting it, so there is no running state to observe from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Due,
}

/// Stand-in deadline for periods too long to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct ScheduledJob {
    job: Box<dyn Job>,
    period: Duration,
    next_due: Instant,
}

impl ScheduledJob {
    fn state(&self, now: Instant) -> JobState {
        if now >= self.next_due {
            JobState::Due
        } else {
            JobState::Waiting
        }
    }
}

fn deadline_after(period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(period)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job` to run every `period`, first due one period from now.
    pub fn every(&mut self, period: Duration, job: Box<dyn Job>) -> &mut Self {
        tracing::info!(job = job.name(), ?period, "scheduled job");
        self.jobs.push(ScheduledJob {
            job,
            period,
            next_due: deadline_after(period),
        });
        self
    }

    /// Runs every job due at `now`, in registration order. Returns how many ran.
    pub async fn tick(&mut self, now: Instant) -> usize {
        let mut fired = 0;

        for scheduled in self.jobs.iter_mut() {
            if scheduled.state(now) != JobState::Due {
                continue;
            }

            tracing::debug!(job = scheduled.job.name(), "running due job");
            scheduled.job.run().await;

            scheduled.next_due = deadline_after(scheduled.period);
            tracing::debug!(
                job = scheduled.job.name(),
                next_due = ?scheduled.next_due,
                "job finished"
            );
            fired += 1;
        }

        fired
    }

    /// Ticks forever, sleeping `tick_interval` between checks.
    pub async fn run(&mut self, tick_interval: Duration) {
        loop {
            self.tick(Instant::now()).await;
            tokio::time::sleep(tick_interval).await;
        }
    }
}
