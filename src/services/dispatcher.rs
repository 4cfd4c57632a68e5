//! Worker pool: claims units, runs them through a worker and the classifier,
//! and commits the result. Also sweeps claims abandoned by dead workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::models::outcome::Outcome;
use crate::models::unit::ErrorCategory;
use crate::services::captcha::CaptchaSolver;
use crate::services::classifier::{self, AttemptContext, Decision};
use crate::services::queue::{ClaimedUnit, Completion, JobQueueManager, QueueError};
use crate::services::worker::SubmissionWorker;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_id: String,
    pub slots: usize,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            slots: 5,
            poll_interval: Duration::from_millis(1000),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: JobQueueManager,
    worker: Arc<dyn SubmissionWorker>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    config: Arc<DispatcherConfig>,
    slots: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        queue: JobQueueManager,
        worker: Arc<dyn SubmissionWorker>,
        solver: Option<Arc<dyn CaptchaSolver>>,
        config: DispatcherConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.slots.max(1)));
        Self {
            queue,
            worker,
            solver,
            config: Arc::new(config),
            slots,
        }
    }

    /// Claim and process units until `shutdown` resolves, then stop claiming
    /// and wait for in-flight units to finish.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = tokio::spawn(self.clone().sweep_loop(stop_rx));
        tokio::pin!(shutdown);

        tracing::info!(
            worker_id = %self.config.worker_id,
            slots = self.config.slots,
            "Dispatcher started"
        );

        loop {
            let first = tokio::select! {
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = &mut shutdown => break,
            };

            let mut permits = vec![first];
            while let Ok(permit) = self.slots.clone().try_acquire_owned() {
                permits.push(permit);
            }

            let claimed = match self
                .queue
                .claim_next(&self.config.worker_id, permits.len())
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim units, will retry");
                    Vec::new()
                }
            };

            if claimed.is_empty() {
                drop(permits);
                tracing::trace!("No eligible units, sleeping");
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => continue,
                    _ = &mut shutdown => break,
                }
            }

            for (claimed, permit) in claimed.into_iter().zip(permits) {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.run_slot(claimed, permit).await });
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Shutting down, waiting for in-flight units");
        let _ = stop_tx.send(true);
        let _ = sweeper.await;
        let _ = self.slots.acquire_many(self.config.slots.max(1) as u32).await;
        tracing::info!(worker_id = %self.config.worker_id, "Dispatcher stopped");
    }

    async fn run_slot(self, claimed: ClaimedUnit, permit: OwnedSemaphorePermit) {
        let unit_id = claimed.unit.id;
        if let Err(e) = self.process_unit(claimed).await {
            tracing::error!(unit_id = %unit_id, error = %e, "Unit processing failed");
        }
        drop(permit);
    }

    async fn sweep_loop(self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.queue.release_abandoned().await {
                        Ok(released) if !released.is_empty() => {
                            tracing::info!(released = released.len(), "Abandoned-claim sweep released units");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Abandoned-claim sweep failed"),
                    }
                    if let Ok(depth) = self.queue.queue_depth().await {
                        metrics::gauge!("submission_queue_depth").set(depth as f64);
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }

    /// Process claimed units until nothing is eligible. Returns how many
    /// attempts were committed.
    pub async fn drain(&self) -> Result<usize, QueueError> {
        let mut committed = 0;
        loop {
            let claimed = self
                .queue
                .claim_next(&self.config.worker_id, self.config.slots.max(1))
                .await?;
            if claimed.is_empty() {
                return Ok(committed);
            }

            let mut tasks = JoinSet::new();
            for unit in claimed {
                let dispatcher = self.clone();
                tasks.spawn(async move { dispatcher.process_unit(unit).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(Completion::Applied(_))) => committed += 1,
                    Ok(Ok(Completion::Stale)) => {}
                    Ok(Err(e)) => return Err(e),
                    Err(e) => tracing::error!(error = %e, "Unit task panicked"),
                }
            }
        }
    }

    /// Run one claimed unit to a committed decision.
    pub async fn process_unit(&self, claimed: ClaimedUnit) -> Result<Completion, QueueError> {
        let ClaimedUnit { unit, claim } = claimed;

        if !self.queue.start_unit(&claim).await? {
            tracing::debug!(unit_id = %unit.id, "Claim lost before start");
            return Ok(Completion::Stale);
        }

        let job = self.queue.get_job(unit.job_id).await?;
        let policy = &self.queue.policy().retry;
        let mut ctx = AttemptContext {
            attempt_count: claim.attempt_count,
            max_attempts: unit.max_attempts,
            captcha_attempts: 0,
            solver_available: self.solver.is_some(),
        };

        let Some(directory) = self.queue.catalog().get(&unit.directory_id) else {
            tracing::warn!(
                unit_id = %unit.id,
                directory_id = %unit.directory_id,
                "Directory no longer in catalog"
            );
            let decision = Decision::Failed {
                error: ErrorCategory::DirectoryDefunct,
            };
            return self.queue.complete_attempt(&claim, &decision, 0, 0).await;
        };

        let mut token: Option<String> = None;
        let mut duration_ms = 0;
        let decision = loop {
            let outcome = self
                .worker
                .process(&unit, &job.business_profile, &directory, token.as_deref())
                .await;
            duration_ms += outcome.duration_ms;

            let challenge = match classifier::classify(&outcome, &ctx, policy, Utc::now()) {
                Decision::RetryCaptcha { challenge } => challenge,
                decision => break decision,
            };
            let Some(solver) = &self.solver else {
                break Decision::Skipped {
                    error: ErrorCategory::CaptchaRequired,
                };
            };

            ctx.captcha_attempts += 1;
            match solver.solve(&challenge).await {
                Ok(solved) => {
                    tracing::debug!(
                        unit_id = %unit.id,
                        directory_id = %directory.id,
                        captcha_attempts = ctx.captcha_attempts,
                        "CAPTCHA solved, resubmitting"
                    );
                    token = Some(solved);
                }
                Err(e) => {
                    tracing::warn!(
                        unit_id = %unit.id,
                        directory_id = %directory.id,
                        error = %e,
                        "CAPTCHA solver failed"
                    );
                    let unsolved = Outcome::failure(ErrorCategory::CaptchaUnsolved, e.to_string(), 0);
                    break classifier::classify(&unsolved, &ctx, policy, Utc::now());
                }
            }
        };

        metrics::histogram!("submission_processing_seconds").record(duration_ms as f64 / 1000.0);

        let completion = self
            .queue
            .complete_attempt(&claim, &decision, duration_ms, ctx.captcha_attempts)
            .await?;

        match &completion {
            Completion::Applied(updated) => tracing::info!(
                unit_id = %unit.id,
                job_id = %unit.job_id,
                directory_id = %unit.directory_id,
                worker_id = %claim.worker_id,
                decision = decision.label(),
                state = %updated.state,
                attempt_count = updated.attempt_count,
                duration_ms,
                "Submission attempt committed"
            ),
            Completion::Stale => tracing::info!(
                unit_id = %unit.id,
                job_id = %unit.job_id,
                "Unit cancelled or released during attempt, outcome discarded"
            ),
        }
        Ok(completion)
    }
}
