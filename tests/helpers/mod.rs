//! Test doubles and builders shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory_dispatch::db::{JobFilter, MemoryStore, ReleasedUnit, StoreError, SubmissionStore};
use directory_dispatch::models::directory::DirectoryDescriptor;
use directory_dispatch::models::job::{BusinessProfile, Job, JobStatus};
use directory_dispatch::models::outcome::{CaptchaChallenge, CaptchaKind, Outcome};
use directory_dispatch::models::record::SubmissionResultRecord;
use directory_dispatch::models::summary::UnitCounts;
use directory_dispatch::models::unit::{Claim, SubmissionUnit, UnitTransition};
use directory_dispatch::services::captcha::{CaptchaSolver, SolverError};
use directory_dispatch::services::catalog::StaticCatalog;
use directory_dispatch::services::classifier::RetryPolicy;
use directory_dispatch::services::dispatcher::{Dispatcher, DispatcherConfig};
use directory_dispatch::services::queue::{JobQueueManager, QueuePolicy};
use directory_dispatch::services::worker::SubmissionWorker;
use uuid::Uuid;

/// Worker that replays scripted outcomes per directory. Once a directory's
/// script runs out it keeps returning the last outcome, and directories
/// without a script succeed.
#[derive(Default)]
pub struct ScriptedWorker {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, directory_id: &str, outcomes: Vec<Outcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(directory_id.to_string(), outcomes.into());
        self
    }

    /// Every call as (directory id, captcha token passed in).
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, directory_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(id, _)| id == directory_id)
            .count()
    }
}

#[async_trait]
impl SubmissionWorker for ScriptedWorker {
    async fn process(
        &self,
        _unit: &SubmissionUnit,
        _profile: &BusinessProfile,
        directory: &DirectoryDescriptor,
        captcha_token: Option<&str>,
    ) -> Outcome {
        self.calls
            .lock()
            .unwrap()
            .push((directory.id.clone(), captcha_token.map(str::to_string)));

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&directory.id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) if !script.is_empty() => script[0].clone(),
            _ => Outcome::success(Some(format!("https://{}.example/listing/1", directory.id)), 5),
        }
    }
}

/// Solver returning a fixed token or a fixed error.
pub struct MockSolver {
    result: Result<String, String>,
    calls: AtomicUsize,
}

impl MockSolver {
    pub fn solving(token: &str) -> Self {
        Self {
            result: Ok(token.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptchaSolver for MockSolver {
    async fn solve(&self, _challenge: &CaptchaChallenge) -> Result<String, SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(SolverError::Unsolved)
    }
}

pub fn challenge(directory_id: &str) -> CaptchaChallenge {
    CaptchaChallenge {
        kind: CaptchaKind::Recaptcha,
        site_key: Some("6Lc-test".to_string()),
        page_url: format!("https://{}.example/add", directory_id),
    }
}

/// Retry policy without backoff so retried units are eligible immediately.
pub fn no_backoff() -> RetryPolicy {
    RetryPolicy {
        backoff_base: Duration::ZERO,
        backoff_cap: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

pub fn test_policy() -> QueuePolicy {
    QueuePolicy {
        retry: no_backoff(),
        ..QueuePolicy::default()
    }
}

pub fn test_queue(
    directories: Vec<DirectoryDescriptor>,
    policy: QueuePolicy,
    solver_available: bool,
) -> (Arc<MemoryStore>, JobQueueManager) {
    let store = Arc::new(MemoryStore::new());
    let queue = JobQueueManager::new(
        store.clone(),
        Arc::new(StaticCatalog::new(directories)),
        policy,
        solver_available,
    );
    (store, queue)
}

/// Queue over any store, for tests that wrap the in-memory one.
pub fn queue_over(
    store: Arc<dyn SubmissionStore>,
    directories: Vec<DirectoryDescriptor>,
    policy: QueuePolicy,
) -> JobQueueManager {
    JobQueueManager::new(
        store,
        Arc::new(StaticCatalog::new(directories)),
        policy,
        false,
    )
}

pub fn test_dispatcher(
    queue: JobQueueManager,
    worker: Arc<dyn SubmissionWorker>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    slots: usize,
) -> Dispatcher {
    Dispatcher::new(
        queue,
        worker,
        solver,
        DispatcherConfig {
            worker_id: "test-worker".to_string(),
            slots,
            poll_interval: Duration::from_millis(10),
            sweep_interval: Duration::from_secs(60),
        },
    )
}

/// In-memory store with injectable delays and failures, for interleaving
/// staff operations with workers.
#[derive(Default)]
pub struct HookedStore {
    pub inner: MemoryStore,
    /// Pause after a unit is requeued, before the caller sees the result.
    pub requeue_delay: Duration,
    /// Pause before settling a job.
    pub settle_delay: Duration,
    /// Number of upcoming `cancel_job_units` calls that fail.
    pub failing_cancels: AtomicUsize,
}

#[async_trait]
impl SubmissionStore for HookedStore {
    async fn insert_job(&self, job: &Job, units: &[SubmissionUnit]) -> Result<(), StoreError> {
        self.inner.insert_job(job, units).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs(filter).await
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        from: &[JobStatus],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.update_job_status(job_id, status, from, now).await
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SubmissionUnit>, StoreError> {
        self.inner.get_unit(unit_id).await
    }

    async fn job_units(&self, job_id: Uuid) -> Result<Vec<SubmissionUnit>, StoreError> {
        self.inner.job_units(job_id).await
    }

    async fn claim_units(
        &self,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubmissionUnit>, StoreError> {
        self.inner.claim_units(worker_id, limit, now).await
    }

    async fn start_unit(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.start_unit(claim, now).await
    }

    async fn finish_unit(
        &self,
        claim: &Claim,
        transition: &UnitTransition,
        processing_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        self.inner
            .finish_unit(claim, transition, processing_time_ms, now)
            .await
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedUnit>, StoreError> {
        self.inner.release_stale(cutoff, now).await
    }

    async fn requeue_unit(
        &self,
        unit_id: Uuid,
        extra_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        let requeued = self.inner.requeue_unit(unit_id, extra_attempts, now).await;
        tokio::time::sleep(self.requeue_delay).await;
        requeued
    }

    async fn settle_job(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobStatus, UnitCounts)>, StoreError> {
        tokio::time::sleep(self.settle_delay).await;
        self.inner.settle_job(job_id, now).await
    }

    async fn cancel_job_units(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let fail = self
            .failing_cancels
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.cancel_job_units(job_id, now).await
    }

    async fn append_record(&self, record: &SubmissionResultRecord) -> Result<bool, StoreError> {
        self.inner.append_record(record).await
    }

    async fn unit_records(&self, unit_id: Uuid) -> Result<Vec<SubmissionResultRecord>, StoreError> {
        self.inner.unit_records(unit_id).await
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        self.inner.queue_depth().await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}
