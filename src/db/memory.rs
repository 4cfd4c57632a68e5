//! In-process store: an arena of jobs and units addressed by id.
//!
//! Each trait method runs inside one critical section, which gives the same
//! conditional-update semantics the Postgres store gets from row locks.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{JobFilter, ReleasedUnit, StoreError, SubmissionStore};
use crate::models::job::{Job, JobStatus};
use crate::models::record::SubmissionResultRecord;
use crate::models::summary::UnitCounts;
use crate::models::unit::{Claim, ErrorCategory, SubmissionUnit, UnitState, UnitTransition};

#[derive(Default)]
struct Arena {
    jobs: HashMap<Uuid, Job>,
    units: HashMap<Uuid, SubmissionUnit>,
    job_units: HashMap<Uuid, Vec<Uuid>>,
    records: BTreeMap<(Uuid, i32), SubmissionResultRecord>,
}

impl Arena {
    fn held_unit_mut(&mut self, claim: &Claim) -> Option<&mut SubmissionUnit> {
        self.units.get_mut(&claim.unit_id).filter(|unit| {
            unit.state.is_held()
                && unit.claimed_by.as_deref() == Some(claim.worker_id.as_str())
                && unit.attempt_count == claim.attempt_count
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    arena: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert_job(&self, job: &Job, units: &[SubmissionUnit]) -> Result<(), StoreError> {
        let mut arena = self.arena.lock().await;
        arena.jobs.insert(job.id, job.clone());
        arena
            .job_units
            .insert(job.id, units.iter().map(|u| u.id).collect());
        for unit in units {
            arena.units.insert(unit.id, unit.clone());
        }
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.arena.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let arena = self.arena.lock().await;
        let mut jobs: Vec<Job> = arena
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.tier
                .band()
                .cmp(&a.tier.band())
                .then(a.created_at.cmp(&b.created_at))
        });
        if let Some(limit) = filter.limit {
            jobs.truncate(limit.max(0) as usize);
        }
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        from: &[JobStatus],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut arena = self.arena.lock().await;
        match arena.jobs.get_mut(&job_id) {
            Some(job) if from.contains(&job.status) => {
                job.status = status;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SubmissionUnit>, StoreError> {
        Ok(self.arena.lock().await.units.get(&unit_id).cloned())
    }

    async fn job_units(&self, job_id: Uuid) -> Result<Vec<SubmissionUnit>, StoreError> {
        let arena = self.arena.lock().await;
        let mut units: Vec<SubmissionUnit> = arena
            .job_units
            .get(&job_id)
            .map(|ids| ids.iter().filter_map(|id| arena.units.get(id).cloned()).collect())
            .unwrap_or_default();
        units.sort_by_key(|u| u.position);
        Ok(units)
    }

    async fn claim_units(
        &self,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubmissionUnit>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut arena = self.arena.lock().await;

        let mut eligible: Vec<&SubmissionUnit> = arena
            .units
            .values()
            .filter(|u| u.state == UnitState::Queued && u.next_eligible_at <= now)
            .filter(|u| {
                arena
                    .jobs
                    .get(&u.job_id)
                    .is_some_and(|job| job.status != JobStatus::Cancelled)
            })
            .collect();
        eligible.sort_by(|a, b| SubmissionUnit::claim_order(a, b));
        let ids: Vec<Uuid> = eligible
            .into_iter()
            .take(limit as usize)
            .map(|u| u.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(unit) = arena.units.get_mut(&id) {
                unit.state = UnitState::Claimed;
                unit.claimed_by = Some(worker_id.to_string());
                unit.claimed_at = Some(now);
                unit.updated_at = now;
                claimed.push(unit.clone());
            }
        }
        for unit in &claimed {
            if let Some(job) = arena.jobs.get_mut(&unit.job_id) {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::InProgress;
                    job.updated_at = now;
                }
            }
        }
        Ok(claimed)
    }

    async fn start_unit(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut arena = self.arena.lock().await;
        match arena.held_unit_mut(claim) {
            Some(unit) if unit.state == UnitState::Claimed => {
                unit.state = UnitState::InProgress;
                unit.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_unit(
        &self,
        claim: &Claim,
        transition: &UnitTransition,
        processing_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        let mut arena = self.arena.lock().await;
        let Some(unit) = arena.held_unit_mut(claim) else {
            return Ok(None);
        };

        unit.state = transition.target_state();
        unit.attempt_count += 1;
        unit.last_error = transition.error();
        unit.processing_time_ms = Some(processing_time_ms);
        unit.claimed_by = None;
        unit.claimed_at = None;
        unit.updated_at = now;
        match transition {
            UnitTransition::Requeue {
                next_eligible_at, ..
            } => unit.next_eligible_at = *next_eligible_at,
            UnitTransition::Succeed { listing_url } => unit.listing_url = listing_url.clone(),
            UnitTransition::Fail { .. } | UnitTransition::Skip { .. } => {}
        }
        Ok(Some(unit.clone()))
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedUnit>, StoreError> {
        let mut arena = self.arena.lock().await;
        let mut released = Vec::new();
        for unit in arena.units.values_mut() {
            let stale = unit.state.is_held() && unit.claimed_at.is_some_and(|at| at < cutoff);
            if !stale {
                continue;
            }
            let previous_worker = unit.claimed_by.take().unwrap_or_default();
            unit.attempt_count += 1;
            unit.state = if unit.attempt_count >= unit.max_attempts {
                UnitState::Failed
            } else {
                UnitState::Queued
            };
            unit.last_error = Some(ErrorCategory::Abandoned);
            unit.claimed_at = None;
            unit.next_eligible_at = now;
            unit.updated_at = now;
            released.push(ReleasedUnit {
                unit: unit.clone(),
                previous_worker,
            });
        }
        Ok(released)
    }

    async fn requeue_unit(
        &self,
        unit_id: Uuid,
        extra_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        let mut guard = self.arena.lock().await;
        let arena = &mut *guard;
        let Some(unit) = arena.units.get_mut(&unit_id) else {
            return Ok(None);
        };
        let Some(job) = arena.jobs.get_mut(&unit.job_id) else {
            return Ok(None);
        };
        if job.status == JobStatus::Cancelled
            || !matches!(unit.state, UnitState::Failed | UnitState::Skipped)
        {
            return Ok(None);
        }

        unit.state = UnitState::Queued;
        unit.max_attempts = unit.attempt_count + extra_attempts;
        unit.next_eligible_at = now;
        unit.updated_at = now;
        if job.status.is_settled() {
            job.status = JobStatus::InProgress;
            job.updated_at = now;
        }
        Ok(Some(unit.clone()))
    }

    async fn settle_job(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobStatus, UnitCounts)>, StoreError> {
        let mut guard = self.arena.lock().await;
        let arena = &mut *guard;
        let Some(job) = arena.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::InProgress) {
            return Ok(None);
        }

        let units = &arena.units;
        let counts = UnitCounts::tally(
            arena
                .job_units
                .get(&job_id)
                .into_iter()
                .flatten()
                .filter_map(|id| units.get(id))
                .map(|unit| unit.state),
        );
        let Some(status) = counts.settled_status() else {
            return Ok(None);
        };
        job.status = status;
        job.updated_at = now;
        Ok(Some((status, counts)))
    }

    async fn cancel_job_units(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut arena = self.arena.lock().await;
        let ids = arena.job_units.get(&job_id).cloned().unwrap_or_default();
        let mut cancelled = 0;
        for id in ids {
            if let Some(unit) = arena.units.get_mut(&id) {
                if unit.state.is_terminal() {
                    continue;
                }
                unit.state = UnitState::Skipped;
                unit.last_error = Some(ErrorCategory::Cancelled);
                unit.claimed_by = None;
                unit.claimed_at = None;
                unit.updated_at = now;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn append_record(&self, record: &SubmissionResultRecord) -> Result<bool, StoreError> {
        let mut arena = self.arena.lock().await;
        let key = (record.unit_id, record.attempt_number);
        if arena.records.contains_key(&key) {
            return Ok(false);
        }
        arena.records.insert(key, record.clone());
        Ok(true)
    }

    async fn unit_records(&self, unit_id: Uuid) -> Result<Vec<SubmissionResultRecord>, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .records
            .range((unit_id, i32::MIN)..=(unit_id, i32::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        let arena = self.arena.lock().await;
        Ok(arena
            .units
            .values()
            .filter(|u| u.state == UnitState::Queued)
            .count() as i64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
