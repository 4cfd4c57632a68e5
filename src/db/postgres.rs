use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::store::{JobFilter, ReleasedUnit, StoreError, SubmissionStore};
use crate::models::job::{BusinessProfile, Job, JobStatus};
use crate::models::record::SubmissionResultRecord;
use crate::models::summary::UnitCounts;
use crate::models::unit::{Claim, SubmissionUnit, UnitState, UnitTransition};

const JOB_COLUMNS: &str = "id, customer_id, tier, directory_limit, status, business_profile, \
                           created_at, updated_at";

const UNIT_COLUMNS: &str = "id, job_id, directory_id, position, priority_band, job_created_at, \
                            state, attempt_count, max_attempts, last_error, next_eligible_at, \
                            listing_url, processing_time_ms, claimed_by, claimed_at, updated_at";

const UNIT_COLUMNS_U: &str = "u.id, u.job_id, u.directory_id, u.position, u.priority_band, \
                              u.job_created_at, u.state, u.attempt_count, u.max_attempts, \
                              u.last_error, u.next_eligible_at, u.listing_url, \
                              u.processing_time_ms, u.claimed_by, u.claimed_at, u.updated_at";

const RECORD_COLUMNS: &str = "unit_id, job_id, attempt_number, outcome, error_category, \
                              listing_url, duration_ms, captcha_solves, worker_id, recorded_at";

/// Postgres-backed store. Claims use `FOR UPDATE SKIP LOCKED` so concurrent
/// workers never block on, or double-claim, the same row.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T: FromStr>(value: &str, column: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown {} value '{}'", column, value)))
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let tier: String = row.try_get("tier")?;
    let status: String = row.try_get("status")?;
    let Json(business_profile): Json<BusinessProfile> = row.try_get("business_profile")?;

    Ok(Job {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        tier: parse_enum(&tier, "tier")?,
        directory_limit: row.try_get("directory_limit")?,
        status: parse_enum(&status, "status")?,
        business_profile,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn unit_from_row(row: &PgRow) -> Result<SubmissionUnit, StoreError> {
    let state: String = row.try_get("state")?;
    let last_error: Option<String> = row.try_get("last_error")?;

    Ok(SubmissionUnit {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        directory_id: row.try_get("directory_id")?,
        position: row.try_get("position")?,
        priority_band: row.try_get("priority_band")?,
        job_created_at: row.try_get("job_created_at")?,
        state: parse_enum(&state, "state")?,
        attempt_count: row.try_get("attempt_count")?,
        max_attempts: row.try_get("max_attempts")?,
        last_error: last_error
            .map(|e| parse_enum(&e, "last_error"))
            .transpose()?,
        next_eligible_at: row.try_get("next_eligible_at")?,
        listing_url: row.try_get("listing_url")?,
        processing_time_ms: row.try_get("processing_time_ms")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<SubmissionResultRecord, StoreError> {
    let outcome: String = row.try_get("outcome")?;
    let error_category: Option<String> = row.try_get("error_category")?;

    Ok(SubmissionResultRecord {
        unit_id: row.try_get("unit_id")?,
        job_id: row.try_get("job_id")?,
        attempt_number: row.try_get("attempt_number")?,
        outcome: parse_enum(&outcome, "outcome")?,
        error_category: error_category
            .map(|e| parse_enum(&e, "error_category"))
            .transpose()?,
        listing_url: row.try_get("listing_url")?,
        duration_ms: row.try_get("duration_ms")?,
        captcha_solves: row.try_get("captcha_solves")?,
        worker_id: row.try_get("worker_id")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_ref().to_string()).collect()
}

#[async_trait]
impl SubmissionStore for PgStore {
    async fn insert_job(&self, job: &Job, units: &[SubmissionUnit]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, customer_id, tier, directory_limit, status, business_profile,
                              created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.customer_id)
        .bind(job.tier.as_ref())
        .bind(job.directory_limit)
        .bind(job.status.as_ref())
        .bind(Json(&job.business_profile))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        for unit in units {
            sqlx::query(
                r#"
                INSERT INTO directory_submission_units
                    (id, job_id, directory_id, position, priority_band, job_created_at, state,
                     attempt_count, max_attempts, next_eligible_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(unit.id)
            .bind(unit.job_id)
            .bind(&unit.directory_id)
            .bind(unit.position)
            .bind(unit.priority_band)
            .bind(unit.job_created_at)
            .bind(unit.state.as_ref())
            .bind(unit.attempt_count)
            .bind(unit.max_attempts)
            .bind(unit.next_eligible_at)
            .bind(unit.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE (cardinality($1::text[]) = 0 OR status = ANY($1))
              AND ($2::text IS NULL OR tier = $2)
              AND ($3::text IS NULL OR customer_id = $3)
            ORDER BY CASE tier
                         WHEN 'pro' THEN 3
                         WHEN 'growth' THEN 2
                         WHEN 'starter' THEN 1
                         ELSE 0
                     END DESC,
                     created_at ASC
            LIMIT $4
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status_strings(&filter.statuses))
            .bind(filter.tier.map(|t| t.as_ref().to_string()))
            .bind(filter.customer_id.as_deref())
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        from: &[JobStatus],
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status = ANY($4)
            "#,
        )
        .bind(status.as_ref())
        .bind(now)
        .bind(job_id)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SubmissionUnit>, StoreError> {
        let sql = format!(
            "SELECT {} FROM directory_submission_units WHERE id = $1",
            UNIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn job_units(&self, job_id: Uuid) -> Result<Vec<SubmissionUnit>, StoreError> {
        let sql = format!(
            "SELECT {} FROM directory_submission_units WHERE job_id = $1 ORDER BY position",
            UNIT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(job_id).fetch_all(&self.pool).await?;
        rows.iter().map(unit_from_row).collect()
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
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            WITH next_units AS (
                SELECT id
                FROM directory_submission_units
                WHERE state = 'queued' AND next_eligible_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs j
                      WHERE j.id = directory_submission_units.job_id AND j.status = 'cancelled'
                  )
                ORDER BY priority_band DESC, job_created_at ASC, job_id ASC, position ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE directory_submission_units
            SET state = 'claimed',
                claimed_by = $3,
                claimed_at = $1,
                updated_at = $1
            WHERE id IN (SELECT id FROM next_units)
            RETURNING {}
            "#,
            UNIT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .bind(worker_id)
            .fetch_all(&mut *tx)
            .await?;
        let mut units = rows
            .iter()
            .map(unit_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        if !units.is_empty() {
            let mut job_ids: Vec<Uuid> = units.iter().map(|u| u.job_id).collect();
            job_ids.sort();
            job_ids.dedup();
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'in_progress', updated_at = $1
                WHERE id = ANY($2) AND status = 'pending'
                "#,
            )
            .bind(now)
            .bind(&job_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // RETURNING does not preserve the CTE order
        units.sort_by(SubmissionUnit::claim_order);
        Ok(units)
    }

    async fn start_unit(&self, claim: &Claim, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE directory_submission_units
            SET state = 'in_progress', updated_at = $1
            WHERE id = $2 AND state = 'claimed' AND claimed_by = $3 AND attempt_count = $4
            "#,
        )
        .bind(now)
        .bind(claim.unit_id)
        .bind(&claim.worker_id)
        .bind(claim.attempt_count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finish_unit(
        &self,
        claim: &Claim,
        transition: &UnitTransition,
        processing_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        let (next_eligible_at, listing_url) = match transition {
            UnitTransition::Requeue {
                next_eligible_at, ..
            } => (Some(*next_eligible_at), None),
            UnitTransition::Succeed { listing_url } => (None, listing_url.clone()),
            UnitTransition::Fail { .. } | UnitTransition::Skip { .. } => (None, None),
        };

        let sql = format!(
            r#"
            UPDATE directory_submission_units
            SET state = $1,
                attempt_count = attempt_count + 1,
                last_error = $2,
                processing_time_ms = $3,
                next_eligible_at = COALESCE($4, next_eligible_at),
                listing_url = COALESCE($5, listing_url),
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $6
            WHERE id = $7
              AND state IN ('claimed', 'in_progress')
              AND claimed_by = $8
              AND attempt_count = $9
            RETURNING {}
            "#,
            UNIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(transition.target_state().as_ref())
            .bind(transition.error().map(|e| e.as_ref().to_string()))
            .bind(processing_time_ms)
            .bind(next_eligible_at)
            .bind(listing_url)
            .bind(now)
            .bind(claim.unit_id)
            .bind(&claim.worker_id)
            .bind(claim.attempt_count)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(unit_from_row).transpose()
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedUnit>, StoreError> {
        let sql = format!(
            r#"
            WITH stale AS (
                SELECT id, claimed_by
                FROM directory_submission_units
                WHERE state IN ('claimed', 'in_progress') AND claimed_at < $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE directory_submission_units u
            SET attempt_count = u.attempt_count + 1,
                state = CASE WHEN u.attempt_count + 1 >= u.max_attempts
                             THEN 'failed' ELSE 'queued' END,
                last_error = 'abandoned',
                claimed_by = NULL,
                claimed_at = NULL,
                next_eligible_at = $2,
                updated_at = $2
            FROM stale
            WHERE u.id = stale.id
            RETURNING {}, stale.claimed_by AS previous_worker
            "#,
            UNIT_COLUMNS_U
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ReleasedUnit, StoreError> {
                let previous_worker: Option<String> = row.try_get("previous_worker")?;
                Ok(ReleasedUnit {
                    unit: unit_from_row(row)?,
                    previous_worker: previous_worker.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn requeue_unit(
        &self,
        unit_id: Uuid,
        extra_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionUnit>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The job row lock orders this against settle_job
        let job = sqlx::query(
            r#"
            SELECT j.id, j.status
            FROM jobs j
            JOIN directory_submission_units u ON u.job_id = j.id
            WHERE u.id = $1
            FOR UPDATE OF j
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(job) = job else {
            return Ok(None);
        };
        let job_id: Uuid = job.try_get("id")?;
        let status: String = job.try_get("status")?;
        if parse_enum::<JobStatus>(&status, "status")? == JobStatus::Cancelled {
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE directory_submission_units
            SET state = 'queued',
                max_attempts = attempt_count + $1,
                next_eligible_at = $2,
                updated_at = $2
            WHERE id = $3 AND state IN ('failed', 'skipped')
            RETURNING {}
            "#,
            UNIT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(extra_attempts)
            .bind(now)
            .bind(unit_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(unit) = row.as_ref().map(unit_from_row).transpose()? else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'in_progress', updated_at = $1
            WHERE id = $2 AND status IN ('completed', 'failed', 'partially_completed')
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(unit))
    }

    async fn settle_job(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobStatus, UnitCounts)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        if !matches!(
            parse_enum::<JobStatus>(&status, "status")?,
            JobStatus::Pending | JobStatus::InProgress
        ) {
            return Ok(None);
        }

        let states: Vec<String> =
            sqlx::query_scalar("SELECT state FROM directory_submission_units WHERE job_id = $1")
                .bind(job_id)
                .fetch_all(&mut *tx)
                .await?;
        let states = states
            .iter()
            .map(|state| parse_enum::<UnitState>(state, "state"))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = UnitCounts::tally(states);
        let Some(settled) = counts.settled_status() else {
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(settled.as_ref())
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((settled, counts)))
    }

    async fn cancel_job_units(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE directory_submission_units
            SET state = 'skipped',
                last_error = 'cancelled',
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $1
            WHERE job_id = $2 AND state IN ('queued', 'claimed', 'in_progress')
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn append_record(&self, record: &SubmissionResultRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO submission_result_records
                (unit_id, job_id, attempt_number, outcome, error_category, listing_url,
                 duration_ms, captcha_solves, worker_id, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (unit_id, attempt_number) DO NOTHING
            "#,
        )
        .bind(record.unit_id)
        .bind(record.job_id)
        .bind(record.attempt_number)
        .bind(record.outcome.as_ref())
        .bind(record.error_category.map(|e| e.as_ref().to_string()))
        .bind(&record.listing_url)
        .bind(record.duration_ms)
        .bind(record.captcha_solves)
        .bind(&record.worker_id)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unit_records(&self, unit_id: Uuid) -> Result<Vec<SubmissionResultRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM submission_result_records WHERE unit_id = $1 ORDER BY attempt_number",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(unit_id).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS depth FROM directory_submission_units WHERE state = 'queued'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("depth")?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
