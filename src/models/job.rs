use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Width of one priority band. Queue age is clamped below this so an old
/// starter job never outranks a fresh growth job.
const BAND_WIDTH: i64 = 1_000_000;

/// Package a customer purchased. Controls directory count and claim priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PackageTier {
    Starter,
    Growth,
    Pro,
    Subscription,
}

impl PackageTier {
    /// Claim priority band, higher is served first.
    pub fn band(self) -> i32 {
        match self {
            PackageTier::Pro => 3,
            PackageTier::Growth => 2,
            PackageTier::Starter => 1,
            PackageTier::Subscription => 0,
        }
    }

    pub const ALL: [PackageTier; 4] = [
        PackageTier::Pro,
        PackageTier::Growth,
        PackageTier::Starter,
        PackageTier::Subscription,
    ];
}

/// Lifecycle of a customer job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    PartiallyCompleted,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::PartiallyCompleted
                | JobStatus::Cancelled
        )
    }

    /// Finished because every unit went terminal, as opposed to cancelled.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::PartiallyCompleted
        )
    }
}

/// A single field of the business profile, as referenced by tier requirements
/// and directory field mappings.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProfileField {
    #[serde(alias = "businessName", alias = "name")]
    BusinessName,
    Website,
    Email,
    Phone,
    Address,
    City,
    State,
    #[serde(alias = "zipCode", alias = "postal_code")]
    Zip,
    Category,
    Description,
}

/// Business data submitted to directories. Snapshotted into the job at
/// enqueue time and never edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct BusinessProfile {
    #[garde(length(min = 1, max = 200))]
    pub business_name: String,

    #[garde(url)]
    pub website: Option<String>,

    #[garde(email)]
    pub email: Option<String>,

    #[garde(length(min = 7, max = 32))]
    pub phone: Option<String>,

    #[garde(length(min = 1, max = 300))]
    pub address: Option<String>,

    #[garde(length(min = 1, max = 120))]
    pub city: Option<String>,

    #[garde(length(min = 2, max = 64))]
    pub state: Option<String>,

    #[garde(length(min = 3, max = 12))]
    pub zip: Option<String>,

    #[garde(length(min = 1, max = 120))]
    pub category: Option<String>,

    #[garde(length(max = 2000))]
    pub description: Option<String>,
}

impl BusinessProfile {
    /// Value for a field, ignoring blank strings.
    pub fn value(&self, field: ProfileField) -> Option<&str> {
        let raw = match field {
            ProfileField::BusinessName => Some(self.business_name.as_str()),
            ProfileField::Website => self.website.as_deref(),
            ProfileField::Email => self.email.as_deref(),
            ProfileField::Phone => self.phone.as_deref(),
            ProfileField::Address => self.address.as_deref(),
            ProfileField::City => self.city.as_deref(),
            ProfileField::State => self.state.as_deref(),
            ProfileField::Zip => self.zip.as_deref(),
            ProfileField::Category => self.category.as_deref(),
            ProfileField::Description => self.description.as_deref(),
        };
        raw.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn has(&self, field: ProfileField) -> bool {
        self.value(field).is_some()
    }
}

/// Payment confirmation payload that creates a job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewJob {
    #[garde(length(min = 1, max = 128))]
    pub customer_id: String,

    #[garde(skip)]
    pub tier: PackageTier,

    /// Requested directory count; defaults to the tier maximum.
    #[garde(range(min = 0))]
    pub directory_limit: Option<i32>,

    #[garde(dive)]
    pub business_profile: BusinessProfile,
}

/// One customer purchase requiring directory submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub customer_id: String,
    pub tier: PackageTier,
    pub directory_limit: i32,
    pub status: JobStatus,
    pub business_profile: BusinessProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Tier band plus queue age in minutes, clamped inside the band.
    pub fn priority_score(&self, now: DateTime<Utc>) -> i64 {
        let age_minutes = (now - self.created_at).num_minutes().clamp(0, BAND_WIDTH - 1);
        i64::from(self.tier.band()) * BAND_WIDTH + age_minutes
    }
}
