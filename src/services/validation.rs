use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::directory::{Difficulty, DirectoryFilter};
use crate::models::job::{BusinessProfile, NewJob, PackageTier, ProfileField};

/// What a package tier buys: how many directories, how hard they may be, and
/// which profile fields must be present for that directory set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub max_directories: i32,
    pub max_difficulty: Difficulty,
    /// CAPTCHA-protected directories are only targeted when a solver is
    /// also configured.
    pub allow_captcha: bool,
    pub required_fields: Vec<ProfileField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicies {
    pub starter: TierPolicy,
    pub growth: TierPolicy,
    pub pro: TierPolicy,
    pub subscription: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        use ProfileField::*;

        let contact = vec![BusinessName, Website, Email];
        let listing = vec![BusinessName, Website, Email, Phone, Address, City, State, Zip];
        let mut full = listing.clone();
        full.extend([Category, Description]);

        Self {
            starter: TierPolicy {
                max_directories: 50,
                max_difficulty: Difficulty::Medium,
                allow_captcha: false,
                required_fields: contact,
            },
            growth: TierPolicy {
                max_directories: 100,
                max_difficulty: Difficulty::Hard,
                allow_captcha: true,
                required_fields: listing,
            },
            pro: TierPolicy {
                max_directories: 200,
                max_difficulty: Difficulty::Hard,
                allow_captcha: true,
                required_fields: full,
            },
            subscription: TierPolicy {
                max_directories: 0,
                max_difficulty: Difficulty::Medium,
                allow_captcha: false,
                required_fields: vec![BusinessName, Website],
            },
        }
    }
}

impl TierPolicies {
    pub fn get(&self, tier: PackageTier) -> &TierPolicy {
        match tier {
            PackageTier::Starter => &self.starter,
            PackageTier::Growth => &self.growth,
            PackageTier::Pro => &self.pro,
            PackageTier::Subscription => &self.subscription,
        }
    }

    pub fn get_mut(&mut self, tier: PackageTier) -> &mut TierPolicy {
        match tier {
            PackageTier::Starter => &mut self.starter,
            PackageTier::Growth => &mut self.growth,
            PackageTier::Pro => &mut self.pro,
            PackageTier::Subscription => &mut self.subscription,
        }
    }
}

impl TierPolicy {
    /// Catalog filter for directories this tier may target with `profile`.
    pub fn directory_filter(
        &self,
        profile: &BusinessProfile,
        solver_available: bool,
        limit: i32,
    ) -> DirectoryFilter {
        DirectoryFilter {
            max_difficulty: Some(self.max_difficulty),
            allow_captcha: self.allow_captcha && solver_available,
            allow_login: false,
            profile: Some(profile.clone()),
            limit: Some(limit.max(0) as usize),
            ..Default::default()
        }
    }
}

/// Rejection of a payment-confirmation payload. Safe to show to customers.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("invalid job: {}", errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl ValidationError {
    fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

/// Validate a new job against field formats and its tier's requirements.
/// Returns the directory limit the job will be created with.
pub fn validate_new_job(job: &NewJob, policy: &TierPolicy) -> Result<i32, ValidationError> {
    let mut errors: Vec<String> = match job.validate() {
        Ok(()) => Vec::new(),
        Err(report) => report
            .iter()
            .map(|(path, error)| format!("{}: {}", path, error))
            .collect(),
    };

    for field in &policy.required_fields {
        if !job.business_profile.has(*field) {
            errors.push(format!(
                "business_profile.{}: required for the {} package",
                field, job.tier
            ));
        }
    }

    if !errors.is_empty() {
        return Err(ValidationError { errors });
    }

    match job.directory_limit {
        Some(requested) if requested > policy.max_directories => {
            Err(ValidationError::single(format!(
                "directory_limit: {} exceeds the {} package maximum of {}",
                requested, job.tier, policy.max_directories
            )))
        }
        Some(requested) => Ok(requested),
        None => Ok(policy.max_directories),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> BusinessProfile {
        BusinessProfile {
            business_name: "DirectoryBolt".to_string(),
            website: Some("https://directorybolt.com".to_string()),
            email: Some("info@directorybolt.com".to_string()),
            phone: Some("(555) 123-4567".to_string()),
            address: Some("123 Business St".to_string()),
            city: Some("San Francisco".to_string()),
            state: Some("CA".to_string()),
            zip: Some("94102".to_string()),
            category: None,
            description: None,
        }
    }

    fn new_job(tier: PackageTier, business_profile: BusinessProfile) -> NewJob {
        NewJob {
            customer_id: "cus_123".to_string(),
            tier,
            directory_limit: None,
            business_profile,
        }
    }

    #[test]
    fn test_defaults_to_tier_maximum() {
        let policies = TierPolicies::default();
        let job = new_job(PackageTier::Growth, profile());
        assert_eq!(validate_new_job(&job, policies.get(PackageTier::Growth)), Ok(100));
    }

    #[test]
    fn test_missing_tier_fields_rejected() {
        let policies = TierPolicies::default();
        let job = new_job(PackageTier::Pro, profile());
        let err = validate_new_job(&job, policies.get(PackageTier::Pro)).unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert!(err.errors.iter().any(|e| e.contains("category")));
        assert!(err.errors.iter().any(|e| e.contains("description")));
    }

    #[test]
    fn test_bad_formats_rejected() {
        let policies = TierPolicies::default();
        let mut bad = profile();
        bad.email = Some("not-an-email".to_string());
        bad.website = Some("nope".to_string());
        let job = new_job(PackageTier::Starter, bad);
        let err = validate_new_job(&job, policies.get(PackageTier::Starter)).unwrap_err();
        assert!(err.errors.iter().any(|e| e.contains("email")));
        assert!(err.errors.iter().any(|e| e.contains("website")));
    }

    #[test]
    fn test_limit_above_tier_rejected() {
        let policies = TierPolicies::default();
        let mut job = new_job(PackageTier::Starter, profile());
        job.directory_limit = Some(51);
        assert!(validate_new_job(&job, policies.get(PackageTier::Starter)).is_err());

        job.directory_limit = Some(20);
        assert_eq!(validate_new_job(&job, policies.get(PackageTier::Starter)), Ok(20));
    }

    #[test]
    fn test_captcha_needs_solver() {
        let policies = TierPolicies::default();
        let growth = policies.get(PackageTier::Growth);
        assert!(!growth.directory_filter(&profile(), false, 10).allow_captcha);
        assert!(growth.directory_filter(&profile(), true, 10).allow_captcha);
        let starter = policies.get(PackageTier::Starter);
        assert!(!starter.directory_filter(&profile(), true, 10).allow_captcha);
    }
}
