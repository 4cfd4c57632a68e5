use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::models::job::{BusinessProfile, ProfileField};

/// How hard a directory is to submit to.
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
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Directory quality tier (domain authority bands).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DirectoryTier {
    Tier1,
    Tier2,
    Tier3,
}

impl DirectoryTier {
    fn priority_bonus(self) -> i32 {
        match self {
            DirectoryTier::Tier1 => 20,
            DirectoryTier::Tier2 => 10,
            DirectoryTier::Tier3 => 0,
        }
    }
}

/// Minimum spacing between two hits on the same directory.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RateLimitClass {
    Relaxed,
    #[default]
    Standard,
    Strict,
    Throttled,
}

impl RateLimitClass {
    pub fn min_interval(self) -> Duration {
        match self {
            RateLimitClass::Relaxed => Duration::from_secs(1),
            RateLimitClass::Standard => Duration::from_secs(2),
            RateLimitClass::Strict => Duration::from_secs(5),
            RateLimitClass::Throttled => Duration::from_secs(15),
        }
    }
}

/// Anti-bot and access characteristics of a directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub has_captcha: bool,
    #[serde(default, alias = "requiresRegistration")]
    pub requires_login: bool,
    #[serde(default)]
    pub rate_limit_class: RateLimitClass,
}

/// CSS selector for one form field on the directory's submission page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub selector: String,
    #[serde(default)]
    pub required: bool,
}

/// A target directory, as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryDescriptor {
    pub id: String,
    pub name: String,
    pub url: String,
    pub submission_url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub domain_authority: i32,
    pub difficulty: Difficulty,
    pub tier: DirectoryTier,
    /// Explicit ordering weight; derived from authority and tier when absent.
    #[serde(default)]
    pub priority_weight: Option<i32>,
    #[serde(flatten)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub field_mapping: BTreeMap<ProfileField, FieldSelector>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl DirectoryDescriptor {
    pub fn effective_priority(&self) -> i32 {
        self.priority_weight
            .unwrap_or(self.domain_authority + self.tier.priority_bonus())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = ProfileField> + '_ {
        self.field_mapping
            .iter()
            .filter(|(_, selector)| selector.required)
            .map(|(field, _)| *field)
    }

    /// Whether the profile carries every field this directory insists on.
    pub fn accepts(&self, profile: &BusinessProfile) -> bool {
        self.required_fields().all(|field| profile.has(field))
    }
}

/// Catalog query.
#[derive(Debug, Clone, Default)]
pub struct DirectoryFilter {
    pub max_difficulty: Option<Difficulty>,
    pub allow_captcha: bool,
    pub allow_login: bool,
    /// Only directories whose required fields this profile satisfies.
    pub profile: Option<BusinessProfile>,
    pub limit: Option<usize>,
}

impl DirectoryFilter {
    pub fn matches(&self, directory: &DirectoryDescriptor) -> bool {
        if !directory.active {
            return false;
        }
        if let Some(max) = self.max_difficulty {
            if directory.difficulty > max {
                return false;
            }
        }
        if directory.capabilities.has_captcha && !self.allow_captcha {
            return false;
        }
        if directory.capabilities.requires_login && !self.allow_login {
            return false;
        }
        if let Some(profile) = &self.profile {
            if !directory.accepts(profile) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "yelp-com",
        "name": "Yelp",
        "url": "https://www.yelp.com",
        "submissionUrl": "https://biz.yelp.com/signup",
        "category": "general-directory",
        "domainAuthority": 94,
        "difficulty": "hard",
        "tier": "tier1",
        "priority": "high",
        "requiresRegistration": true,
        "rateLimitClass": "strict",
        "fieldMapping": {
            "businessName": {"selector": "input[name='business_name']", "required": true},
            "phone": {"selector": "input[name='phone']", "required": true},
            "description": {"selector": "textarea[name='description']", "required": false}
        }
    }"#;

    #[test]
    fn test_parses_catalog_entry() {
        let directory: DirectoryDescriptor = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(directory.id, "yelp-com");
        assert!(directory.capabilities.requires_login);
        assert!(!directory.capabilities.has_captcha);
        assert_eq!(directory.capabilities.rate_limit_class, RateLimitClass::Strict);
        assert_eq!(directory.effective_priority(), 114);
        assert!(directory.active);

        let required: Vec<_> = directory.required_fields().collect();
        assert_eq!(required, vec![ProfileField::BusinessName, ProfileField::Phone]);
    }

    #[test]
    fn test_filter_respects_profile_requirements() {
        let mut directory: DirectoryDescriptor = serde_json::from_str(SAMPLE).unwrap();
        directory.capabilities.requires_login = false;

        let mut profile = BusinessProfile {
            business_name: "Acme Plumbing".to_string(),
            ..Default::default()
        };
        let filter = DirectoryFilter {
            profile: Some(profile.clone()),
            ..Default::default()
        };
        assert!(!filter.matches(&directory));

        profile.phone = Some("(555) 123-4567".to_string());
        let filter = DirectoryFilter {
            profile: Some(profile),
            ..Default::default()
        };
        assert!(filter.matches(&directory));
    }

    #[test]
    fn test_filter_difficulty_and_flags() {
        let mut directory: DirectoryDescriptor = serde_json::from_str(SAMPLE).unwrap();
        let filter = DirectoryFilter {
            max_difficulty: Some(Difficulty::Medium),
            allow_login: true,
            ..Default::default()
        };
        assert!(!filter.matches(&directory));

        directory.difficulty = Difficulty::Easy;
        assert!(filter.matches(&directory));

        directory.capabilities.has_captcha = true;
        assert!(!filter.matches(&directory));
    }
}
