//! Test fixtures: business profiles, payment payloads and directory catalogs.

#![allow(dead_code)]

use std::collections::BTreeMap;

use directory_dispatch::models::directory::{
    Capabilities, Difficulty, DirectoryDescriptor, DirectoryTier, FieldSelector,
};
use directory_dispatch::models::job::{BusinessProfile, NewJob, PackageTier, ProfileField};

/// A profile complete enough for every tier.
pub fn full_profile() -> BusinessProfile {
    BusinessProfile {
        business_name: "Harbor Light Bakery".to_string(),
        website: Some("https://harborlight.example".to_string()),
        email: Some("hello@harborlight.example".to_string()),
        phone: Some("(555) 010-2200".to_string()),
        address: Some("12 Wharf Street".to_string()),
        city: Some("Portland".to_string()),
        state: Some("ME".to_string()),
        zip: Some("04101".to_string()),
        category: Some("Bakery".to_string()),
        description: Some("Sourdough and pastries baked daily.".to_string()),
    }
}

pub fn new_job(tier: PackageTier) -> NewJob {
    NewJob {
        customer_id: format!("cus_{}", tier),
        tier,
        directory_limit: None,
        business_profile: full_profile(),
    }
}

pub fn new_job_for(customer_id: &str, tier: PackageTier) -> NewJob {
    NewJob {
        customer_id: customer_id.to_string(),
        ..new_job(tier)
    }
}

/// An easy, CAPTCHA-free directory mapping business name and website.
pub fn directory(id: &str, domain_authority: i32) -> DirectoryDescriptor {
    DirectoryDescriptor {
        id: id.to_string(),
        name: id.to_uppercase(),
        url: format!("https://{}.example", id),
        submission_url: format!("https://{}.example/add", id),
        category: Some("general".to_string()),
        domain_authority,
        difficulty: Difficulty::Easy,
        tier: DirectoryTier::Tier2,
        priority_weight: None,
        capabilities: Capabilities::default(),
        field_mapping: BTreeMap::from([
            (
                ProfileField::BusinessName,
                FieldSelector {
                    selector: "input[name='business_name']".to_string(),
                    required: true,
                },
            ),
            (
                ProfileField::Website,
                FieldSelector {
                    selector: "input[name='website']".to_string(),
                    required: false,
                },
            ),
        ]),
        active: true,
    }
}

/// `count` plain directories named `{prefix}-000`, `{prefix}-001`, ... with
/// descending domain authority so catalog order matches the numbering.
pub fn directories(prefix: &str, count: usize) -> Vec<DirectoryDescriptor> {
    (0..count)
        .map(|i| directory(&format!("{}-{:03}", prefix, i), 1000 - i as i32))
        .collect()
}

pub fn with_captcha(mut directory: DirectoryDescriptor) -> DirectoryDescriptor {
    directory.capabilities.has_captcha = true;
    directory
}

pub fn with_difficulty(
    mut directory: DirectoryDescriptor,
    difficulty: Difficulty,
) -> DirectoryDescriptor {
    directory.difficulty = difficulty;
    directory
}
