//! HTML inspection and form building for directory submission pages.
//!
//! Pure functions over fetched markup; the HTTP side lives in
//! [`crate::services::worker`].

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::models::directory::DirectoryDescriptor;
use crate::models::job::BusinessProfile;
use crate::models::outcome::{CaptchaChallenge, CaptchaKind};

/// Raw markup markers that indicate a CAPTCHA widget.
const CAPTCHA_MARKERS: [&str; 4] = ["g-recaptcha", "hcaptcha", "data-sitekey", "captcha"];

const SUCCESS_SELECTORS: &str = ".success, .confirmation, [class*='success']";
const ERROR_SELECTORS: &str =
    ".error, .errors, .alert-danger, .invalid-feedback, [class*='error']";

const REVIEW_PHRASES: [&str; 7] = [
    "pending review",
    "under review",
    "manual review",
    "pending approval",
    "awaiting approval",
    "awaiting moderation",
    "will be reviewed",
];

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// What a submission page requires before it can be filled.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInspection {
    pub captcha: Option<CaptchaChallenge>,
    pub login_required: bool,
}

pub fn inspect_page(html: &str, page_url: &str) -> PageInspection {
    let document = Html::parse_document(html);
    PageInspection {
        captcha: detect_captcha(&document, html, page_url),
        login_required: document
            .select(&selector("input[type='password']"))
            .next()
            .is_some(),
    }
}

fn detect_captcha(document: &Html, html: &str, page_url: &str) -> Option<CaptchaChallenge> {
    let lowered = html.to_lowercase();
    if !CAPTCHA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return None;
    }

    let kind = if lowered.contains("hcaptcha") || lowered.contains("h-captcha") {
        CaptchaKind::Hcaptcha
    } else if lowered.contains("recaptcha") {
        CaptchaKind::Recaptcha
    } else {
        CaptchaKind::Unknown
    };

    let site_key = document
        .select(&selector("[data-sitekey]"))
        .next()
        .and_then(|el| el.value().attr("data-sitekey"))
        .map(str::to_string);

    Some(CaptchaChallenge {
        kind,
        site_key,
        page_url: page_url.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

/// A filled form ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct FormSubmission {
    pub action: Url,
    pub method: FormMethod,
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("No form found on submission page")]
    NoForm,

    #[error("Invalid selector {selector:?} for {field}")]
    BadSelector { field: String, selector: String },

    #[error("Required field {field} not found on page (selector {selector:?})")]
    MissingField { field: String, selector: String },

    #[error("Invalid form action {0:?}")]
    BadAction(String),
}

/// Fill the directory's form from the business profile.
pub fn build_submission(
    html: &str,
    page_url: &Url,
    directory: &DirectoryDescriptor,
    profile: &BusinessProfile,
    captcha_token: Option<&str>,
) -> Result<FormSubmission, FormError> {
    let document = Html::parse_document(html);

    let mut mapped = Vec::with_capacity(directory.field_mapping.len());
    for (field, mapping) in &directory.field_mapping {
        let parsed = Selector::parse(&mapping.selector).map_err(|_| FormError::BadSelector {
            field: field.to_string(),
            selector: mapping.selector.clone(),
        })?;
        mapped.push((*field, mapping, parsed));
    }

    let forms: Vec<ElementRef> = document.select(&selector("form")).collect();
    let form = forms
        .iter()
        .find(|form| mapped.iter().any(|(_, _, sel)| form.select(sel).next().is_some()))
        .or_else(|| forms.first())
        .copied()
        .ok_or(FormError::NoForm)?;

    let mut fields = hidden_fields(form);

    for (field, mapping, sel) in &mapped {
        let Some(value) = profile.value(*field) else {
            continue;
        };
        let element = form.select(sel).next();
        let name = element.and_then(|el| el.value().attr("name").or(el.value().attr("id")));
        match (element, name) {
            (Some(element), Some(name)) => {
                let value = if element.value().name() == "select" {
                    option_value(element, value)
                } else {
                    value.to_string()
                };
                set_field(&mut fields, name, value);
            }
            _ if mapping.required => {
                return Err(FormError::MissingField {
                    field: field.to_string(),
                    selector: mapping.selector.clone(),
                })
            }
            _ => {}
        }
    }

    if let Some(token) = captcha_token {
        let kind = detect_captcha(&document, html, page_url.as_str()).map(|c| c.kind);
        if kind == Some(CaptchaKind::Hcaptcha) {
            set_field(&mut fields, "h-captcha-response", token.to_string());
        }
        set_field(&mut fields, "g-recaptcha-response", token.to_string());
    }

    let action = match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => page_url
            .join(action)
            .map_err(|_| FormError::BadAction(action.to_string()))?,
        _ => page_url.clone(),
    };
    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("get") => FormMethod::Get,
        _ => FormMethod::Post,
    };

    Ok(FormSubmission {
        action,
        method,
        fields,
    })
}

fn hidden_fields(form: ElementRef) -> Vec<(String, String)> {
    form.select(&selector("input[type='hidden'][name]"))
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: String) {
    match fields.iter_mut().find(|(field, _)| field == name) {
        Some(existing) => existing.1 = value,
        None => fields.push((name.to_string(), value)),
    }
}

/// Dropdowns are matched on visible text; the option's value is submitted.
fn option_value(select: ElementRef, wanted: &str) -> String {
    select
        .select(&selector("option"))
        .find(|option| {
            let text: String = option.text().collect();
            text.trim().eq_ignore_ascii_case(wanted)
        })
        .map(|option| {
            option
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| option.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_else(|| wanted.to_string())
}

/// How a directory answered the submitted form.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseVerdict {
    Accepted { listing_url: Option<String> },
    ManualReview,
    Rejected { message: String },
    Unconfirmed,
}

/// Read the page returned after submitting. Review wording wins over success
/// markers since a listing awaiting moderation is not live yet.
pub fn classify_response(html: &str, final_url: &str) -> ResponseVerdict {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<String>().to_lowercase();

    if REVIEW_PHRASES.iter().any(|phrase| text.contains(phrase)) {
        return ResponseVerdict::ManualReview;
    }

    if document.select(&selector(SUCCESS_SELECTORS)).next().is_some() {
        let canonical = document
            .select(&selector("link[rel='canonical'][href]"))
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(str::to_string);
        return ResponseVerdict::Accepted {
            listing_url: canonical.or_else(|| Some(final_url.to_string())),
        };
    }

    let error = document
        .select(&selector(ERROR_SELECTORS))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|message| !message.is_empty());
    if let Some(message) = error {
        return ResponseVerdict::Rejected { message };
    }

    ResponseVerdict::Unconfirmed
}
