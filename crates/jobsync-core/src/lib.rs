//! Canonical job-posting model and field normalizers for jobsync.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of employment types a canonical record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentType {
    #[default]
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
    Volunteer,
}

impl EmploymentType {
    pub const ALL: [EmploymentType; 6] = [
        EmploymentType::FullTime,
        EmploymentType::PartTime,
        EmploymentType::Contract,
        EmploymentType::Temporary,
        EmploymentType::Internship,
        EmploymentType::Volunteer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::FullTime => "full-time",
            EmploymentType::PartTime => "part-time",
            EmploymentType::Contract => "contract",
            EmploymentType::Temporary => "temporary",
            EmploymentType::Internship => "internship",
            EmploymentType::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of seniority levels a canonical record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentLevel {
    #[default]
    Entry,
    Junior,
    MidLevel,
    Senior,
    Lead,
    Manager,
    Director,
    Executive,
}

impl EmploymentLevel {
    pub const ALL: [EmploymentLevel; 8] = [
        EmploymentLevel::Entry,
        EmploymentLevel::Junior,
        EmploymentLevel::MidLevel,
        EmploymentLevel::Senior,
        EmploymentLevel::Lead,
        EmploymentLevel::Manager,
        EmploymentLevel::Director,
        EmploymentLevel::Executive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentLevel::Entry => "entry",
            EmploymentLevel::Junior => "junior",
            EmploymentLevel::MidLevel => "mid-level",
            EmploymentLevel::Senior => "senior",
            EmploymentLevel::Lead => "lead",
            EmploymentLevel::Manager => "manager",
            EmploymentLevel::Director => "director",
            EmploymentLevel::Executive => "executive",
        }
    }

    fn from_canonical(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }
}

impl fmt::Display for EmploymentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vendor employment-type tokens. Matching is case-sensitive.
const EMPLOYMENT_TYPE_TOKENS: [(&str, EmploymentType); 6] = [
    ("FULL_TIME", EmploymentType::FullTime),
    ("PART_TIME", EmploymentType::PartTime),
    ("CONTRACT", EmploymentType::Contract),
    ("TEMPORARY", EmploymentType::Temporary),
    ("INTERNSHIP", EmploymentType::Internship),
    ("VOLUNTEER", EmploymentType::Volunteer),
];

const LEVEL_KEYWORDS: [(&str, EmploymentLevel); 9] = [
    ("ENTRY", EmploymentLevel::Entry),
    ("JUNIOR", EmploymentLevel::Junior),
    ("MID_LEVEL", EmploymentLevel::MidLevel),
    ("SENIOR", EmploymentLevel::Senior),
    ("LEAD", EmploymentLevel::Lead),
    ("MANAGER", EmploymentLevel::Manager),
    ("DIRECTOR", EmploymentLevel::Director),
    ("EXECUTIVE", EmploymentLevel::Executive),
    ("", EmploymentLevel::Entry),
];

// Scanned in declaration order; the first alias contained in the token wins.
const LEVEL_ALIASES: [(&str, EmploymentLevel); 9] = [
    ("jr", EmploymentLevel::Junior),
    ("sr", EmploymentLevel::Senior),
    ("mid", EmploymentLevel::MidLevel),
    ("intermediate", EmploymentLevel::MidLevel),
    ("principal", EmploymentLevel::Senior),
    ("staff", EmploymentLevel::Senior),
    ("head", EmploymentLevel::Lead),
    ("chief", EmploymentLevel::Executive),
    ("vp", EmploymentLevel::Executive),
];

pub fn normalize_employment_type(raw: Option<&str>) -> EmploymentType {
    raw.and_then(|token| {
        EMPLOYMENT_TYPE_TOKENS
            .iter()
            .find(|(vendor, _)| *vendor == token)
            .map(|(_, kind)| *kind)
    })
    .unwrap_or_default()
}

/// Resolve a vendor seniority token: canonical spelling, then keyword table,
/// then alias substrings, then `entry`.
pub fn normalize_employment_level(raw: Option<&str>) -> EmploymentLevel {
    let raw = raw.unwrap_or_default();
    let normalized = hyphenate_level_token(raw);

    if let Some(level) = EmploymentLevel::from_canonical(&normalized) {
        return level;
    }

    let upper = raw.to_uppercase();
    if let Some((_, level)) = LEVEL_KEYWORDS.iter().find(|(keyword, _)| *keyword == upper) {
        return *level;
    }

    LEVEL_ALIASES
        .iter()
        .find(|(alias, _)| normalized.contains(alias))
        .map(|(_, level)| *level)
        .unwrap_or_default()
}

fn hyphenate_level_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_whitespace = false;
    for ch in raw.to_lowercase().chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        out.push(if ch == '_' { '-' } else { ch });
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub full: String,
    pub short: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub name: String,
    pub street_address: String,
    pub postal_code: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salary {
    pub currency: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employment {
    #[serde(rename = "type")]
    pub employment_type: EmploymentType,
    #[serde(default)]
    pub level: EmploymentLevel,
    pub brand: String,
    pub internal: bool,
    #[serde(rename = "applyUrl")]
    pub apply_url: String,
    pub work_hours: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Details {
    /// External identifier; the only key used to match documents on upsert.
    #[serde(rename = "reqId")]
    pub req_id: String,
    pub slug: String,
    pub language: String,
    pub languages: Vec<String>,
    pub categories: Vec<String>,
    pub benefits: Vec<String>,
    pub tags: Vec<String>,
    pub source: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dates {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub published: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub posted_date: String,
    pub posting_expiry_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub region: String,
    pub district: String,
    pub location: String,
    pub views: i64,
    pub applications: i64,
    pub featured: bool,
    pub urgent: bool,
    pub searchable: bool,
    pub applyable: bool,
    pub li_easy_applyable: bool,
}

/// Canonical, fully-defaulted job posting as persisted in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub description: String,
    pub company: Company,
    pub location: Location,
    pub salary: Salary,
    pub employment: Employment,
    pub details: Details,
    pub dates: Dates,
    pub meta: Meta,
}

impl JobRecord {
    pub fn req_id(&self) -> &str {
        &self.details.req_id
    }
}

/// A canonical record together with the identity the document store assigned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: Uuid,
    pub record: JobRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredJob {
    pub fn cache_key(&self) -> String {
        job_cache_key(self.id)
    }
}

pub fn job_cache_key(id: Uuid) -> String {
    format!("job:{id}")
}
