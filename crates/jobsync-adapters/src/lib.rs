//! Vendor batch-file contracts + the vendor → canonical record mapper.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use jobsync_core::{
    normalize_employment_level, normalize_employment_type, Company, Coordinates, Dates, Details,
    Employment, JobRecord, Location, Meta, Salary,
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::value::RawValue;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_SOURCE: &str = "fedex-jobs";
pub const DEFAULT_TITLE: &str = "No title";
pub const DEFAULT_COMPANY: &str = "No organization";
pub const DEFAULT_COUNTRY: &str = "not found";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_STATUS: &str = "active";

/// One vendor export file: `{ "jobs": [ { "data": { ... } }, ... ] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub jobs: Vec<BatchItem>,
}

/// Payloads stay raw until [`BatchItem::vendor_job`], so one undecodable
/// record fails on its own instead of failing the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("job payload must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("decoding job payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BatchItem {
    /// Returns `None` for wrappers that carry no payload; those are skipped
    /// without counting as a failure.
    pub fn vendor_job(&self) -> Option<Result<VendorJob, MapError>> {
        let raw = self.data.as_ref()?;
        let data = match serde_json::from_str::<JsonValue>(raw.get()) {
            Ok(data) => data,
            Err(err) => return Some(Err(MapError::Decode(err))),
        };
        if is_falsy(&data) {
            return None;
        }
        Some(VendorJob::from_value(&data))
    }
}

fn is_falsy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::Number(n) => n.as_f64().map(|v| v == 0.0 || v.is_nan()).unwrap_or(false),
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => false,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Vendor job object. Every field is optional and decoded leniently, so any
/// JSON object deserializes; defaults are applied by [`RecordMapper`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorJob {
    #[serde(default, deserialize_with = "lenient::string")]
    pub req_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub hiring_organization: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub brand: Option<String>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub full_location: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub short_location: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub location_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub street_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub postal_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub longitude: Option<f64>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub salary_currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub salary_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub salary_min_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    pub salary_max_value: Option<f64>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub employment_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub employment_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub seniority_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub experience_level: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub internal: bool,
    #[serde(default, deserialize_with = "lenient::string")]
    pub apply_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub work_hours: Option<String>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub languages: Vec<String>,
    #[serde(default, deserialize_with = "lenient::category_names")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub benefits: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient::date")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub update_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::date")]
    pub expire_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub posted_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub posting_expiry_date: Option<String>,

    #[serde(default, deserialize_with = "lenient::meta_data")]
    pub meta_data: VendorMetaData,
    #[serde(default, deserialize_with = "lenient::integer")]
    pub views: Option<i64>,
    #[serde(default, deserialize_with = "lenient::integer")]
    pub applications: Option<i64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub featured: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub urgent: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub searchable: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub applyable: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub li_easy_applyable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorMetaData {
    #[serde(default, deserialize_with = "lenient::string")]
    pub region_description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub district_description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub domicile_location: Option<String>,
}

impl VendorJob {
    pub fn from_value(value: &JsonValue) -> Result<Self, MapError> {
        if !value.is_object() {
            return Err(MapError::NotAnObject {
                found: json_kind(value),
            });
        }
        Ok(Self::deserialize(value)?)
    }

    /// Seniority token, preferring `employment_level` over the alternate
    /// vendor spellings.
    pub fn level_token(&self) -> Option<&str> {
        self.employment_level
            .as_deref()
            .or(self.seniority_level.as_deref())
            .or(self.experience_level.as_deref())
    }
}

/// Field-level decoders mirroring loose vendor typing: empty strings count
/// as absent, numbers parse from their leading numeric prefix, and values of
/// an unexpected JSON kind decode to the field's empty value instead of
/// failing the record.
mod lenient {
    use super::*;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(string_value(&value))
    }

    pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        let parsed = match &value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => parse_leading_float(s),
            _ => None,
        };
        Ok(parsed.filter(|v| v.is_finite()))
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(match &value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
            JsonValue::String(s) => parse_leading_integer(s),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(match &value {
            JsonValue::Bool(b) => *b,
            JsonValue::Number(n) => n.as_f64().map(|v| v != 0.0 && !v.is_nan()).unwrap_or(false),
            JsonValue::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1"
            ),
            _ => false,
        })
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(string_value).collect())
            .unwrap_or_default())
    }

    pub fn category_names<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        JsonValue::Object(obj) => obj.get("name").and_then(string_value),
                        other => string_value(other),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = JsonValue::deserialize(d)?;
        Ok(match &value {
            JsonValue::String(s) => parse_vendor_date(s),
            JsonValue::Number(n) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            _ => None,
        })
    }

    pub fn meta_data<'de, D: Deserializer<'de>>(d: D) -> Result<VendorMetaData, D::Error> {
        let value = JsonValue::deserialize(d)?;
        if !value.is_object() {
            return Ok(VendorMetaData::default());
        }
        Ok(VendorMetaData::deserialize(&value).unwrap_or_default())
    }

    fn string_value(value: &JsonValue) -> Option<String> {
        match value {
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }
}

/// Longest leading decimal prefix of `text` (after leading whitespace), e.g.
/// `"12.5k"` → `12.5`; `None` when no digits lead the string. Scans once.
pub fn parse_leading_float(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let digits_from = |start: usize| {
        bytes
            .get(start..)
            .map(|rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
            .unwrap_or(0)
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_digits = digits_from(end);
    end += int_digits;

    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_from(end + 1);
        if int_digits > 0 || frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = digits_from(exp_end);
        if exp_digits > 0 {
            end = exp_end + exp_digits;
        }
    }

    trimmed[..end].parse().ok()
}

/// Leading optionally-signed integer of `text`, e.g. `"42 views"` → `42`.
pub fn parse_leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let mut end = 0;
    for (idx, ch) in trimmed.char_indices() {
        if ch.is_ascii_digit() || (idx == 0 && matches!(ch, '+' | '-')) {
            end = idx + ch.len_utf8();
        } else {
            break;
        }
    }
    trimmed[..end].parse().ok()
}

pub fn parse_vendor_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Lower-case and collapse every run of characters outside `[a-z0-9]` to `-`.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash {
                out.push('-');
                pending_dash = false;
            }
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if pending_dash {
        out.push('-');
    }
    out
}

/// Identifier for records that arrive without `req_id`: epoch millis plus a
/// random suffix, so two id-less records in the same millisecond stay distinct.
pub fn fallback_req_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..8])
}

/// Maps vendor job objects onto the canonical schema. Total: every field has
/// a default, so mapping never fails once a [`VendorJob`] exists.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    default_source: String,
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE)
    }
}

impl RecordMapper {
    pub fn new(default_source: impl Into<String>) -> Self {
        Self {
            default_source: default_source.into(),
        }
    }

    pub fn map(&self, job: &VendorJob) -> JobRecord {
        self.map_at(job, Utc::now())
    }

    pub fn map_at(&self, job: &VendorJob, now: DateTime<Utc>) -> JobRecord {
        let title = or_default(&job.title, DEFAULT_TITLE);
        let company_name = [&job.hiring_organization, &job.brand, &job.location_name]
            .into_iter()
            .find_map(|candidate| candidate.clone())
            .unwrap_or_else(|| DEFAULT_COMPANY.to_string());
        let req_id = job.req_id.clone().unwrap_or_else(|| {
            let generated = fallback_req_id(now);
            debug!(req_id = %generated, title = %title, "vendor job has no req_id; generated one");
            generated
        });
        let slug = job
            .slug
            .clone()
            .unwrap_or_else(|| slugify(&format!("{}-{}", title, now.timestamp_millis())));

        JobRecord {
            description: or_default(&job.description, ""),
            company: Company { name: company_name },
            location: Location {
                full: or_default(&job.full_location, ""),
                short: or_default(&job.short_location, ""),
                city: or_default(&job.city, ""),
                state: or_default(&job.state, ""),
                country: or_default(&job.country_code, DEFAULT_COUNTRY),
                name: or_default(&job.location_name, ""),
                street_address: or_default(&job.street_address, ""),
                postal_code: or_default(&job.postal_code, ""),
                coordinates: Coordinates {
                    latitude: job.latitude.unwrap_or(0.0),
                    longitude: job.longitude.unwrap_or(0.0),
                },
            },
            salary: Salary {
                currency: or_default(&job.salary_currency, DEFAULT_CURRENCY),
                value: job.salary_value.unwrap_or(0.0),
                min: job.salary_min_value.unwrap_or(0.0),
                max: job.salary_max_value.unwrap_or(0.0),
            },
            employment: Employment {
                employment_type: normalize_employment_type(job.employment_type.as_deref()),
                level: normalize_employment_level(job.level_token()),
                brand: or_default(&job.brand, ""),
                internal: job.internal,
                apply_url: or_default(&job.apply_url, ""),
                work_hours: or_default(&job.work_hours, ""),
            },
            details: Details {
                req_id,
                slug,
                language: or_default(&job.language, DEFAULT_LANGUAGE),
                languages: job.languages.clone(),
                categories: job.categories.clone(),
                benefits: job.benefits.clone(),
                tags: job.tags.clone(),
                source: job
                    .source
                    .clone()
                    .unwrap_or_else(|| self.default_source.clone()),
                status: or_default(&job.status, DEFAULT_STATUS),
            },
            dates: Dates {
                created: job.create_date.unwrap_or(now),
                updated: job.update_date.unwrap_or(now),
                published: job.publish_date.unwrap_or(now),
                expires: job.expire_date,
                posted_date: or_default(&job.posted_date, ""),
                posting_expiry_date: or_default(&job.posting_expiry_date, ""),
            },
            meta: Meta {
                region: or_default(&job.meta_data.region_description, ""),
                district: or_default(&job.meta_data.district_description, ""),
                location: or_default(&job.meta_data.domicile_location, ""),
                views: job.views.unwrap_or(0),
                applications: job.applications.unwrap_or(0),
                featured: job.featured,
                urgent: job.urgent,
                searchable: job.searchable,
                applyable: job.applyable,
                li_easy_applyable: job.li_easy_applyable,
            },
            title,
        }
    }
}

/// Map with the default vendor source literal.
pub fn map_to_canonical(job: &VendorJob) -> JobRecord {
    RecordMapper::default().map(job)
}

fn or_default(value: &Option<String>, fallback: &str) -> String {
    value.clone().unwrap_or_else(|| fallback.to_string())
}

pub fn load_batch_file(path: impl AsRef<Path>) -> Result<BatchFile> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// `*.json` files directly under `dir`, ordered by file name.
pub fn list_batch_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}
