//! Flattened CSV export of every stored job record.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use jobsync_core::{JobRecord, StoredJob};
use jobsync_storage::JobStore;
use tracing::info;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
pub const DELIMITER: u8 = b';';

/// Header labels, in output order.
pub const COLUMNS: [&str; 48] = [
    "Job Title",
    "Description",
    "Company Name",
    "Location Full",
    "Location Short",
    "City",
    "State",
    "Country",
    "Location Name",
    "Street Address",
    "Postal Code",
    "Latitude",
    "Longitude",
    "Salary Currency",
    "Salary Value",
    "Salary Min",
    "Salary Max",
    "Employment Type",
    "Employment Level",
    "Brand",
    "Internal",
    "Apply URL",
    "Work Hours",
    "Req ID",
    "Slug",
    "Language",
    "Languages",
    "Categories",
    "Benefits",
    "Tags",
    "Source",
    "Status",
    "Created Date",
    "Updated Date",
    "Published Date",
    "Expiry Date",
    "Posted Date",
    "Posting Expiry Date",
    "Region",
    "District",
    "Location Meta",
    "Views",
    "Applications",
    "Featured",
    "Urgent",
    "Searchable",
    "Applyable",
    "LinkedIn Easy Apply",
];

const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub rows: usize,
}

/// Flatten a record into cells matching [`COLUMNS`].
pub fn report_row(record: &JobRecord) -> Vec<String> {
    let location = &record.location;
    let salary = &record.salary;
    let employment = &record.employment;
    let details = &record.details;
    let dates = &record.dates;
    let meta = &record.meta;

    vec![
        record.title.clone(),
        record.description.clone(),
        record.company.name.clone(),
        location.full.clone(),
        location.short.clone(),
        location.city.clone(),
        location.state.clone(),
        location.country.clone(),
        location.name.clone(),
        location.street_address.clone(),
        location.postal_code.clone(),
        location.coordinates.latitude.to_string(),
        location.coordinates.longitude.to_string(),
        salary.currency.clone(),
        salary.value.to_string(),
        salary.min.to_string(),
        salary.max.to_string(),
        employment.employment_type.to_string(),
        employment.level.to_string(),
        employment.brand.clone(),
        employment.internal.to_string(),
        employment.apply_url.clone(),
        employment.work_hours.clone(),
        details.req_id.clone(),
        details.slug.clone(),
        details.language.clone(),
        details.languages.join(LIST_SEPARATOR),
        details.categories.join(LIST_SEPARATOR),
        details.benefits.join(LIST_SEPARATOR),
        details.tags.join(LIST_SEPARATOR),
        details.source.clone(),
        details.status.clone(),
        format_date(&dates.created),
        format_date(&dates.updated),
        format_date(&dates.published),
        dates.expires.as_ref().map(format_date).unwrap_or_default(),
        dates.posted_date.clone(),
        dates.posting_expiry_date.clone(),
        meta.region.clone(),
        meta.district.clone(),
        meta.location.clone(),
        meta.views.to_string(),
        meta.applications.to_string(),
        meta.featured.to_string(),
        meta.urgent.to_string(),
        meta.searchable.to_string(),
        meta.applyable.to_string(),
        meta.li_easy_applyable.to_string(),
    ]
}

fn format_date(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write the BOM, the header row and one row per job.
pub fn export_csv<W: Write>(mut out: W, jobs: &[StoredJob]) -> Result<ReportSummary> {
    out.write_all(UTF8_BOM).context("writing byte order mark")?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .from_writer(out);

    writer.write_record(COLUMNS).context("writing report header")?;
    for job in jobs {
        writer
            .write_record(report_row(&job.record))
            .with_context(|| format!("writing report row for reqId {}", job.record.req_id()))?;
    }
    writer.flush().context("flushing report")?;

    Ok(ReportSummary { rows: jobs.len() })
}

/// Export the whole store to `path`, replacing any previous report.
pub async fn write_report(store: &dyn JobStore, path: &Path) -> Result<ReportSummary> {
    let total = store.count().await.context("counting job documents")?;
    info!(total, "total job listings");

    let jobs = store.find_all().await.context("loading job documents")?;
    let mut buffer = Vec::new();
    let summary = export_csv(&mut buffer, &jobs)?;
    tokio::fs::write(path, buffer)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    info!(rows = summary.rows, path = %path.display(), "csv report generated");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobsync_adapters::{RecordMapper, VendorJob};
    use jobsync_storage::MemoryJobStore;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_record() -> JobRecord {
        let vendor = VendorJob::from_value(&json!({
            "req_id": "RC-77",
            "title": "Package Handler; Night",
            "hiring_organization": "FedEx Ground",
            "city": "Memphis",
            "latitude": 35.1,
            "salary_value": "12",
            "salary_max_value": 12.5,
            "employment_type": "PART_TIME",
            "employment_level": "Senior",
            "tags": ["night", "warehouse"],
            "featured": "yes",
            "create_date": "2024-03-01T08:30:00Z"
        }))
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        RecordMapper::default().map_at(&vendor, now)
    }

    fn cell<'a>(row: &'a [String], column: &str) -> &'a str {
        let idx = COLUMNS.iter().position(|c| *c == column).unwrap();
        &row[idx]
    }

    #[test]
    fn row_width_matches_header() {
        assert_eq!(report_row(&sample_record()).len(), COLUMNS.len());
    }

    #[test]
    fn cells_use_report_formatting() {
        let row = report_row(&sample_record());
        assert_eq!(cell(&row, "Company Name"), "FedEx Ground");
        assert_eq!(cell(&row, "Latitude"), "35.1");
        assert_eq!(cell(&row, "Longitude"), "0");
        assert_eq!(cell(&row, "Salary Value"), "12");
        assert_eq!(cell(&row, "Salary Max"), "12.5");
        assert_eq!(cell(&row, "Employment Type"), "part-time");
        assert_eq!(cell(&row, "Employment Level"), "senior");
        assert_eq!(cell(&row, "Tags"), "night, warehouse");
        assert_eq!(cell(&row, "Created Date"), "2024-03-01T08:30:00.000Z");
        assert_eq!(cell(&row, "Expiry Date"), "");
        assert_eq!(cell(&row, "Internal"), "false");
        assert_eq!(cell(&row, "Featured"), "true");
    }

    #[test]
    fn export_starts_with_bom_and_semicolon_header() {
        let stored = StoredJob {
            id: Uuid::nil(),
            record: sample_record(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut out = Vec::new();
        let summary = export_csv(&mut out, &[stored]).unwrap();
        assert_eq!(summary.rows, 1);
        assert!(out.starts_with(UTF8_BOM));

        let text = String::from_utf8(out[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(";"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"Package Handler; Night\";;FedEx Ground;"));
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn write_report_exports_every_stored_job() {
        let store = MemoryJobStore::new();
        let mut second = sample_record();
        second.details.req_id = "RC-78".to_string();
        store.upsert_by_req_id(&sample_record()).await.unwrap();
        store.upsert_by_req_id(&second).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs_report.csv");
        let summary = write_report(&store, &path).await.unwrap();
        assert_eq!(summary.rows, 2);

        let bytes = std::fs::read(&path).unwrap();
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains(";RC-77;"));
        assert!(text.contains(";RC-78;"));
    }

    #[tokio::test]
    async fn empty_store_yields_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let summary = write_report(&MemoryJobStore::new(), &path).await.unwrap();
        assert_eq!(summary.rows, 0);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(String::from_utf8_lossy(&bytes[3..]).lines().count(), 1);
    }
}
