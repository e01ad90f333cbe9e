//! Rendering context: the decrypted projection of report, exam, patient and physician.
//!
//! Nothing here is persisted. Values arrive as plain strings straight from the records and are
//! validated field by field while rendering, so one malformed value never aborts the document.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClinicHeader {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientSection {
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
}

/// Exam data. Numeric metrics are kept as the raw stored strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamSection {
    pub exam_type: String,
    pub performed_at: Option<DateTime<Utc>>,
    pub requesting_physician: Option<String>,
    pub height_cm: Option<String>,
    pub weight_kg: Option<String>,
    pub heart_rate_bpm: Option<String>,
    pub pr_interval_ms: Option<String>,
    pub qrs_duration_ms: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicianSection {
    pub name: String,
    /// CRM registration with state, e.g. `CRM-SP 123456`.
    pub crm: Option<String>,
}

/// Everything the renderer needs for one report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub clinic: ClinicHeader,
    pub patient: PatientSection,
    pub exam: ExamSection,
    pub physician: PhysicianSection,
    pub conclusion: String,
    /// Public verification link, drawn as QR code plus text.
    pub public_url: Option<String>,
    /// Selects the digital seal instead of the blank signature line.
    pub digitally_signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    pub verification_code: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportDocument {
    /// Patient age at the document date, if the birth date is known and not in the future.
    pub fn patient_age(&self) -> Option<u32> {
        self.patient
            .birth_date
            .and_then(|birth| age_on(birth, self.generated_at.date_naive()))
    }

    /// Conclusion split into non-empty paragraphs.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.conclusion
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Calendar age in whole years.
///
/// The year difference is reduced by one until the birthday's month/day has been reached, so a
/// birthday falling on `on` already counts. Returns `None` for birth dates after `on`.
pub fn age_on(birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    if birth > on {
        return None;
    }
    let mut years = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Parses a stored numeric metric.
///
/// Accepts a decimal comma (`"72,5"`). Blank, non-numeric, non-finite and negative values yield
/// `None` so the field is omitted rather than printed as zero.
pub fn parse_metric(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Formats a metric with a decimal comma, dropping a zero fraction.
pub(crate) fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}").replace('.', ",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_birthday_today() {
        assert_eq!(age_on(date(1990, 5, 17), date(2024, 5, 17)), Some(34));
    }

    #[test]
    fn age_day_before_birthday_is_one_less() {
        assert_eq!(age_on(date(1990, 5, 17), date(2024, 5, 16)), Some(33));
    }

    #[test]
    fn age_leap_day_birthday() {
        assert_eq!(age_on(date(2000, 2, 29), date(2023, 2, 28)), Some(22));
        assert_eq!(age_on(date(2000, 2, 29), date(2023, 3, 1)), Some(23));
    }

    #[test]
    fn age_rejects_future_birth() {
        assert_eq!(age_on(date(2030, 1, 1), date(2024, 1, 1)), None);
        assert_eq!(age_on(date(2024, 1, 1), date(2024, 1, 1)), Some(0));
    }

    #[test]
    fn metrics_parse_or_omit() {
        assert_eq!(parse_metric("72,5"), Some(72.5));
        assert_eq!(parse_metric(" 180 "), Some(180.0));
        assert_eq!(parse_metric(""), None);
        assert_eq!(parse_metric("abc"), None);
        assert_eq!(parse_metric("NaN"), None);
        assert_eq!(parse_metric("-3"), None);
    }

    #[test]
    fn metric_formatting_uses_decimal_comma() {
        assert_eq!(format_metric(72.5), "72,5");
        assert_eq!(format_metric(180.0), "180");
    }

    #[test]
    fn paragraphs_skip_blank_lines() {
        let doc = ReportDocument {
            clinic: ClinicHeader::default(),
            patient: PatientSection::default(),
            exam: ExamSection::default(),
            physician: PhysicianSection::default(),
            conclusion: "Ritmo sinusal.\n\n   \nSem alterações.".into(),
            public_url: None,
            digitally_signed: false,
            signed_at: None,
            verification_code: "ABCD".into(),
            generated_at: Utc::now(),
        };
        let paragraphs: Vec<_> = doc.paragraphs().collect();
        assert_eq!(paragraphs, vec!["Ritmo sinusal.", "Sem alterações."]);
    }
}
