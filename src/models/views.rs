//! Dashboard view-models built from OpenMRS records

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::openmrs::{
    parse_datetime, ClinicalStatus, Condition, MedicationOrder, MedicationStatus, Observation,
    Patient, Visit,
};

pub const FULL_TERM_WEEKS: i64 = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientSummary {
    pub name: String,
    pub gender: String,
    pub age: String,
    pub uuid: String,
    pub email: String,
    pub birthdate: Option<String>,
}

impl PatientSummary {
    pub fn from_patient(patient: &Patient, today: NaiveDate) -> Self {
        let person = patient.person.clone().unwrap_or_default();

        let name = person
            .names
            .first()
            .and_then(|n| {
                n.display.clone().filter(|d| !d.is_empty()).or_else(|| {
                    let joined = format!(
                        "{} {}",
                        n.given_name.as_deref().unwrap_or(""),
                        n.family_name.as_deref().unwrap_or("")
                    );
                    let joined = joined.trim();
                    (!joined.is_empty()).then(|| joined.to_string())
                })
            })
            .unwrap_or_else(|| "Unknown".to_string());

        let gender = capitalize(person.gender.as_deref().filter(|g| !g.is_empty()).unwrap_or("Unknown"));
        let age = person
            .age
            .map(i64::from)
            .or_else(|| {
                let birth = parse_date(person.birthdate.as_deref()?)?;
                Some(i64::from(calculate_age(birth, today)))
            })
            .map(|years| format!("{} years", years))
            .unwrap_or_else(|| "Unknown".to_string());

        Self {
            name,
            gender,
            age,
            uuid: patient.uuid.clone().unwrap_or_else(|| "N/A".to_string()),
            email: patient.email().unwrap_or_else(|| "Not available".to_string()),
            birthdate: person.birthdate,
        }
    }
}

/// Whole years, decremented until the birthday has passed this year
pub fn calculate_age(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentView {
    pub uuid: Option<String>,
    pub title: String,
    pub scheduled: Option<String>,
}

impl From<&Visit> for AppointmentView {
    fn from(visit: &Visit) -> Self {
        Self {
            uuid: visit.uuid.clone(),
            title: visit.display_text(),
            scheduled: visit.schedule_text(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicationView {
    pub uuid: Option<String>,
    pub name: String,
    pub status: MedicationStatus,
    pub date_activated: Option<String>,
}

impl From<&MedicationOrder> for MedicationView {
    fn from(order: &MedicationOrder) -> Self {
        Self {
            uuid: order.uuid.clone(),
            name: order.display_name(),
            status: order.status(),
            date_activated: order.date_activated.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabReportView {
    pub uuid: Option<String>,
    pub test: String,
    pub result: String,
}

impl From<&Observation> for LabReportView {
    fn from(obs: &Observation) -> Self {
        Self {
            uuid: obs.uuid.clone(),
            test: obs.test_name(),
            result: obs.result_with_units(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisView {
    pub id: Option<String>,
    pub name: String,
    pub status: ClinicalStatus,
    pub onset: String,
}

impl From<&Condition> for DiagnosisView {
    fn from(condition: &Condition) -> Self {
        Self {
            id: condition.id.clone(),
            name: condition.diagnostic_name(),
            status: condition.status(),
            onset: condition.onset_text(),
        }
    }
}

/// One dashboard section. A failed load keeps its error next to an empty list.
#[derive(Debug, Clone, Serialize)]
pub struct Section<T> {
    pub items: Vec<T>,
    pub error: Option<String>,
}

impl<T> Section<T> {
    pub fn loaded(items: Vec<T>) -> Self {
        Self { items, error: None }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            items: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub patient: PatientSummary,
    pub pregnancy: Option<PregnancyProgress>,
    pub appointments: Section<AppointmentView>,
    pub medications: Section<MedicationView>,
    pub lab_reports: Section<LabReportView>,
    pub diagnoses: Section<DiagnosisView>,
}

// ===== Pregnancy progress =====

static DATE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\d{4}-\d{2}-\d{2}", "%Y-%m-%d"),
        (r"\d{2}/\d{2}/\d{4}", "%d/%m/%Y"),
        (r"\d{2}-\d{2}-\d{4}", "%d-%m-%Y"),
    ]
    .into_iter()
    .filter_map(|(pattern, format)| Regex::new(pattern).ok().map(|re| (re, format)))
    .collect()
});

/// First date found in free text, trying ISO, then DD/MM/YYYY, then DD-MM-YYYY
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    DATE_PATTERNS.iter().find_map(|(pattern, format)| {
        let found = pattern.find(text)?;
        NaiveDate::parse_from_str(found.as_str(), format).ok()
    })
}

/// A form date as recorded: parsed when a date pattern matches, else the raw text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordedDate {
    Date(NaiveDate),
    Text(String),
}

impl RecordedDate {
    fn from_text(text: String) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        Some(match extract_date(&text) {
            Some(date) => Self::Date(date),
            None => Self::Text(text),
        })
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(date) => Some(*date),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gestation {
    pub weeks: i64,
    pub percent: f64,
    pub milestone: &'static str,
}

impl Gestation {
    /// None outside 0..=40 weeks
    pub fn since(lmp: NaiveDate, today: NaiveDate) -> Option<Self> {
        let weeks = (today - lmp).num_days().div_euclid(7);
        (0..=FULL_TERM_WEEKS).contains(&weeks).then(|| Self {
            weeks,
            percent: (weeks as f64 / FULL_TERM_WEEKS as f64 * 100.0).min(100.0),
            milestone: milestone(weeks),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PregnancyProgress {
    pub lmp: Option<RecordedDate>,
    pub edd: Option<RecordedDate>,
    /// Only when the LMP parsed as a date within term
    pub gestation: Option<Gestation>,
}

impl PregnancyProgress {
    /// None only when neither an LMP nor an EDD is recorded
    pub fn from_observations(observations: &[Observation], today: NaiveDate) -> Option<Self> {
        let lmp = find_form_date(observations, "rfe-forms-LMP", "LMP");
        let edd = find_form_date(observations, "rfe-forms-EDD", "EDD");
        if lmp.is_none() && edd.is_none() {
            return None;
        }

        let gestation = lmp
            .as_ref()
            .and_then(RecordedDate::date)
            .and_then(|date| Gestation::since(date, today));

        Some(Self {
            lmp,
            edd,
            gestation,
        })
    }
}

fn find_form_date(observations: &[Observation], exact: &str, fragment: &str) -> Option<RecordedDate> {
    observations
        .iter()
        .find(|obs| obs.form_field_matches(exact, fragment))
        .and_then(|obs| RecordedDate::from_text(obs.date_source_text()))
}

pub fn milestone(weeks: i64) -> &'static str {
    match weeks {
        w if w < 4 => "Early development",
        w if w < 8 => "Embryo forming",
        w if w < 12 => "Fetus developing",
        w if w < 16 => "Growing rapidly",
        w if w < 20 => "Anatomy scan",
        w if w < 24 => "Viability milestone",
        w if w < 28 => "Third trimester",
        w if w < 32 => "Rapid growth",
        w if w < 36 => "Near term",
        _ => "Full term",
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    parse_datetime(raw)
        .map(|dt| dt.date_naive())
        .or_else(|| NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
