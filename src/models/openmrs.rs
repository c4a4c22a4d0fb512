//! OpenMRS REST and FHIR resource records
//!
//! Only the fields the dashboard reads are modelled. Every field is optional
//! because the server omits them freely depending on the `v=` representation.
//! Each record owns its "which field holds the display text" fallback chain.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EMAIL_ATTRIBUTE_TYPE_UUID: &str = "58f43b5e-5311-4512-b0d4-24a2a7f3a4e2";

/// `{ "results": [...] }` envelope of the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultList<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// Any `{uuid, display, name}` reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Reference {
    pub fn label(&self) -> Option<&str> {
        non_empty(self.display.as_deref()).or_else(|| non_empty(self.name.as_deref()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user: Option<Reference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonName {
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonAttribute {
    #[serde(default)]
    pub attribute_type: Option<Reference>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl PersonAttribute {
    fn is_email(&self) -> bool {
        let Some(kind) = &self.attribute_type else {
            return false;
        };
        let display = kind.display.as_deref().unwrap_or("");
        display == "Email"
            || kind.uuid.as_deref() == Some(EMAIL_ATTRIBUTE_TYPE_UUID)
            || display.to_lowercase().contains("email")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birthdate: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub names: Vec<PersonName>,
    #[serde(default)]
    pub attributes: Vec<PersonAttribute>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub person: Option<Person>,
}

impl Patient {
    pub fn email(&self) -> Option<String> {
        self.person
            .as_ref()?
            .attributes
            .iter()
            .find(|a| a.is_email())
            .and_then(|a| a.value.as_ref())
            .and_then(value_text)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub visit_type: Option<Reference>,
    #[serde(default)]
    pub location: Option<Reference>,
    #[serde(default)]
    pub start_datetime: Option<String>,
    #[serde(default)]
    pub stop_datetime: Option<String>,
}

impl Visit {
    /// display, else "<type> - <location> (<date>)"
    pub fn display_text(&self) -> String {
        if let Some(display) = non_empty(self.display.as_deref()) {
            return display.to_string();
        }

        let visit_type = self
            .visit_type
            .as_ref()
            .and_then(Reference::label)
            .unwrap_or("Visit");
        let mut text = visit_type.to_string();
        if let Some(location) = self.location.as_ref().and_then(Reference::label) {
            text.push_str(" - ");
            text.push_str(location);
        }
        if let Some(start) = self.start_datetime.as_deref().and_then(parse_datetime) {
            text.push_str(&format!(" ({})", start.format("%-m/%-d/%Y")));
        }
        text
    }

    /// e.g. "Jan 5, 2024 at 09:30 AM"
    pub fn schedule_text(&self) -> Option<String> {
        let start = parse_datetime(self.start_datetime.as_deref()?)?;
        Some(start.format("%b %-d, %Y at %I:%M %p").to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedicationStatus {
    Active,
    Past,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationOrder {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub drug: Option<Reference>,
    #[serde(default)]
    pub concept: Option<Reference>,
    #[serde(default)]
    pub date_activated: Option<String>,
    /// null while the order is running
    #[serde(default)]
    pub date_stopped: Option<String>,
}

impl MedicationOrder {
    pub fn display_name(&self) -> String {
        non_empty(self.display.as_deref())
            .or_else(|| self.drug.as_ref().and_then(Reference::label))
            .or_else(|| self.concept.as_ref().and_then(Reference::label))
            .unwrap_or("Unknown Medication")
            .to_string()
    }

    pub fn status(&self) -> MedicationStatus {
        if self.date_stopped.is_none() {
            MedicationStatus::Active
        } else {
            MedicationStatus::Past
        }
    }

    pub fn is_active_aspirin(&self) -> bool {
        self.status() == MedicationStatus::Active
            && self
                .display
                .as_deref()
                .unwrap_or("")
                .to_lowercase()
                .contains("aspirin")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub name: Option<Reference>,
    #[serde(default)]
    pub units: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsOrder {
    #[serde(default)]
    pub order_type: Option<Reference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub concept: Option<Concept>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub value_text: Option<String>,
    #[serde(default)]
    pub value_numeric: Option<f64>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub obs_datetime: Option<String>,
    #[serde(default)]
    pub form_field_path: Option<String>,
    #[serde(default)]
    pub order: Option<ObsOrder>,
}

impl Observation {
    pub fn is_test_order(&self) -> bool {
        self.order
            .as_ref()
            .and_then(|o| o.order_type.as_ref())
            .and_then(|t| t.display.as_deref())
            == Some("Test Order")
    }

    pub fn test_name(&self) -> String {
        let concept = self.concept.as_ref();
        non_empty(concept.and_then(|c| c.display.as_deref()))
            .or_else(|| non_empty(self.display.as_deref()))
            .or_else(|| non_empty(concept.and_then(|c| c.name.as_ref()).and_then(|n| n.display.as_deref())))
            .unwrap_or("Unknown Test")
            .to_string()
    }

    pub fn result_text(&self) -> String {
        self.value
            .as_ref()
            .and_then(value_text)
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn units(&self) -> Option<&str> {
        non_empty(self.concept.as_ref().and_then(|c| c.units.as_deref()))
            .or_else(|| non_empty(self.units.as_deref()))
    }

    pub fn result_with_units(&self) -> String {
        match self.units() {
            Some(units) => format!("{} {}", self.result_text(), units),
            None => self.result_text(),
        }
    }

    /// value → valueText → valueNumeric
    pub fn any_value(&self) -> Option<Value> {
        self.value
            .clone()
            .filter(|v| !is_blank(v))
            .or_else(|| {
                non_empty(self.value_text.as_deref()).map(|t| Value::String(t.to_string()))
            })
            .or_else(|| self.value_numeric.map(Value::from))
    }

    pub fn concept_label(&self) -> String {
        let concept = self.concept.as_ref();
        non_empty(concept.and_then(|c| c.display.as_deref()))
            .or_else(|| non_empty(concept.and_then(|c| c.name.as_ref()).and_then(|n| n.display.as_deref())))
            .unwrap_or("")
            .to_string()
    }

    /// Text searched for LMP / EDD dates: value, else display
    pub fn date_source_text(&self) -> String {
        self.value
            .as_ref()
            .and_then(value_text)
            .or_else(|| non_empty(self.display.as_deref()).map(str::to_string))
            .unwrap_or_default()
    }

    pub fn form_field_matches(&self, exact: &str, fragment: &str) -> bool {
        match self.form_field_path.as_deref() {
            Some(path) => path == exact || path.contains(fragment),
            None => false,
        }
    }
}

// ===== FHIR R4 =====

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub coding: Vec<Coding>,
}

impl CodeableConcept {
    fn first_coding(&self) -> Option<&Coding> {
        self.coding.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntry<T> {
    pub resource: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle<T> {
    #[serde(default = "Vec::new")]
    pub entry: Vec<BundleEntry<T>>,
}

impl<T> Bundle<T> {
    pub fn into_resources(self) -> Vec<T> {
        self.entry.into_iter().map(|e| e.resource).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClinicalStatus {
    Active,
    Past,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub code: Option<CodeableConcept>,
    #[serde(default)]
    pub clinical_status: Option<CodeableConcept>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub onset_date_time: Option<String>,
}

impl Condition {
    pub fn diagnostic_name(&self) -> String {
        if let Some(code) = &self.code {
            if let Some(text) = non_empty(code.text.as_deref()) {
                return text.to_string();
            }
            if let Some(coding) = code.first_coding() {
                return non_empty(coding.display.as_deref())
                    .or_else(|| non_empty(coding.code.as_deref()))
                    .unwrap_or("Unknown Diagnosis")
                    .to_string();
            }
        }
        non_empty(self.display.as_deref())
            .unwrap_or("No diagnostic name available")
            .to_string()
    }

    /// Lower-cased clinical status code, if any field carries one
    pub fn status_code(&self) -> Option<String> {
        if let Some(status) = &self.clinical_status {
            if let Some(coding) = status.first_coding() {
                return Some(coding.code.clone().unwrap_or_default().to_lowercase());
            }
            if let Some(text) = status.text.as_deref() {
                return Some(text.to_lowercase());
            }
        }

        let code = self
            .code
            .as_ref()
            .and_then(CodeableConcept::first_coding)
            .and_then(|c| c.code.as_deref())
            .map(str::to_lowercase)?;
        matches!(code.as_str(), "active" | "resolved" | "inactive").then_some(code)
    }

    pub fn status(&self) -> ClinicalStatus {
        match self.status_code().as_deref() {
            None | Some("") => ClinicalStatus::Unknown,
            Some("active") => ClinicalStatus::Active,
            Some(_) => ClinicalStatus::Past,
        }
    }

    /// DD/MM/YYYY
    pub fn onset_text(&self) -> String {
        let Some(raw) = non_empty(self.onset_date_time.as_deref()) else {
            return "Not specified".to_string();
        };
        if let Some(dt) = parse_datetime(raw) {
            return dt.format("%d/%m/%Y").to_string();
        }
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => date.format("%d/%m/%Y").to_string(),
            Err(_) => "Invalid date".to_string(),
        }
    }
}

/// RFC 3339 or the OpenMRS `2024-01-05T09:30:00.000+0000` form
pub fn parse_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
}

/// Plain text of a JSON value: strings as-is, objects by display → name
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("display")
            .or_else(|| map.get("name"))
            .and_then(value_text)
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visit_display_fallbacks() {
        let visit: Visit = serde_json::from_value(json!({
            "visitType": { "name": "Antenatal" },
            "location": { "display": "Colombo Clinic" },
            "startDatetime": "2024-01-05T09:30:00.000+0000"
        }))
        .unwrap();
        assert_eq!(visit.display_text(), "Antenatal - Colombo Clinic (1/5/2024)");
        assert_eq!(visit.schedule_text().as_deref(), Some("Jan 5, 2024 at 09:30 AM"));

        let bare = Visit::default();
        assert_eq!(bare.display_text(), "Visit");
        assert!(bare.schedule_text().is_none());

        let named: Visit = serde_json::from_value(json!({ "display": "Facility Visit @ Unknown" })).unwrap();
        assert_eq!(named.display_text(), "Facility Visit @ Unknown");
    }

    #[test]
    fn test_medication_status_follows_date_stopped() {
        let active: MedicationOrder = serde_json::from_value(json!({
            "display": "Aspirin 81mg", "dateStopped": null
        }))
        .unwrap();
        assert_eq!(active.status(), MedicationStatus::Active);
        assert!(active.is_active_aspirin());

        let past: MedicationOrder = serde_json::from_value(json!({
            "drug": { "display": "Folic acid" }, "dateStopped": "2024-02-01T00:00:00.000+0000"
        }))
        .unwrap();
        assert_eq!(past.status(), MedicationStatus::Past);
        assert_eq!(past.display_name(), "Folic acid");
        assert_eq!(MedicationOrder::default().display_name(), "Unknown Medication");
    }

    #[test]
    fn test_observation_lab_fields() {
        let obs: Observation = serde_json::from_value(json!({
            "concept": { "display": "Haemoglobin", "units": "g/dL" },
            "value": 11.2,
            "order": { "orderType": { "display": "Test Order" } }
        }))
        .unwrap();
        assert!(obs.is_test_order());
        assert_eq!(obs.test_name(), "Haemoglobin");
        assert_eq!(obs.result_with_units(), "11.2 g/dL");

        let coded: Observation = serde_json::from_value(json!({
            "concept": { "name": { "display": "Urine protein" } },
            "value": { "display": "Negative" }
        }))
        .unwrap();
        assert!(!coded.is_test_order());
        assert_eq!(coded.test_name(), "Urine protein");
        assert_eq!(coded.result_with_units(), "Negative");
        assert_eq!(Observation::default().result_text(), "N/A");
    }

    #[test]
    fn test_condition_name_and_status() {
        let condition: Condition = serde_json::from_value(json!({
            "code": { "coding": [{ "code": "C123", "display": "History of pre-eclampsia" }] },
            "clinicalStatus": { "coding": [{ "code": "ACTIVE" }] },
            "onsetDateTime": "2023-04-01T00:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(condition.diagnostic_name(), "History of pre-eclampsia");
        assert_eq!(condition.status(), ClinicalStatus::Active);
        assert_eq!(condition.onset_text(), "01/04/2023");

        let resolved: Condition = serde_json::from_value(json!({
            "code": { "text": "Gestational diabetes", "coding": [{ "code": "resolved" }] },
            "onsetDateTime": "not a date"
        }))
        .unwrap();
        assert_eq!(resolved.diagnostic_name(), "Gestational diabetes");
        assert_eq!(resolved.status(), ClinicalStatus::Past);
        assert_eq!(resolved.onset_text(), "Invalid date");

        let empty = Condition::default();
        assert_eq!(empty.diagnostic_name(), "No diagnostic name available");
        assert_eq!(empty.status(), ClinicalStatus::Unknown);
        assert_eq!(empty.onset_text(), "Not specified");
    }

    #[test]
    fn test_patient_email_lookup() {
        let patient: Patient = serde_json::from_value(json!({
            "uuid": "p1",
            "person": {
                "attributes": [
                    { "attributeType": { "display": "Telephone Number" }, "value": "0771234567" },
                    { "attributeType": { "uuid": EMAIL_ATTRIBUTE_TYPE_UUID }, "value": "amma@example.org" }
                ]
            }
        }))
        .unwrap();
        assert_eq!(patient.email().as_deref(), Some("amma@example.org"));
        assert!(Patient::default().email().is_none());
    }

    #[test]
    fn test_bundle_without_entries() {
        let bundle: Bundle<Condition> =
            serde_json::from_value(json!({ "resourceType": "Bundle", "total": 0 })).unwrap();
        assert!(bundle.into_resources().is_empty());
    }
}
