pub mod config;
pub mod openmrs;
pub mod views;

pub use config::{AdvisoryConfig, AppConfig, ClientConfig, LlmProvider};
pub use openmrs::{
    Bundle, ClinicalStatus, Condition, MedicationOrder, MedicationStatus, Observation, Patient,
    ResultList, Session, Visit,
};
pub use views::{Dashboard, Gestation, PatientSummary, PregnancyProgress, RecordedDate, Section};
