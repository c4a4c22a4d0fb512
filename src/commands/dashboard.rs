use crate::models::{AppConfig, Dashboard};
use crate::modules::advisory::{self, HealthAdvisor};
use crate::modules::openmrs::OpenMrsClient;
use crate::modules::tracker::{RequestTracker, Subscription};
use serde::Serialize;
use std::sync::Arc;

/// Health advisory outcome for one patient
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvisoryOutcome {
    NotRegistered,
    NotEligible,
    Advisory { message: String },
}

/// Log the loading overlay and error banner transitions
fn watch(tracker: &Arc<RequestTracker>) -> Subscription {
    tracker.subscribe(
        |loading| {
            if loading {
                tracing::info!("Loading...");
            } else {
                tracing::info!("Loading finished");
            }
        },
        |error| match error {
            Some(message) => tracing::error!("OpenMRS error: {}", message),
            None => tracing::debug!("Error banner cleared"),
        },
    )
}

/// `dashboard`: patient lookup plus every dashboard section
pub async fn load_dashboard(config: &AppConfig, email: &str) -> anyhow::Result<Option<Dashboard>> {
    let tracker = RequestTracker::new();
    let _subscription = watch(&tracker);

    let client = OpenMrsClient::from_config(config, tracker)?;
    let today = chrono::Local::now().date_naive();
    Ok(client.load_dashboard(email, today).await?)
}

/// `advisory`: eligibility check, then the LLM advisory
pub async fn health_advisory(config: &AppConfig, email: &str) -> anyhow::Result<AdvisoryOutcome> {
    let tracker = RequestTracker::new();
    let _subscription = watch(&tracker);

    let client = OpenMrsClient::from_config(config, tracker.clone())?;
    let Some(record) = client.load_patient_record(email).await? else {
        return Ok(AdvisoryOutcome::NotRegistered);
    };

    if !advisory::is_eligible(&record.conditions, &record.medications) {
        tracing::info!("Patient is not eligible for the pre-eclampsia advisory");
        return Ok(AdvisoryOutcome::NotEligible);
    }

    let advisor = HealthAdvisor::new(config.advisory.clone(), tracker);
    Ok(AdvisoryOutcome::Advisory {
        message: advisor.generate(&record).await,
    })
}
