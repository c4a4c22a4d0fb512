//! Dashboard data layer: OpenMRS REST and FHIR reads
//!
//! Every request is counted by the shared [`RequestTracker`], so the loading
//! overlay and the error banner follow these calls without each call site
//! reporting anything.

use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::openmrs::{
    Bundle, Condition, MedicationOrder, Observation, Patient, ResultList, Session, Visit,
};
use crate::models::views::{
    AppointmentView, Dashboard, DiagnosisView, LabReportView, MedicationView, PatientSummary,
    PregnancyProgress, Section,
};
use crate::models::AppConfig;
use crate::modules::tracker::RequestTracker;
use crate::proxy::ProxyTarget;

pub const MEDICATION_ORDER_TYPE: &str = "131168f4-15f5-102d-96e4-000c29c2a5d7";
pub const TEST_ORDER_TYPE: &str = "52a447d3-a64a-11e3-9aeb-50e549534c5e";

/// Where requests go
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// Through the credential-injecting gateway, e.g. `http://localhost:3001/api/openmrs`
    Gateway(String),
    /// Straight to the OpenMRS host with Basic auth
    Direct(ProxyTarget),
}

pub struct OpenMrsClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    tracker: Arc<RequestTracker>,
}

/// Everything the health advisory needs about one patient
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient: Patient,
    pub medications: Vec<MedicationOrder>,
    pub observations: Vec<Observation>,
    pub conditions: Vec<Condition>,
}

impl OpenMrsClient {
    pub fn new(endpoint: Endpoint, tracker: Arc<RequestTracker>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            tracker,
        }
    }

    /// Gateway or direct mode according to `client.use_proxy`
    pub fn from_config(config: &AppConfig, tracker: Arc<RequestTracker>) -> AppResult<Self> {
        let endpoint = if config.client.use_proxy {
            Endpoint::Gateway(config.client.gateway_url.trim_end_matches('/').to_string())
        } else {
            Endpoint::Direct(ProxyTarget::from_config(&config.gateway)?)
        };
        info!("OpenMRS client mode: {:?}", endpoint);
        Ok(Self::new(endpoint, tracker))
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    fn resource_url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        match &self.endpoint {
            Endpoint::Gateway(base) => {
                let mut url = format!("{}/{}", base, path.trim_start_matches('/'));
                if !query.is_empty() {
                    url.push('?');
                    url.push_str(&query);
                }
                url
            }
            Endpoint::Direct(target) => target.upstream_url(path, &query),
        }
    }

    /// GET a resource and decode it. Non-2xx answers become an error message
    /// carrying the status code and reason.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let url = self.resource_url(path, query);
        debug!("OpenMRS request: GET {}", url);

        self.tracker
            .track(async {
                let mut request = self
                    .http
                    .get(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, "application/json");
                if let Endpoint::Direct(target) = &self.endpoint {
                    request = request.header(AUTHORIZATION, target.authorization());
                }

                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let message = format!(
                        "Failed to fetch data from OpenMRS: {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    );
                    warn!("{}", message.trim_end());
                    return Err(AppError::OpenMrs(message.trim_end().to_string()));
                }

                Ok(response.json::<T>().await?)
            })
            .await
    }

    pub async fn login(&self) -> AppResult<Session> {
        self.fetch_json("ws/rest/v1/session", &[]).await
    }

    /// `Ok(None)` when no patient carries this email ("User not registered").
    /// A failed login is logged and the search still runs.
    pub async fn search_patient_by_email(&self, email: &str) -> AppResult<Option<Patient>> {
        match self.login().await {
            Ok(session) if !session.authenticated => {
                warn!("OpenMRS session is not authenticated")
            }
            Ok(_) => {}
            Err(e) => warn!("OpenMRS login failed, searching anyway: {}", e),
        }

        let found: ResultList<Patient> = self
            .fetch_json(
                "ws/rest/v1/patient",
                &[("q", email), ("limit", "1"), ("v", "default")],
            )
            .await?;
        let Some(hit) = found.results.into_iter().next() else {
            info!("No patient registered for {}", email);
            return Ok(None);
        };

        let Some(uuid) = hit.uuid.clone() else {
            return Ok(Some(hit));
        };
        match self.patient_details(&uuid).await {
            Ok(full) => Ok(Some(full)),
            Err(e) => {
                warn!("Falling back to search result for patient {}: {}", uuid, e);
                Ok(Some(hit))
            }
        }
    }

    pub async fn patient_details(&self, uuid: &str) -> AppResult<Patient> {
        self.fetch_json(&format!("ws/rest/v1/patient/{}", uuid), &[("v", "full")])
            .await
    }

    pub async fn visits(&self, patient_uuid: &str) -> AppResult<Vec<Visit>> {
        let list: ResultList<Visit> = self
            .fetch_json("ws/rest/v1/visit", &[("patient", patient_uuid)])
            .await?;
        Ok(list.results)
    }

    pub async fn medication_orders(&self, patient_uuid: &str) -> AppResult<Vec<MedicationOrder>> {
        let list: ResultList<MedicationOrder> = self
            .fetch_json(
                "ws/rest/v1/order",
                &[
                    ("patient", patient_uuid),
                    ("orderType", MEDICATION_ORDER_TYPE),
                    ("v", "full"),
                ],
            )
            .await?;
        Ok(list.results)
    }

    /// Observations attached to test orders
    pub async fn lab_observations(&self, patient_uuid: &str) -> AppResult<Vec<Observation>> {
        let list: ResultList<Observation> = self
            .fetch_json(
                "ws/rest/v1/obs",
                &[
                    ("orderType", TEST_ORDER_TYPE),
                    ("patient", patient_uuid),
                    ("v", "full"),
                ],
            )
            .await?;
        Ok(list
            .results
            .into_iter()
            .filter(Observation::is_test_order)
            .collect())
    }

    pub async fn observations(&self, patient_uuid: &str) -> AppResult<Vec<Observation>> {
        let list: ResultList<Observation> = self
            .fetch_json(
                "ws/rest/v1/obs",
                &[("patient", patient_uuid), ("v", "full")],
            )
            .await?;
        Ok(list.results)
    }

    pub async fn conditions(&self, patient_uuid: &str) -> AppResult<Vec<Condition>> {
        let bundle: Bundle<Condition> = self
            .fetch_json("ws/fhir2/R4/Condition", &[("patient", patient_uuid)])
            .await?;
        Ok(bundle.into_resources())
    }

    /// Patient lookup followed by the per-patient loads, run concurrently.
    /// A failed section is left empty with its error; the lookup itself must succeed.
    pub async fn load_dashboard(&self, email: &str, today: NaiveDate) -> AppResult<Option<Dashboard>> {
        let Some(patient) = self.search_patient_by_email(email).await? else {
            return Ok(None);
        };
        let uuid = patient.uuid.clone().unwrap_or_default();

        let (visits, medications, labs, observations, conditions) = futures::join!(
            self.visits(&uuid),
            self.medication_orders(&uuid),
            self.lab_observations(&uuid),
            self.observations(&uuid),
            self.conditions(&uuid),
        );

        let pregnancy = observations
            .as_ref()
            .ok()
            .and_then(|obs| PregnancyProgress::from_observations(obs, today));

        Ok(Some(Dashboard {
            patient: PatientSummary::from_patient(&patient, today),
            pregnancy,
            appointments: section(visits, |r| AppointmentView::from(r)),
            medications: section(medications, |r| MedicationView::from(r)),
            lab_reports: section(labs, |r| LabReportView::from(r)),
            diagnoses: section(conditions, |r| DiagnosisView::from(r)),
        }))
    }

    /// Patient plus the records the health advisory reads
    pub async fn load_patient_record(&self, email: &str) -> AppResult<Option<PatientRecord>> {
        let Some(patient) = self.search_patient_by_email(email).await? else {
            return Ok(None);
        };
        let uuid = patient.uuid.clone().unwrap_or_default();

        let (medications, observations, conditions) = futures::join!(
            self.medication_orders(&uuid),
            self.observations(&uuid),
            self.conditions(&uuid),
        );

        Ok(Some(PatientRecord {
            patient,
            medications: medications?,
            observations: observations?,
            conditions: conditions?,
        }))
    }
}

fn section<R, V>(loaded: AppResult<Vec<R>>, view: impl Fn(&R) -> V) -> Section<V> {
    match loaded {
        Ok(records) => Section::loaded(records.iter().map(view).collect()),
        Err(e) => Section::failed(e),
    }
}
