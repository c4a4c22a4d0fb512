//! Pre-eclampsia health advisory
//!
//! Patients with an active history of pre-eclampsia who are on aspirin get a
//! short LLM-written explanation. Only age, gender, the hypertension/diabetes
//! form answers and the active aspirin orders leave the system.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::config::{AdvisoryConfig, LlmProvider};
use crate::models::openmrs::{
    ClinicalStatus, Condition, MedicationOrder, MedicationStatus, Observation, Patient,
};
use crate::modules::openmrs::PatientRecord;
use crate::modules::tracker::RequestTracker;

pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
const MAX_TOKENS: u32 = 500;

const PRE_ECLAMPSIA: &str = "history of pre-eclampsia";
const ADVISOR_ROLE: &str =
    "You are a gentle, supportive Health Advisor who provides clear, empathetic health information to patients.";
const RISK_FORM_FIELDS: [&str; 2] = ["rfe-forms-Hypertension", "rfe-forms-Diabetes"];

pub const FALLBACK_ADVISORY: &str = r#"## 💊 Why aspirin has been given

Low-dose Aspirin is often prescribed during pregnancy for women at risk of pre-eclampsia, particularly those with conditions like Diabetes or Hypertension. Research has shown that taking a low dose of Aspirin (typically 81mg) daily can help reduce the risk of developing pre-eclampsia by improving blood flow to the placenta and reducing inflammation.

## 🩺 Pre-eclampsia

Pre-eclampsia is a pregnancy complication characterized by high blood pressure and signs of damage to another organ system, most often the liver and kidneys. It typically begins after 20 weeks of pregnancy and can affect both the mother and the developing baby.

## ⚠️ Importance of taking it

Taking Aspirin as prescribed is crucial for managing pre-eclampsia risk. It helps improve blood flow to the placenta, which is essential for your baby's growth and development. Consistent use can significantly reduce the risk of complications for both you and your baby.

## 🌱 Life style

1. **Regular Prenatal Care:** Attend all scheduled prenatal appointments to monitor your blood pressure and overall health. Regular check-ups allow your healthcare provider to detect any changes early and adjust your treatment plan as needed.

2. **Healthy Diet:** Focus on a balanced diet rich in fruits, vegetables, whole grains, and lean proteins. Limit processed foods and sodium intake. A nutritious diet supports healthy blood pressure and provides essential nutrients for your baby's development.

3. **Stay Hydrated:** Drink plenty of water throughout the day to support healthy blood circulation. Proper hydration helps maintain blood volume and can support healthy blood pressure levels.

4. **Rest and Sleep:** Ensure you get adequate rest and sleep, as fatigue can impact blood pressure. Aim for 7-9 hours of quality sleep each night and take breaks during the day when needed.

5. **Monitor Symptoms:** Be aware of warning signs such as severe headaches, vision changes, or sudden swelling, and contact your healthcare provider immediately if these occur."#;

/// Active pre-eclampsia history and an active aspirin order
pub fn is_eligible(conditions: &[Condition], medications: &[MedicationOrder]) -> bool {
    let at_risk = conditions.iter().any(|c| {
        c.status() == ClinicalStatus::Active && c.diagnostic_name().to_lowercase() == PRE_ECLAMPSIA
    });
    at_risk && medications.iter().any(MedicationOrder::is_active_aspirin)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPatient {
    pub age: Option<u32>,
    pub gender: Option<String>,
}

impl From<&Patient> for PromptPatient {
    fn from(patient: &Patient) -> Self {
        let person = patient.person.as_ref();
        Self {
            age: person.and_then(|p| p.age),
            gender: person.and_then(|p| p.gender.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptObservation {
    pub form_field_path: String,
    pub display: String,
    pub value: Option<Value>,
    pub concept: String,
    pub obs_datetime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMedication {
    pub display_name: String,
    pub status: MedicationStatus,
    pub date_activated: Option<String>,
    pub date_stopped: Option<String>,
}

pub fn risk_observations(observations: &[Observation]) -> Vec<PromptObservation> {
    observations
        .iter()
        .filter(|obs| {
            obs.form_field_path
                .as_deref()
                .is_some_and(|path| RISK_FORM_FIELDS.contains(&path))
        })
        .map(|obs| PromptObservation {
            form_field_path: obs.form_field_path.clone().unwrap_or_default(),
            display: obs.display.clone().unwrap_or_default(),
            value: obs.any_value(),
            concept: obs.concept_label(),
            obs_datetime: obs.obs_datetime.clone(),
        })
        .collect()
}

pub fn active_aspirin(medications: &[MedicationOrder]) -> Vec<PromptMedication> {
    medications
        .iter()
        .filter(|m| m.is_active_aspirin())
        .map(|m| PromptMedication {
            display_name: m.display.clone().unwrap_or_default(),
            status: m.status(),
            date_activated: m.date_activated.clone(),
            date_stopped: m.date_stopped.clone(),
        })
        .collect()
}

pub fn build_prompt(record: &PatientRecord) -> AppResult<String> {
    let patient = serde_json::to_string(&PromptPatient::from(&record.patient))?;
    let observations = serde_json::to_string(&risk_observations(&record.observations))?;
    let aspirin = serde_json::to_string(&active_aspirin(&record.medications))?;

    Ok(format!(
        r#"Now act as my health advisor, suggest in a gentle and empathetic way:

1. "💊 Why aspirin has been given" – describe using limited words (30–45), and mention which diagnosis (Hypertension or Diabetes) is relevant.

2. "🩺 Pre-eclampsia" – briefly explain what Pre-eclampsia is and why it matters during pregnancy, using limited words (20–45).

3. "⚠️ Importance of taking it" – provide a limited-word description explaining why it is important for the patient to take the medication.

4. "🌱 Life style" – provide 3–5 short, positive lifestyle suggestions tailored for the identified diagnosis to help reduce the risk of pre-eclampsia. Each suggestion must contain 30–50 words.

You are acting as a doctor. Analyze the following patient data to understand:
- Why aspirin has been given and which diagnosis causes the risk.
- Which diagnosis increases the patient's chance of developing pre-eclampsia.

Patient Information (age and gender only):
{patient}

Filtered Diagnosis Observations (Hypertension/Diabetes only):
{observations}

Aspirin Medication:
{aspirin}

Format the response with clear sections using ## for main headings with the icons (💊, 🩺, ⚠️, 🌱). Be warm, supportive, and easy to understand."#
    ))
}

/// A fully prepared provider request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

pub struct HealthAdvisor {
    http: reqwest::Client,
    config: AdvisoryConfig,
    tracker: Arc<RequestTracker>,
}

impl HealthAdvisor {
    pub fn new(config: AdvisoryConfig, tracker: Arc<RequestTracker>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            tracker,
        }
    }

    pub fn endpoint(&self) -> String {
        if let Some(url) = self.config.api_url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        match self.config.provider {
            LlmProvider::Anthropic => ANTHROPIC_URL.to_string(),
            LlmProvider::OpenAi | LlmProvider::Custom => OPENAI_URL.to_string(),
        }
    }

    pub fn build_request(&self, api_key: &str, prompt: &str) -> LlmRequest {
        let model = self.config.model.as_deref().filter(|m| !m.is_empty());

        let (headers, body) = match self.config.provider {
            LlmProvider::Anthropic => (
                vec![
                    ("x-api-key", api_key.to_string()),
                    ("anthropic-version", ANTHROPIC_VERSION.to_string()),
                ],
                json!({
                    "model": model.unwrap_or(DEFAULT_ANTHROPIC_MODEL),
                    "max_tokens": MAX_TOKENS,
                    "messages": [
                        { "role": "user", "content": format!("{}\n\n{}", ADVISOR_ROLE, prompt) }
                    ]
                }),
            ),
            LlmProvider::OpenAi | LlmProvider::Custom => (
                vec![("authorization", format!("Bearer {}", api_key))],
                json!({
                    "model": model.unwrap_or(DEFAULT_OPENAI_MODEL),
                    "messages": [
                        { "role": "system", "content": ADVISOR_ROLE },
                        { "role": "user", "content": prompt }
                    ],
                    "temperature": 0.7,
                    "max_tokens": MAX_TOKENS
                }),
            ),
        };

        LlmRequest {
            url: self.endpoint(),
            headers,
            body,
        }
    }

    /// Advisory text for an eligible patient. Never fails: any problem with
    /// the provider yields [`FALLBACK_ADVISORY`].
    pub async fn generate(&self, record: &PatientRecord) -> String {
        match self.request_advisory(record).await {
            Ok(message) => message,
            Err(e) => {
                warn!("Using fallback advisory: {}", e);
                FALLBACK_ADVISORY.to_string()
            }
        }
    }

    async fn request_advisory(&self, record: &PatientRecord) -> AppResult<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Llm("LLM API key not configured".to_string()))?;

        let prompt = build_prompt(record)?;
        let request = self.build_request(api_key, &prompt);
        info!(
            "Requesting health advisory from {:?} at {}",
            self.config.provider, request.url
        );

        self.tracker
            .track(async {
                let mut builder = self.http.post(&request.url).json(&request.body);
                for (name, value) in &request.headers {
                    builder = builder.header(*name, value);
                }

                let response = builder.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    warn!("LLM API error {}: {}", status, text);
                    return Err(AppError::Llm(format!(
                        "LLM API error: {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    )));
                }

                let data: Value = response.json().await?;
                extract_message(self.config.provider, &data)
                    .ok_or_else(|| AppError::Llm("No response from LLM".to_string()))
            })
            .await
    }
}

/// OpenAI-style `choices[0].message.content` or Anthropic `content[0].text`
pub fn extract_message(provider: LlmProvider, data: &Value) -> Option<String> {
    let message = match provider {
        LlmProvider::Anthropic => data.pointer("/content/0/text"),
        LlmProvider::OpenAi | LlmProvider::Custom => data.pointer("/choices/0/message/content"),
    };
    message
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubReply, StubUpstream};

    fn record() -> PatientRecord {
        PatientRecord {
            patient: serde_json::from_value(json!({
                "uuid": "p1",
                "person": { "age": 31, "gender": "F", "names": [{ "display": "Private Name" }] }
            }))
            .unwrap(),
            medications: serde_json::from_value(json!([
                { "display": "Aspirin 75mg", "dateStopped": null, "dateActivated": "2024-02-01" },
                { "display": "Aspirin 81mg", "dateStopped": "2023-12-01" },
                { "display": "Folic acid", "dateStopped": null }
            ]))
            .unwrap(),
            observations: serde_json::from_value(json!([
                { "formFieldPath": "rfe-forms-Hypertension", "display": "Hypertension: Yes",
                  "value": { "display": "Yes" }, "concept": { "display": "Hypertension" } },
                { "formFieldPath": "rfe-forms-Diabetes", "valueNumeric": 7.2 },
                { "formFieldPath": "rfe-forms-LMP", "value": "2024-01-01" }
            ]))
            .unwrap(),
            conditions: serde_json::from_value(json!([
                { "code": { "text": "History of Pre-eclampsia" },
                  "clinicalStatus": { "coding": [{ "code": "active" }] } }
            ]))
            .unwrap(),
        }
    }

    fn advisor(provider: LlmProvider, api_url: Option<String>, api_key: Option<&str>) -> HealthAdvisor {
        HealthAdvisor::new(
            AdvisoryConfig {
                provider,
                api_key: api_key.map(str::to_string),
                api_url,
                model: None,
            },
            RequestTracker::new(),
        )
    }

    #[test]
    fn test_eligibility() {
        let r = record();
        assert!(is_eligible(&r.conditions, &r.medications));
        assert!(!is_eligible(&r.conditions, &r.medications[1..]));

        let resolved: Vec<Condition> = serde_json::from_value(json!([
            { "code": { "text": "History of pre-eclampsia" },
              "clinicalStatus": { "coding": [{ "code": "resolved" }] } }
        ]))
        .unwrap();
        assert!(!is_eligible(&resolved, &r.medications));
        assert!(!is_eligible(&[], &r.medications));
    }

    #[test]
    fn test_prompt_carries_only_minimal_data() {
        let prompt = build_prompt(&record()).unwrap();
        assert!(prompt.contains(r#"{"age":31,"gender":"F"}"#));
        assert!(prompt.contains("rfe-forms-Hypertension"));
        assert!(prompt.contains(r#""value":7.2"#));
        assert!(prompt.contains("Aspirin 75mg"));
        assert!(!prompt.contains("Aspirin 81mg"));
        assert!(!prompt.contains("Folic acid"));
        assert!(!prompt.contains("rfe-forms-LMP"));
        assert!(!prompt.contains("Private Name"));
    }

    #[test]
    fn test_provider_request_shapes() {
        let openai = advisor(LlmProvider::OpenAi, None, Some("k")).build_request("k", "hi");
        assert_eq!(openai.url, OPENAI_URL);
        assert_eq!(openai.headers, vec![("authorization", "Bearer k".to_string())]);
        assert_eq!(openai.body["model"], DEFAULT_OPENAI_MODEL);
        assert_eq!(openai.body["messages"][0]["role"], "system");
        assert_eq!(openai.body["max_tokens"], 500);

        let anthropic = advisor(LlmProvider::Anthropic, None, Some("k")).build_request("k", "hi");
        assert_eq!(anthropic.url, ANTHROPIC_URL);
        assert!(anthropic.headers.contains(&("x-api-key", "k".to_string())));
        assert!(anthropic
            .headers
            .contains(&("anthropic-version", ANTHROPIC_VERSION.to_string())));
        assert_eq!(anthropic.body["messages"].as_array().unwrap().len(), 1);
        assert!(anthropic.body["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with("\n\nhi"));

        let custom = advisor(
            LlmProvider::Custom,
            Some("http://llm.local/v1/chat".to_string()),
            Some("k"),
        );
        assert_eq!(custom.endpoint(), "http://llm.local/v1/chat");
    }

    #[test]
    fn test_extract_message() {
        let openai = json!({ "choices": [{ "message": { "content": "Be well" } }] });
        assert_eq!(extract_message(LlmProvider::OpenAi, &openai).as_deref(), Some("Be well"));
        let anthropic = json!({ "content": [{ "type": "text", "text": "Rest" }] });
        assert_eq!(extract_message(LlmProvider::Anthropic, &anthropic).as_deref(), Some("Rest"));
        assert!(extract_message(LlmProvider::OpenAi, &json!({ "choices": [] })).is_none());
    }

    #[tokio::test]
    async fn test_missing_key_uses_fallback() {
        let text = advisor(LlmProvider::OpenAi, None, None).generate(&record()).await;
        assert_eq!(text, FALLBACK_ADVISORY);
    }

    #[tokio::test]
    async fn test_generate_against_stub_provider() {
        let stub = StubUpstream::spawn(vec![(
            "/v1/chat/completions",
            StubReply::json(json!({ "choices": [{ "message": { "content": "## 💊 Advice" } }] })),
        )])
        .await;
        let advisor = advisor(
            LlmProvider::Custom,
            Some(format!("{}/v1/chat/completions", stub.base_url)),
            Some("secret"),
        );

        assert_eq!(advisor.generate(&record()).await, "## 💊 Advice");
        let sent = stub.requests().pop().unwrap();
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.authorization.as_deref(), Some("Bearer secret"));
        assert!(!advisor.tracker.is_loading());
    }

    #[tokio::test]
    async fn test_provider_error_is_tracked_and_falls_back() {
        let stub = StubUpstream::spawn(vec![]).await;
        let advisor = advisor(
            LlmProvider::Custom,
            Some(format!("{}/v1/chat/completions", stub.base_url)),
            Some("secret"),
        );

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _subscription = advisor.tracker.subscribe(
            |_| {},
            move |e| sink.lock().unwrap().push(e.map(str::to_string)),
        );

        assert_eq!(advisor.generate(&record()).await, FALLBACK_ADVISORY);
        assert_eq!(
            errors.lock().unwrap().as_slice(),
            &[Some("LLM error: LLM API error: 404 Not Found".to_string())]
        );
    }
}
