use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use branchline_core::{ClassifyError, SemanticClassifier, SemanticVerdict};

use crate::llm::{extract_json, LlmClient};

/// Escalation adapter: hands the utterance and the declared categories to the
/// LLM and expects a JSON verdict back. Every call is wrapped in a timeout.
pub struct SemanticEscalator {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    category: String,
    #[serde(default)]
    confidence: f32,
}

impl SemanticEscalator {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    fn prompt(utterance: &str, branch_intent: &str, categories: &[String]) -> String {
        let listed = categories.join(", ");
        format!(
            "You are classifying a customer's reply in a phone conversation.\n\
             The current question's intent is: {branch_intent}\n\
             The customer said: \"{utterance}\"\n\
             Pick exactly one category from: {listed}\n\
             If none fits, pick none_of_these.\n\
             Reply with JSON only: {{\"category\": \"<name>\", \"confidence\": <0.0-1.0>}}"
        )
    }
}

#[async_trait]
impl SemanticClassifier for SemanticEscalator {
    async fn classify(
        &self,
        utterance: &str,
        branch_intent: &str,
        categories: &[String],
    ) -> Result<SemanticVerdict, ClassifyError> {
        let prompt = Self::prompt(utterance, branch_intent, categories);
        let completion = tokio::time::timeout(self.timeout, self.llm.complete(&prompt))
            .await
            .map_err(|_| ClassifyError::Timeout(self.timeout))?
            .map_err(|error| ClassifyError::Service(error.to_string()))?;

        let raw: RawVerdict = serde_json::from_str(extract_json(&completion))
            .map_err(|error| ClassifyError::Service(format!("malformed verdict: {error}")))?;
        debug!(category = %raw.category, confidence = raw.confidence, "semantic verdict");
        Ok(SemanticVerdict {
            category: raw.category.trim().to_owned(),
            confidence: raw.confidence.clamp(0.0, 1.0),
        })
    }
}
