use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use branchline_core::{Branch, BranchDraft, BranchDrafter, DraftError, ResponseRules};

use crate::llm::{extract_json, LlmClient};

/// Drafting adapter: asks the LLM for a complete branch definition covering an
/// utterance the graph could not place.
pub struct LlmDrafter {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    branch_name: String,
    intent: String,
    bot_prompt: String,
    #[serde(default)]
    expected_user_responses: ResponseRules,
}

impl LlmDrafter {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    fn prompt(
        previous: &Branch,
        utterance: &str,
        context: &BTreeMap<String, String>,
        known_branches: &[String],
    ) -> String {
        let known = known_branches.join(", ");
        let context_keys: Vec<&str> = context.keys().map(String::as_str).collect();
        format!(
            "A scripted phone conversation hit a reply it cannot handle.\n\
             Current stage: {stage} (intent: {intent})\n\
             The bot asked: \"{prompt}\"\n\
             The customer said: \"{utterance}\"\n\
             Design one new conversation stage that handles this reply and steers back to the flow.\n\
             Existing stages you may link to with `next`: {known}\n\
             Template placeholders available: {placeholders:?}\n\
             Reply with JSON only:\n\
             {{\"branch_name\": \"<snake_case>\", \"intent\": \"<snake_case>\", \
             \"bot_prompt\": \"<what the bot says>\", \"expected_user_responses\": \
             {{\"<category>\": {{\"keywords\": [\"...\"], \"next\": \"<stage>\"}}}}}}",
            stage = previous.name,
            intent = previous.intent,
            prompt = previous.bot_prompt,
            placeholders = context_keys,
        )
    }
}

#[async_trait]
impl BranchDrafter for LlmDrafter {
    async fn draft(
        &self,
        previous: &Branch,
        utterance: &str,
        context: &BTreeMap<String, String>,
        known_branches: &[String],
    ) -> Result<BranchDraft, DraftError> {
        let prompt = Self::prompt(previous, utterance, context, known_branches);
        let completion = tokio::time::timeout(self.timeout, self.llm.complete(&prompt))
            .await
            .map_err(|_| DraftError::Timeout(self.timeout))?
            .map_err(|error| DraftError::Service(error.to_string()))?;

        let raw: RawDraft =
            serde_json::from_str(extract_json(&completion)).map_err(|error| {
                DraftError::Malformed {
                    name: format!("{}_handled", previous.name),
                    reason: error.to_string(),
                }
            })?;
        debug!(branch = %raw.branch_name, "branch drafted");
        Ok(BranchDraft {
            name: raw.branch_name,
            intent: raw.intent,
            bot_prompt: raw.bot_prompt,
            expected_responses: raw.expected_user_responses,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use branchline_core::{Branch, BranchDrafter, DraftError, ResponseRules};

    use crate::llm::ScriptedClient;

    use super::LlmDrafter;

    fn previous() -> Branch {
        Branch {
            name: "payment_inquiry".to_owned(),
            intent: "understand_payment_blocker".to_owned(),
            bot_prompt: "What is holding the payment back?".to_owned(),
            expected_responses: ResponseRules::default(),
            activation_conditions: Vec::new(),
            action: None,
        }
    }

    #[tokio::test]
    async fn parses_a_complete_draft() {
        let llm = Arc::new(ScriptedClient::new([r#"```json
{
  "branch_name": "payment_inquiry_handled",
  "intent": "acknowledge_unclear_blocker",
  "bot_prompt": "I see. Could you tell me a bit more?",
  "expected_user_responses": {
    "elaborates": { "keywords": ["*"], "next": "closure" }
  }
}
```"#]));
        let drafter = LlmDrafter::new(llm, Duration::from_secs(5));

        let draft = drafter
            .draft(&previous(), "nothing", &BTreeMap::new(), &["closure".to_owned()])
            .await
            .expect("draft");
        assert_eq!(draft.name, "payment_inquiry_handled");
        assert_eq!(draft.expected_responses.category_names(), vec!["elaborates"]);
    }

    #[tokio::test]
    async fn malformed_draft_reports_the_reason() {
        let llm = Arc::new(ScriptedClient::new(["{\"intent\": \"missing name\"}"]));
        let drafter = LlmDrafter::new(llm, Duration::from_secs(5));

        let error = drafter
            .draft(&previous(), "nothing", &BTreeMap::new(), &[])
            .await
            .expect_err("malformed");
        assert!(matches!(error, DraftError::Malformed { .. }));
    }
}
