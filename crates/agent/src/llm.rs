use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Returns canned completions in order. For tests and offline simulation.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut responses =
            self.responses.lock().map_err(|_| anyhow!("scripted responses poisoned"))?;
        responses.pop_front().ok_or_else(|| anyhow!("scripted client ran out of responses"))
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
pub(crate) fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim_end).unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::{extract_json, LlmClient, ScriptedClient};

    #[tokio::test]
    async fn scripted_client_pops_in_order_then_errors() {
        let client = ScriptedClient::new(["one", "two"]);
        assert_eq!(client.complete("x").await.unwrap(), "one");
        assert_eq!(client.complete("x").await.unwrap(), "two");
        assert!(client.complete("x").await.is_err());
    }

    #[test]
    fn extract_json_handles_fenced_and_bare_payloads() {
        assert_eq!(extract_json("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
