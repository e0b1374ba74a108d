//! The LLM boundary: transport clients plus the adapters that implement the
//! core's semantic-classification and branch-drafting traits.

mod classify;
mod draft;
mod http;
mod llm;

pub use classify::SemanticEscalator;
pub use draft::LlmDrafter;
pub use http::GeminiClient;
pub use llm::{LlmClient, ScriptedClient};
