use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use branchline_core::{Branch, GraphMetadata, InterruptionPattern};

/// Reserved top-level keys in the branches document. Everything else is a
/// branch keyed by its name.
const METADATA_KEY: &str = "_metadata";
const INTERRUPTIONS_KEY: &str = "interruptible_intents";

/// The persisted branches document: one JSON object whose keys are branch
/// names, plus the two reserved sections. Declaration order of branches and
/// interruption patterns is preserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowDocument {
    pub metadata: GraphMetadata,
    pub branches: Vec<Branch>,
    pub interruptions: Vec<InterruptionPattern>,
}

impl Serialize for FlowDocument {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let reserved = 1 + usize::from(!self.interruptions.is_empty());
        let mut map = serializer.serialize_map(Some(self.branches.len() + reserved))?;
        map.serialize_entry(METADATA_KEY, &self.metadata)?;
        if !self.interruptions.is_empty() {
            let patterns: Vec<(&str, &InterruptionPattern)> = self
                .interruptions
                .iter()
                .map(|pattern| (pattern.name.as_str(), pattern))
                .collect();
            map.serialize_entry(INTERRUPTIONS_KEY, &NamedMap(&patterns))?;
        }
        for branch in &self.branches {
            map.serialize_entry(&branch.name, branch)?;
        }
        map.end()
    }
}

struct NamedMap<'a, T: Serialize>(&'a [(&'a str, &'a T)]);

impl<T: Serialize> Serialize for NamedMap<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FlowDocument {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = FlowDocument;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a branches document keyed by branch name")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut document = FlowDocument::default();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        METADATA_KEY => {
                            document.metadata = access.next_value()?;
                        }
                        INTERRUPTIONS_KEY => {
                            let patterns: PatternMap = access.next_value()?;
                            document.interruptions = patterns.0;
                        }
                        _ => {
                            let mut branch: Branch = access.next_value()?;
                            branch.name = key;
                            document.branches.push(branch);
                        }
                    }
                }
                Ok(document)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Declaration-ordered name → pattern map.
struct PatternMap(Vec<InterruptionPattern>);

impl<'de> Deserialize<'de> for PatternMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PatternVisitor;

        impl<'de> Visitor<'de> for PatternVisitor {
            type Value = PatternMap;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of interruption name to pattern")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut patterns = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, mut pattern)) =
                    access.next_entry::<String, InterruptionPattern>()?
                {
                    pattern.name = name;
                    patterns.push(pattern);
                }
                Ok(PatternMap(patterns))
            }
        }

        deserializer.deserialize_map(PatternVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::FlowDocument;

    const DOCUMENT: &str = r#"{
        "_metadata": { "entry_branch": "greeting", "version": "3" },
        "interruptible_intents": {
            "schedule_callback": {
                "keywords": ["call me later", "call back"],
                "action": "schedule_callback",
                "response": "When should we call you back?",
                "interruptible_stages": ["*"]
            },
            "repeat_request": {
                "keywords": ["repeat", "say that again"],
                "action": "repeat_last_response",
                "interruptible_stages": ["policy_confirmation"]
            }
        },
        "greeting": {
            "intent": "greet_policy_holder",
            "bot_prompt": "Hello {{ policy_holder_name }}.",
            "expected_user_responses": {
                "positive": { "keywords": ["yes", "speaking"], "next": "policy_confirmation" },
                "negative": { "keywords": ["wrong number"], "next": "closure" }
            }
        },
        "policy_confirmation": {
            "intent": "confirm_policy",
            "bot_prompt": "Your premium is due. Can you pay this week?",
            "expected_user_responses": {
                "positive": { "keywords": ["yes"], "next": "closure" }
            }
        },
        "closure": {
            "intent": "end_conversation",
            "bot_prompt": "Thank you, goodbye.",
            "action": "END_CALL"
        }
    }"#;

    #[test]
    fn reserved_keys_never_become_branches() {
        let document: FlowDocument = serde_json::from_str(DOCUMENT).expect("parse document");
        let names: Vec<&str> =
            document.branches.iter().map(|branch| branch.name.as_str()).collect();
        assert_eq!(names, vec!["greeting", "policy_confirmation", "closure"]);
        assert_eq!(document.metadata.entry_branch, "greeting");
        assert_eq!(document.metadata.version.as_deref(), Some("3"));
    }

    #[test]
    fn interruption_patterns_carry_their_key_as_name() {
        let document: FlowDocument = serde_json::from_str(DOCUMENT).expect("parse document");
        assert_eq!(document.interruptions.len(), 2);
        assert_eq!(document.interruptions[0].name, "schedule_callback");
        assert_eq!(document.interruptions[1].name, "repeat_request");
    }

    #[test]
    fn document_round_trips_semantically() {
        let document: FlowDocument = serde_json::from_str(DOCUMENT).expect("parse document");
        let rendered = serde_json::to_string_pretty(&document).expect("serialize");
        let reparsed: FlowDocument = serde_json::from_str(&rendered).expect("reparse");
        assert_eq!(document, reparsed);
    }

    #[test]
    fn document_without_interruptions_omits_the_section() {
        let mut document: FlowDocument = serde_json::from_str(DOCUMENT).expect("parse document");
        document.interruptions.clear();

        let rendered = serde_json::to_value(&document).expect("serialize");
        let object = rendered.as_object().expect("object");
        assert!(!object.contains_key("interruptible_intents"));
        // One reserved key plus one entry per branch.
        assert_eq!(object.len(), document.branches.len() + 1);
    }

    #[test]
    fn rendered_document_keeps_branch_declaration_order() {
        let document: FlowDocument = serde_json::from_str(DOCUMENT).expect("parse document");
        let rendered = serde_json::to_string(&document).expect("serialize");
        let metadata_at = rendered.find("_metadata").expect("metadata");
        let greeting_at = rendered.find("greeting").expect("greeting");
        let closure_at = rendered.rfind("\"closure\":").expect("closure");
        assert!(metadata_at < greeting_at && greeting_at < closure_at);
    }
}
