use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel used in the persisted form for a catch-all keyword list.
const WILDCARD: &str = "*";

/// Keyword set for one response category. The wildcard is a dedicated variant
/// so a literal keyword can never collide with the `"*"` sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Keywords {
    Literal(Vec<String>),
    CatchAll,
}

impl Keywords {
    pub fn is_catch_all(&self) -> bool {
        matches!(self, Self::CatchAll)
    }

    pub fn literals(&self) -> &[String] {
        match self {
            Self::Literal(keywords) => keywords,
            Self::CatchAll => &[],
        }
    }
}

impl Default for Keywords {
    fn default() -> Self {
        Self::Literal(Vec::new())
    }
}

impl Serialize for Keywords {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Literal(keywords) => keywords.serialize(serializer),
            Self::CatchAll => vec![WILDCARD.to_owned()].serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Keywords {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        if raw.iter().any(|keyword| keyword == WILDCARD) {
            Ok(Self::CatchAll)
        } else {
            Ok(Self::Literal(raw))
        }
    }
}

/// One expected-response entry: where a matching utterance sends the
/// conversation and what the bot says on the way.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseRule {
    pub category: String,
    pub keywords: Keywords,
    pub next: Option<String>,
    pub response_template: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
struct RuleBody {
    #[serde(default)]
    keywords: Keywords,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,
    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    response_template: Option<String>,
}

/// Declaration-ordered category → rule mapping. Order is the tie-break when an
/// utterance could satisfy several categories, so the persisted JSON map is
/// read into a `Vec` rather than a sorted map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseRules(Vec<ResponseRule>);

impl ResponseRules {
    pub fn new(rules: Vec<ResponseRule>) -> Self {
        Self(rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseRule> {
        self.0.iter()
    }

    pub fn get(&self, category: &str) -> Option<&ResponseRule> {
        self.0.iter().find(|rule| rule.category == category)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Insert or replace the rule for `category`, preserving declaration order
    /// for existing categories and appending new ones.
    pub fn upsert(&mut self, rule: ResponseRule) {
        if let Some(existing) = self.0.iter_mut().find(|r| r.category == rule.category) {
            *existing = rule;
        } else {
            self.0.push(rule);
        }
    }

    pub fn category_names(&self) -> Vec<String> {
        self.0.iter().map(|rule| rule.category.clone()).collect()
    }
}

impl Serialize for ResponseRules {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rule in &self.0 {
            let body = RuleBody {
                keywords: rule.keywords.clone(),
                next: rule.next.clone(),
                response_template: rule.response_template.clone(),
            };
            map.serialize_entry(&rule.category, &body)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseRules {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = ResponseRules;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of response category to rule")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((category, body)) = access.next_entry::<String, RuleBody>()? {
                    rules.push(ResponseRule {
                        category,
                        keywords: body.keywords,
                        next: body.next,
                        response_template: body.response_template,
                    });
                }
                Ok(ResponseRules(rules))
            }
        }

        deserializer.deserialize_map(RulesVisitor)
    }
}

impl FromIterator<ResponseRule> for ResponseRules {
    fn from_iter<I: IntoIterator<Item = ResponseRule>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// When a learned branch should be offered instead of the default successor.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActivationCondition {
    pub previous_branch: String,
    pub previous_category: String,
    pub trigger: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum BranchAction {
    #[serde(rename = "END_CALL")]
    EndCall,
}

/// A named node in the dialogue graph. The name is carried by the enclosing
/// document key, not the branch body, so it is skipped during (de)serialization
/// and filled in by the store.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Branch {
    #[serde(skip, default)]
    pub name: String,
    pub intent: String,
    pub bot_prompt: String,
    #[serde(
        rename = "expected_user_responses",
        default,
        skip_serializing_if = "ResponseRules::is_empty"
    )]
    pub expected_responses: ResponseRules,
    #[serde(rename = "called_when", default, skip_serializing_if = "Vec::is_empty")]
    pub activation_conditions: Vec<ActivationCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<BranchAction>,
}

impl Branch {
    /// True when this branch has no outgoing edge at all.
    pub fn has_outgoing(&self) -> bool {
        self.expected_responses.iter().any(|rule| rule.next.is_some())
    }

    pub fn is_activated_by(&self, previous_branch: &str, previous_category: &str) -> bool {
        self.activation_conditions.iter().any(|condition| {
            condition.previous_branch == previous_branch
                && condition.previous_category == previous_category
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Branch, Keywords, ResponseRules};

    const POLICY_CONFIRMATION: &str = r#"{
        "intent": "confirm_policy_details",
        "bot_prompt": "Confirm the policy details with {{ policy_holder_name }}.",
        "expected_user_responses": {
            "positive": { "keywords": ["yes", "ready"], "next": "payment_followup" },
            "negative": { "keywords": ["no", "concerns"], "next": "payment_inquiry" },
            "neutral": { "keywords": ["ok", "okay"], "next": "policy_confirmation_handled" }
        }
    }"#;

    #[test]
    fn rules_keep_declaration_order() {
        let branch: Branch = serde_json::from_str(POLICY_CONFIRMATION).expect("parse branch");
        let categories = branch.expected_responses.category_names();
        assert_eq!(categories, vec!["positive", "negative", "neutral"]);
    }

    #[test]
    fn wildcard_parses_to_catch_all_variant() {
        let rules: ResponseRules = serde_json::from_str(
            r#"{ "unclear": { "keywords": ["*"], "next": "closure", "response": "Alright." } }"#,
        )
        .expect("parse rules");
        let rule = rules.get("unclear").expect("unclear rule");
        assert!(rule.keywords.is_catch_all());
        assert!(rule.keywords.literals().is_empty());
    }

    #[test]
    fn wildcard_round_trips_as_sentinel() {
        let rules = ResponseRules::new(vec![super::ResponseRule {
            category: "unclear".to_owned(),
            keywords: Keywords::CatchAll,
            next: Some("closure".to_owned()),
            response_template: None,
        }]);
        let rendered = serde_json::to_value(&rules).expect("serialize rules");
        assert_eq!(rendered["unclear"]["keywords"][0], "*");
    }

    #[test]
    fn upsert_replaces_in_place_and_appends_new() {
        let branch: Branch = serde_json::from_str(POLICY_CONFIRMATION).expect("parse branch");
        let mut rules = branch.expected_responses;
        rules.upsert(super::ResponseRule {
            category: "negative".to_owned(),
            keywords: Keywords::Literal(vec!["never".to_owned()]),
            next: Some("payment_inquiry".to_owned()),
            response_template: None,
        });
        rules.upsert(super::ResponseRule {
            category: "unexpected_response".to_owned(),
            keywords: Keywords::default(),
            next: Some("policy_confirmation_handled".to_owned()),
            response_template: None,
        });

        assert_eq!(
            rules.category_names(),
            vec!["positive", "negative", "neutral", "unexpected_response"]
        );
        assert_eq!(rules.get("negative").unwrap().keywords.literals(), ["never"]);
    }

    #[test]
    fn branch_without_outgoing_edges_is_a_natural_endpoint() {
        let branch: Branch = serde_json::from_str(
            r#"{ "intent": "end_conversation", "bot_prompt": "Thank you, goodbye.", "action": "END_CALL" }"#,
        )
        .expect("parse closure branch");
        assert!(!branch.has_outgoing());
        assert_eq!(branch.action, Some(super::BranchAction::EndCall));
    }
}
