use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::branch::Keywords;
use crate::state::ConversationState;

const WILDCARD: &str = "*";

/// Which stages an interruption pattern may pre-empt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageFilter {
    Any,
    Only(Vec<String>),
}

impl StageFilter {
    pub fn applies_to(&self, stage: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(stages) => stages.iter().any(|candidate| candidate == stage),
        }
    }

    /// Exact stage names beat the wildcard when several patterns match.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Only(_))
    }

    pub fn stages(&self) -> &[String] {
        match self {
            Self::Any => &[],
            Self::Only(stages) => stages,
        }
    }
}

impl Default for StageFilter {
    fn default() -> Self {
        Self::Any
    }
}

impl Serialize for StageFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Any => vec![WILDCARD.to_owned()].serialize(serializer),
            Self::Only(stages) => stages.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StageFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        if raw.iter().any(|stage| stage == WILDCARD) {
            Ok(Self::Any)
        } else {
            Ok(Self::Only(raw))
        }
    }
}

/// Named side effects an interruption can trigger. Execution is delegated to an
/// [`ActionHandler`] keyed by the action; the overlay only selects it.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionAction {
    SwitchLanguage,
    RepeatLastResponse,
    ScheduleCallback,
    JumpToStage,
    NoteSupervisorRequest,
    AcknowledgeAndRedirect,
}

impl InterruptionAction {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SwitchLanguage => "switch_language",
            Self::RepeatLastResponse => "repeat_last_response",
            Self::ScheduleCallback => "schedule_callback",
            Self::JumpToStage => "jump_to_stage",
            Self::NoteSupervisorRequest => "note_supervisor_request",
            Self::AcknowledgeAndRedirect => "acknowledge_and_redirect",
        }
    }
}

impl Default for InterruptionAction {
    fn default() -> Self {
        Self::AcknowledgeAndRedirect
    }
}

/// What a follow-up reply inside an interruption exchange does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowUpAction {
    ReturnToMainFlow,
    EndConversation,
    Advance(String),
}

impl FollowUpAction {
    pub fn key(&self) -> &'static str {
        match self {
            Self::ReturnToMainFlow => "return_to_main_flow",
            Self::EndConversation => "end_conversation",
            Self::Advance(_) => "advance",
        }
    }
}

impl Default for FollowUpAction {
    fn default() -> Self {
        Self::ReturnToMainFlow
    }
}

impl Serialize for FollowUpAction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::ReturnToMainFlow => serializer.serialize_str("return_to_main_flow"),
            Self::EndConversation => serializer.serialize_str("end_conversation"),
            Self::Advance(stage) => serializer.serialize_str(&format!("next:{stage}")),
        }
    }
}

impl<'de> Deserialize<'de> for FollowUpAction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "return_to_main_flow" => Ok(Self::ReturnToMainFlow),
            "end_conversation" => Ok(Self::EndConversation),
            other => match other.strip_prefix("next:") {
                Some(stage) if !stage.is_empty() => Ok(Self::Advance(stage.to_owned())),
                _ => Err(serde::de::Error::custom(format!(
                    "unsupported follow-up action `{other}`"
                ))),
            },
        }
    }
}

/// One expected reply within an interruption's own exchange.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FollowUpRule {
    pub category: String,
    #[serde(default)]
    pub keywords: Keywords,
    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    #[serde(default)]
    pub action: FollowUpAction,
}

/// A stage-independent rule that can pre-empt normal classification.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct InterruptionPattern {
    #[serde(skip, default)]
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub action: InterruptionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_stage: Option<String>,
    #[serde(rename = "response", default, skip_serializing_if = "Option::is_none")]
    pub response_template: Option<String>,
    #[serde(default)]
    pub interruptible_stages: StageFilter,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<FollowUpRule>,
}

impl InterruptionPattern {
    fn keyword_hit(&self, normalized_utterance: &str) -> bool {
        self.keywords
            .iter()
            .any(|keyword| normalized_utterance.contains(&keyword.to_lowercase()))
    }
}

/// Pre-classification matcher over the document's interruption patterns, held
/// in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overlay {
    patterns: Vec<InterruptionPattern>,
}

impl Overlay {
    pub fn new(patterns: Vec<InterruptionPattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[InterruptionPattern] {
        &self.patterns
    }

    pub fn pattern(&self, name: &str) -> Option<&InterruptionPattern> {
        self.patterns.iter().find(|pattern| pattern.name == name)
    }

    /// Evaluated before classification on every utterance. Among matching
    /// patterns, an exact stage filter beats the wildcard; ties fall back to
    /// declaration order.
    pub fn check(&self, utterance: &str, current_branch: &str) -> Option<&InterruptionPattern> {
        let normalized = utterance.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        let matched = |pattern: &&InterruptionPattern| {
            pattern.interruptible_stages.applies_to(current_branch)
                && pattern.keyword_hit(&normalized)
        };

        self.patterns
            .iter()
            .filter(matched)
            .find(|pattern| pattern.interruptible_stages.is_exact())
            .or_else(|| self.patterns.iter().find(matched))
    }

    /// Match a follow-up utterance against an active interruption's own
    /// exchange rules: literal keywords first (with typo tolerance for time
    /// phrases), then a wildcard catch-all.
    pub fn resolve_follow_up<'a>(
        &self,
        pattern: &'a InterruptionPattern,
        utterance: &str,
    ) -> Option<&'a FollowUpRule> {
        let normalized = utterance.trim().to_lowercase();

        for rule in &pattern.follow_ups {
            if rule.keywords.is_catch_all() {
                continue;
            }
            let literal_hit = rule
                .keywords
                .literals()
                .iter()
                .any(|keyword| contains_with_typo_tolerance(&normalized, keyword));
            if literal_hit || (rule.category == "provides_time" && mentions_time(&normalized)) {
                return Some(rule);
            }
        }

        pattern.follow_ups.iter().find(|rule| rule.keywords.is_catch_all())
    }
}

/// Time-of-day and day references customers use when scheduling a callback,
/// including the misspellings that show up in transcribed speech.
fn mentions_time(normalized: &str) -> bool {
    let day_words = [
        "today", "tomorrow", "tommorow", "tomorow", "morning", "mornig", "afternoon", "evening",
        "evenig", "night", "weekend",
    ];
    if day_words.iter().any(|word| normalized.contains(word)) {
        return true;
    }
    // Clock-style phrases: "12:30", "12 30 pm", "10 am".
    let mut tokens = normalized.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let has_digits = token.chars().any(|c| c.is_ascii_digit());
        if !has_digits {
            continue;
        }
        if token.contains(':') || token.ends_with("am") || token.ends_with("pm") {
            return true;
        }
        if let Some(next) = tokens.peek() {
            if matches!(*next, "am" | "pm" | "o'clock" | "oclock")
                || next.chars().all(|c| c.is_ascii_digit())
            {
                return true;
            }
        }
    }
    false
}

fn contains_with_typo_tolerance(normalized: &str, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    if normalized.contains(&keyword) {
        return true;
    }
    let variants: &[&str] = match keyword.as_str() {
        "tomorrow" => &["tommorow", "tomorow", "tommorrow"],
        "morning" => &["mornig", "morng", "moring"],
        "evening" => &["evenig", "evning", "eveng"],
        "call back" => &["callback", "call-back", "call me back"],
        _ => &[],
    };
    variants.iter().any(|variant| normalized.contains(variant))
}

/// Outcome of executing an interruption action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub reply: Option<String>,
    pub resolution: ActionResolution,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionResolution {
    /// The interruption is fully handled this turn; the suspended branch is
    /// restored immediately.
    Resolved,
    /// The interruption needs a follow-up reply; the suspension stays pushed.
    AwaitFollowUp,
    /// The conversation jumps to a different stage; the suspension is dropped.
    Jump(String),
    /// The conversation ends.
    EndConversation,
}

/// External executor for interruption side effects, keyed by action.
pub trait ActionHandler: Send + Sync {
    fn execute(
        &self,
        pattern: &InterruptionPattern,
        utterance: &str,
        state: &mut ConversationState,
    ) -> ActionOutcome;
}

/// Default side-effect handler covering the built-in actions. Front ends with
/// richer integrations (telephony callbacks, CRM notes) supply their own.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultActionHandler;

impl ActionHandler for DefaultActionHandler {
    fn execute(
        &self,
        pattern: &InterruptionPattern,
        utterance: &str,
        state: &mut ConversationState,
    ) -> ActionOutcome {
        match pattern.action {
            InterruptionAction::RepeatLastResponse => {
                let reply = state
                    .last_reply()
                    .map(|last| format!("Sure, let me repeat that. {last}"))
                    .or_else(|| pattern.response_template.clone());
                ActionOutcome { reply, resolution: ActionResolution::Resolved }
            }
            InterruptionAction::SwitchLanguage => {
                if let Some(language) = detect_language(utterance) {
                    state.context.insert("language_preference".to_owned(), language.to_owned());
                }
                ActionOutcome { reply: None, resolution: ActionResolution::Resolved }
            }
            InterruptionAction::ScheduleCallback => {
                state.context.insert("callback_requested".to_owned(), "true".to_owned());
                ActionOutcome { reply: None, resolution: ActionResolution::AwaitFollowUp }
            }
            InterruptionAction::JumpToStage => match &pattern.target_stage {
                Some(stage) => ActionOutcome {
                    reply: None,
                    resolution: ActionResolution::Jump(stage.clone()),
                },
                None => ActionOutcome { reply: None, resolution: ActionResolution::Resolved },
            },
            InterruptionAction::NoteSupervisorRequest => {
                state.context.insert("supervisor_requested".to_owned(), "true".to_owned());
                ActionOutcome { reply: None, resolution: ActionResolution::Resolved }
            }
            InterruptionAction::AcknowledgeAndRedirect => {
                ActionOutcome { reply: None, resolution: ActionResolution::Resolved }
            }
        }
    }
}

fn detect_language(utterance: &str) -> Option<&'static str> {
    let normalized = utterance.to_lowercase();
    ["hindi", "marathi", "gujarati", "english"]
        .into_iter()
        .find(|language| normalized.contains(language))
        .map(|language| match language {
            "hindi" => "Hindi",
            "marathi" => "Marathi",
            "gujarati" => "Gujarati",
            _ => "English",
        })
}

impl fmt::Display for InterruptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::branch::Keywords;
    use crate::state::ConversationState;

    use super::{
        ActionHandler, ActionResolution, DefaultActionHandler, FollowUpAction, FollowUpRule,
        InterruptionAction, InterruptionPattern, Overlay, StageFilter,
    };

    fn pattern(
        name: &str,
        keywords: &[&str],
        stages: StageFilter,
        action: InterruptionAction,
    ) -> InterruptionPattern {
        InterruptionPattern {
            name: name.to_owned(),
            keywords: keywords.iter().map(|k| (*k).to_owned()).collect(),
            action,
            target_stage: None,
            response_template: None,
            interruptible_stages: stages,
            follow_ups: Vec::new(),
        }
    }

    #[test]
    fn exact_stage_filter_beats_wildcard() {
        let overlay = Overlay::new(vec![
            pattern(
                "repeat_anywhere",
                &["repeat"],
                StageFilter::Any,
                InterruptionAction::RepeatLastResponse,
            ),
            pattern(
                "repeat_payment",
                &["repeat"],
                StageFilter::Only(vec!["payment_followup".to_owned()]),
                InterruptionAction::RepeatLastResponse,
            ),
        ]);

        let matched = overlay.check("can you repeat that", "payment_followup").expect("match");
        assert_eq!(matched.name, "repeat_payment");

        let elsewhere = overlay.check("can you repeat that", "greeting").expect("match");
        assert_eq!(elsewhere.name, "repeat_anywhere");
    }

    #[test]
    fn declaration_order_breaks_ties_within_same_specificity() {
        let overlay = Overlay::new(vec![
            pattern("first", &["hindi"], StageFilter::Any, InterruptionAction::SwitchLanguage),
            pattern("second", &["hindi"], StageFilter::Any, InterruptionAction::SwitchLanguage),
        ]);
        assert_eq!(overlay.check("hindi please", "greeting").unwrap().name, "first");
    }

    #[test]
    fn stage_outside_filter_never_matches() {
        let overlay = Overlay::new(vec![pattern(
            "callback",
            &["call me later"],
            StageFilter::Only(vec!["policy_confirmation".to_owned()]),
            InterruptionAction::ScheduleCallback,
        )]);
        assert!(overlay.check("call me later", "closure").is_none());
    }

    #[test]
    fn follow_up_literal_beats_wildcard_and_time_phrases_count() {
        let mut p = pattern(
            "callback",
            &["call me later"],
            StageFilter::Any,
            InterruptionAction::ScheduleCallback,
        );
        p.follow_ups = vec![
            FollowUpRule {
                category: "provides_time".to_owned(),
                keywords: Keywords::Literal(vec!["tomorrow".to_owned()]),
                response_template: Some("Noted, we will call then.".to_owned()),
                action: FollowUpAction::EndConversation,
            },
            FollowUpRule {
                category: "anything_else".to_owned(),
                keywords: Keywords::CatchAll,
                response_template: None,
                action: FollowUpAction::ReturnToMainFlow,
            },
        ];
        let overlay = Overlay::new(vec![p.clone()]);

        let typo = overlay.resolve_follow_up(&p, "tommorow morning").expect("typo tolerated");
        assert_eq!(typo.category, "provides_time");

        let clock = overlay.resolve_follow_up(&p, "around 12:30 works").expect("time phrase");
        assert_eq!(clock.category, "provides_time");

        let fallback = overlay.resolve_follow_up(&p, "whatever suits you").expect("wildcard");
        assert_eq!(fallback.category, "anything_else");
    }

    #[test]
    fn follow_up_action_parses_next_prefix() {
        let action: FollowUpAction = serde_json::from_str("\"next:payment_followup\"").unwrap();
        assert_eq!(action, FollowUpAction::Advance("payment_followup".to_owned()));
        assert_eq!(serde_json::to_string(&action).unwrap(), "\"next:payment_followup\"");
    }

    #[test]
    fn default_handler_schedules_callback_without_resolving() {
        let mut state = ConversationState::new("greeting", BTreeMap::new());
        let p = pattern(
            "callback",
            &["call me later"],
            StageFilter::Any,
            InterruptionAction::ScheduleCallback,
        );
        let outcome = DefaultActionHandler.execute(&p, "call me later please", &mut state);
        assert_eq!(outcome.resolution, ActionResolution::AwaitFollowUp);
        assert_eq!(state.context.get("callback_requested").map(String::as_str), Some("true"));
    }

    #[test]
    fn default_handler_records_language_preference() {
        let mut state = ConversationState::new("greeting", BTreeMap::new());
        let p = pattern(
            "language",
            &["hindi"],
            StageFilter::Any,
            InterruptionAction::SwitchLanguage,
        );
        let outcome = DefaultActionHandler.execute(&p, "hindi me baat karo", &mut state);
        assert_eq!(outcome.resolution, ActionResolution::Resolved);
        assert_eq!(state.context.get("language_preference").map(String::as_str), Some("Hindi"));
    }
}
