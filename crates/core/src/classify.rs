use async_trait::async_trait;
use tracing::{debug, warn};

use crate::branch::Branch;
use crate::errors::ClassifyError;

/// Category name the semantic classifier returns when nothing declared fits.
pub const NONE_OF_THESE: &str = "none_of_these";

/// How a category was matched. Keyword hits are authoritative; semantic hits
/// carry the external classifier's confidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchSource {
    Keyword,
    Wildcard,
    Semantic,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    Matched { category: String, confidence: f32, source: MatchSource },
    Unmatched,
}

impl Classification {
    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Matched { category, .. } => Some(category),
            Self::Unmatched => None,
        }
    }
}

/// Verdict from the external semantic classifier.
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticVerdict {
    pub category: String,
    pub confidence: f32,
}

/// External escalation path for utterances the keyword pass cannot place. The
/// implementation owns its own transport and timeout.
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify(
        &self,
        utterance: &str,
        branch_intent: &str,
        categories: &[String],
    ) -> Result<SemanticVerdict, ClassifyError>;
}

/// Escalation path that never matches anything. Used when no external
/// classifier is configured and in offline simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSemanticClassifier;

#[async_trait]
impl SemanticClassifier for NoSemanticClassifier {
    async fn classify(
        &self,
        _utterance: &str,
        _branch_intent: &str,
        _categories: &[String],
    ) -> Result<SemanticVerdict, ClassifyError> {
        Ok(SemanticVerdict { category: NONE_OF_THESE.to_owned(), confidence: 1.0 })
    }
}

/// Deterministic classification pipeline: literal keywords in declaration
/// order, then the wildcard, then semantic escalation, then `Unmatched`.
#[derive(Clone, Copy, Debug)]
pub struct Classifier {
    confidence_threshold: f32,
}

impl Classifier {
    pub fn new(confidence_threshold: f32) -> Self {
        Self { confidence_threshold }
    }

    pub async fn classify(
        &self,
        branch: &Branch,
        utterance: &str,
        semantic: &dyn SemanticClassifier,
    ) -> Classification {
        let normalized = utterance.trim().to_lowercase();

        // Literal pass: declaration order is the tie-break, first hit wins.
        for rule in branch.expected_responses.iter() {
            if rule.keywords.is_catch_all() {
                continue;
            }
            let hit = rule.keywords.literals().iter().any(|keyword| {
                let keyword = keyword.to_lowercase();
                normalized.contains(&keyword) && !is_negated(&normalized, &keyword)
            });
            if hit {
                debug!(branch = %branch.name, category = %rule.category, "keyword match");
                return Classification::Matched {
                    category: rule.category.clone(),
                    confidence: 1.0,
                    source: MatchSource::Keyword,
                };
            }
        }

        // The wildcard only wins when no literal category matched.
        if let Some(rule) = branch.expected_responses.iter().find(|rule| rule.keywords.is_catch_all())
        {
            debug!(branch = %branch.name, category = %rule.category, "wildcard match");
            return Classification::Matched {
                category: rule.category.clone(),
                confidence: 0.5,
                source: MatchSource::Wildcard,
            };
        }

        let mut categories = branch.expected_responses.category_names();
        if categories.is_empty() {
            return Classification::Unmatched;
        }
        categories.push(NONE_OF_THESE.to_owned());

        match semantic.classify(&normalized, &branch.intent, &categories).await {
            Ok(verdict) => {
                let declared = branch.expected_responses.get(&verdict.category).is_some();
                if declared && verdict.confidence >= self.confidence_threshold {
                    debug!(
                        branch = %branch.name,
                        category = %verdict.category,
                        confidence = verdict.confidence,
                        "semantic match"
                    );
                    Classification::Matched {
                        category: verdict.category,
                        confidence: verdict.confidence,
                        source: MatchSource::Semantic,
                    }
                } else {
                    Classification::Unmatched
                }
            }
            Err(error) => {
                warn!(branch = %branch.name, %error, "semantic classification degraded");
                Classification::Unmatched
            }
        }
    }
}

/// Containment hits are discarded when the utterance negates the keyword just
/// before it ("no", "not", "don't", ...).
fn is_negated(normalized: &str, keyword: &str) -> bool {
    const NEGATORS: [&str; 8] =
        ["no", "not", "don't", "dont", "never", "can't", "cant", "won't"];
    let mut search_from = 0;
    while let Some(offset) = normalized[search_from..].find(keyword) {
        let position = search_from + offset;
        let prefix = normalized[..position].trim_end();
        let negated = NEGATORS
            .iter()
            .any(|negator| prefix == *negator || prefix.ends_with(&format!(" {negator}")));
        if !negated {
            return false;
        }
        search_from = position + keyword.len();
        if search_from >= normalized.len() {
            break;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::branch::{Branch, Keywords, ResponseRule, ResponseRules};
    use crate::errors::ClassifyError;

    use super::{
        Classification, Classifier, MatchSource, NoSemanticClassifier, SemanticClassifier,
        SemanticVerdict, NONE_OF_THESE,
    };

    fn branch_with(rules: Vec<(&str, Keywords)>) -> Branch {
        Branch {
            name: "payment_inquiry".to_owned(),
            intent: "understand_payment_blocker".to_owned(),
            bot_prompt: "What is holding the payment back?".to_owned(),
            expected_responses: ResponseRules::new(
                rules
                    .into_iter()
                    .map(|(category, keywords)| ResponseRule {
                        category: category.to_owned(),
                        keywords,
                        next: None,
                        response_template: None,
                    })
                    .collect(),
            ),
            activation_conditions: Vec::new(),
            action: None,
        }
    }

    struct FixedVerdict(SemanticVerdict);

    #[async_trait]
    impl SemanticClassifier for FixedVerdict {
        async fn classify(
            &self,
            _utterance: &str,
            _branch_intent: &str,
            _categories: &[String],
        ) -> Result<SemanticVerdict, ClassifyError> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl SemanticClassifier for FailingClassifier {
        async fn classify(
            &self,
            _utterance: &str,
            _branch_intent: &str,
            _categories: &[String],
        ) -> Result<SemanticVerdict, ClassifyError> {
            Err(ClassifyError::Service("unreachable".to_owned()))
        }
    }

    #[tokio::test]
    async fn declaration_order_decides_overlapping_keywords() {
        let branch = branch_with(vec![
            ("financial_difficulty", Keywords::Literal(vec!["money".to_owned()])),
            ("forgot", Keywords::Literal(vec!["money".to_owned(), "forgot".to_owned()])),
        ]);
        let classifier = Classifier::new(0.7);
        let outcome = classifier
            .classify(&branch, "I have money troubles", &NoSemanticClassifier)
            .await;
        assert_eq!(outcome.category(), Some("financial_difficulty"));
    }

    #[tokio::test]
    async fn wildcard_never_beats_a_literal_match() {
        let branch = branch_with(vec![
            ("unclear", Keywords::CatchAll),
            ("positive", Keywords::Literal(vec!["yes".to_owned()])),
        ]);
        let classifier = Classifier::new(0.7);
        let outcome = classifier.classify(&branch, "yes please", &NoSemanticClassifier).await;
        assert_eq!(outcome.category(), Some("positive"));
    }

    #[tokio::test]
    async fn wildcard_catches_everything_else() {
        let branch = branch_with(vec![
            ("positive", Keywords::Literal(vec!["yes".to_owned()])),
            ("unclear", Keywords::CatchAll),
        ]);
        let classifier = Classifier::new(0.7);
        let outcome = classifier
            .classify(&branch, "mumble mumble", &NoSemanticClassifier)
            .await;
        assert_eq!(
            outcome,
            Classification::Matched {
                category: "unclear".to_owned(),
                confidence: 0.5,
                source: MatchSource::Wildcard,
            }
        );
    }

    #[tokio::test]
    async fn negation_suppresses_a_literal_hit() {
        let branch = branch_with(vec![
            ("positive", Keywords::Literal(vec!["interested".to_owned()])),
            ("negative", Keywords::Literal(vec!["not interested".to_owned()])),
        ]);
        let classifier = Classifier::new(0.7);
        let outcome = classifier
            .classify(&branch, "I am not interested", &NoSemanticClassifier)
            .await;
        assert_eq!(outcome.category(), Some("negative"));
    }

    #[tokio::test]
    async fn semantic_match_requires_declared_category_and_threshold() {
        let branch = branch_with(vec![(
            "positive",
            Keywords::Literal(vec!["yes".to_owned()]),
        )]);
        let classifier = Classifier::new(0.7);

        let confident = FixedVerdict(SemanticVerdict {
            category: "positive".to_owned(),
            confidence: 0.9,
        });
        let outcome = classifier.classify(&branch, "absolutely, go ahead", &confident).await;
        assert_eq!(
            outcome,
            Classification::Matched {
                category: "positive".to_owned(),
                confidence: 0.9,
                source: MatchSource::Semantic,
            }
        );

        let hesitant = FixedVerdict(SemanticVerdict {
            category: "positive".to_owned(),
            confidence: 0.4,
        });
        let outcome = classifier.classify(&branch, "absolutely, go ahead", &hesitant).await;
        assert_eq!(outcome, Classification::Unmatched);

        let undeclared = FixedVerdict(SemanticVerdict {
            category: "sarcastic".to_owned(),
            confidence: 0.99,
        });
        let outcome = classifier.classify(&branch, "absolutely, go ahead", &undeclared).await;
        assert_eq!(outcome, Classification::Unmatched);
    }

    #[tokio::test]
    async fn none_of_these_and_failures_fold_into_unmatched() {
        let branch = branch_with(vec![(
            "positive",
            Keywords::Literal(vec!["yes".to_owned()]),
        )]);
        let classifier = Classifier::new(0.7);

        let none = FixedVerdict(SemanticVerdict {
            category: NONE_OF_THESE.to_owned(),
            confidence: 1.0,
        });
        assert_eq!(
            classifier.classify(&branch, "nothing", &none).await,
            Classification::Unmatched
        );
        assert_eq!(
            classifier.classify(&branch, "nothing", &FailingClassifier).await,
            Classification::Unmatched
        );
    }

    #[tokio::test]
    async fn branch_with_no_categories_is_always_unmatched() {
        let branch = branch_with(vec![]);
        let classifier = Classifier::new(0.7);
        assert_eq!(
            classifier.classify(&branch, "hello", &NoSemanticClassifier).await,
            Classification::Unmatched
        );
    }
}
