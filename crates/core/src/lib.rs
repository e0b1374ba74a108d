pub mod branch;
pub mod classify;
pub mod config;
pub mod controller;
pub mod errors;
pub mod graph;
pub mod interrupt;
pub mod render;
pub mod state;
pub mod suggestions;

pub use branch::{
    ActivationCondition, Branch, BranchAction, Keywords, ResponseRule, ResponseRules,
};
pub use classify::{
    Classification, Classifier, MatchSource, NoSemanticClassifier, SemanticClassifier,
    SemanticVerdict, NONE_OF_THESE,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use controller::{FlowController, TurnOutcome, CLARIFICATION_LINE};
pub use errors::{ClassifyError, DraftError, GraphError, SuggestionError, TurnError};
pub use graph::{BranchGraph, GraphHealth, GraphMetadata, DEFAULT_ENTRY_BRANCH};
pub use interrupt::{
    ActionHandler, ActionOutcome, ActionResolution, DefaultActionHandler, FollowUpAction,
    FollowUpRule, InterruptionAction, InterruptionPattern, Overlay, StageFilter,
};
pub use state::{ConversationState, HistoryEntry, Suspension};
pub use suggestions::{
    Applier, BranchDraft, BranchDrafter, CommitOutcome, FallbackDrafter, InMemorySink,
    MutationOperation, PendingMutation, ReviewItem, SuggestionGenerator, SuggestionSink,
    UNEXPECTED_RESPONSE,
};
