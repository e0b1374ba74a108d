//! The learning loop: unmatched utterances become reviewed graph proposals,
//! and approved proposals become validated graph mutations.

mod applier;
mod generator;
mod types;

pub use applier::{Applier, CommitOutcome, ReviewItem};
pub use generator::{
    BranchDraft, BranchDrafter, FallbackDrafter, SuggestionGenerator, UNEXPECTED_RESPONSE,
};
pub use types::{InMemorySink, MutationOperation, PendingMutation, SuggestionSink};
