//! File-backed persistence for the dialogue graph and the suggestion log.
//!
//! The graph lives in one JSON document; every write goes through a temp file
//! and an atomic rename so readers never see a torn document. In-process
//! sharing goes through [`SharedGraph`], which swaps whole snapshots.

mod document;
mod log;
mod store;

pub use document::FlowDocument;
pub use log::SuggestionLog;
pub use store::{FlowStore, SharedGraph, StoreError};
