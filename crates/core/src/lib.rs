pub mod catalog;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod fields;
pub mod modes;
pub mod replies;
pub mod stream;
pub mod timeframe;
pub mod validate;

pub use catalog::{
    definition_for, definitions, Category, ClassificationResult, IntentDefinition, IntentKind,
    MAX_RELEVANCE, RELEVANCE_THRESHOLD,
};
pub use conversation::{
    classify_turn, merge_partial_data, ChatMessage, ChatRequest, MessageMetadata, MessagePart,
    ResumeContext, ResumeState, Role, TranscriptTurn, TurnKind,
};
pub use errors::DomainError;
pub use fields::{FieldKind, FieldValue, PartialFields};
pub use modes::{GateDecision, ModeTable, PromptMode};
pub use stream::{StreamEvent, TurnStream};
pub use timeframe::DateRange;
pub use validate::{build_missing_fields_payload, find_missing, MissingFieldsPayload};
