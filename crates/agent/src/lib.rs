//! Agent runtime - model-backed intent pipeline and tool orchestration
//!
//! This crate is the conversational side of TrackCrow - everything between a
//! raw chat message and a framed response stream:
//! - Classifies free text into an expense intent with a constrained model call
//! - Extracts and normalizes structured fields (amounts, categories, dates)
//! - Pauses flows with missing fields and resumes them from client-echoed state
//! - Dispatches validated intents to backend tools over the transaction store
//!
//! # Architecture
//!
//! A turn moves through a fixed sequence:
//! 1. **Turn triage** (`pipeline`) - help short-circuit, resume detection
//! 2. **Classification** (`prompt`, `extractor`) - prompt assembly, schema-checked
//!    model call with one retry
//! 3. **Normalization** - relative-date resolution, range repair, mode gating,
//!    required-field validation
//! 4. **Dispatch** (`tools`) - registry lookup, execution, stream framing
//!
//! # Key Types
//!
//! - `ChatPipeline` - Main orchestrator (see `pipeline` module)
//! - `ModelProvider` - Pluggable trait over OpenAI-compatible chat endpoints
//! - `TransactionStore` - Persistence seam the tools run against
//!
//! # Model Principle
//!
//! The model is strictly a translator. It never executes anything: every value
//! it emits is re-validated against the intent catalog, and all effects go
//! through typed tools.

pub mod extractor;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod store;
pub mod tools;
