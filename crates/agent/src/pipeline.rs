use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use trackcrow_core::catalog::{definition_for, ClassificationResult, IntentKind};
use trackcrow_core::conversation::{
    classify_turn, merge_partial_data, ChatRequest, ResumeState, TurnKind,
};
use trackcrow_core::fields::{PartialFields, FIELD_END_DATE, FIELD_START_DATE};
use trackcrow_core::modes::{GateDecision, ModeTable};
use trackcrow_core::replies::{
    is_help_query, mode_mismatch_reply, pick_variant, unknown_intent_reply, COULD_NOT_UNDERSTAND,
    HELP_TEXT, IRRELEVANT_REPLIES,
};
use trackcrow_core::stream::{StreamEvent, TurnStream};
use trackcrow_core::timeframe::{
    apply_range, clamp_range_to_now, enforce_pairing, range_of, resolve_relative_expression,
    swap_if_inverted, widen_plain_day,
};
use trackcrow_core::validate::{build_missing_fields_payload, find_missing};

use crate::extractor::FieldExtractor;
use crate::prompt::build_classification_prompt;
use crate::provider::ModelProvider;
use crate::store::{StoreError, TransactionStore, UserId};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("turn carried no user text")]
    EmptyTurn,
    #[error("failed to encode a response payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// End-to-end handling of one chat turn: resume detection, classification,
/// date resolution, mode gating, required-field validation and tool dispatch.
/// Stateless across turns; everything multi-turn rides in the request.
pub struct ChatPipeline<P> {
    extractor: FieldExtractor<P>,
    registry: ToolRegistry,
    store: Arc<dyn TransactionStore>,
    modes: ModeTable,
}

impl<P: ModelProvider> ChatPipeline<P> {
    pub fn new(
        provider: P,
        store: Arc<dyn TransactionStore>,
        modes: ModeTable,
        call_timeout: Duration,
    ) -> Self {
        Self {
            extractor: FieldExtractor::new(provider, call_timeout),
            registry: ToolRegistry::with_standard_tools(Arc::clone(&store)),
            store,
            modes,
        }
    }

    /// Produces the complete framed response for one turn. Expected failures
    /// (irrelevant input, schema exhaustion, tool errors) come back as `Ok`
    /// with a framed message; only infrastructure faults surface as `Err`.
    pub async fn handle_turn(
        &self,
        user: &UserId,
        request: &ChatRequest,
        now: DateTime<Utc>,
        rng: &mut (impl Rng + Send),
    ) -> Result<Vec<StreamEvent>, PipelineError> {
        let correlation_id = Uuid::new_v4();
        info!(
            event_name = "pipeline.turn_started",
            correlation_id = %correlation_id,
            user = %user,
            message_count = request.messages.len(),
        );

        let Some(text) = request.latest_user_text() else {
            return Err(PipelineError::EmptyTurn);
        };

        if is_help_query(&text) {
            info!(event_name = "pipeline.help_answered", correlation_id = %correlation_id);
            return Ok(TurnStream::text(HELP_TEXT));
        }

        match classify_turn(&request.messages) {
            TurnKind::Resume { state } => {
                self.handle_resume(user, &state, &text, correlation_id).await
            }
            TurnKind::Fresh => {
                self.handle_fresh(user, request, &text, now, rng, correlation_id).await
            }
        }
    }

    /// Resume turns never call the model: the echoed snapshot carries the
    /// intent and previously collected fields, and the message text carries
    /// newly supplied values as a JSON object keyed by field name.
    async fn handle_resume(
        &self,
        user: &UserId,
        state: &ResumeState,
        text: &str,
        correlation_id: Uuid,
    ) -> Result<Vec<StreamEvent>, PipelineError> {
        let Some(intent) = state.parsed_intent() else {
            warn!(
                event_name = "pipeline.resume_unknown_intent",
                correlation_id = %correlation_id,
                intent = state.intent.as_str(),
            );
            return Ok(TurnStream::text(unknown_intent_reply(&state.intent)));
        };

        let prior = match state.partial_fields() {
            Ok(fields) => fields,
            Err(error) => {
                warn!(
                    event_name = "pipeline.resume_state_corrupt",
                    correlation_id = %correlation_id,
                    error = %error,
                );
                return Ok(TurnStream::text(COULD_NOT_UNDERSTAND));
            }
        };

        let collected = merge_partial_data(prior, supplied_fields(intent, text));
        info!(
            event_name = "pipeline.turn_resumed",
            correlation_id = %correlation_id,
            intent = intent.wire_name(),
            field_count = collected.len(),
        );

        if let Some(definition) = definition_for(intent) {
            let missing = find_missing(definition, &collected);
            if !missing.is_empty() {
                info!(
                    event_name = "pipeline.missing_fields",
                    correlation_id = %correlation_id,
                    intent = intent.wire_name(),
                    missing = ?missing,
                );
                let categories = self.store.categories(user).await?;
                let payload =
                    build_missing_fields_payload(definition, &collected, &missing, categories);
                return Ok(TurnStream::json(&payload)?);
            }
        }

        Ok(self.registry.dispatch(user, intent, &collected).await)
    }

    async fn handle_fresh(
        &self,
        user: &UserId,
        request: &ChatRequest,
        text: &str,
        now: DateTime<Utc>,
        rng: &mut (impl Rng + Send),
        correlation_id: Uuid,
    ) -> Result<Vec<StreamEvent>, PipelineError> {
        let categories = self.store.categories(user).await?;
        let system_prompt = build_classification_prompt(&categories, now);
        let history = request.transcript_before_current();

        let classified = match self.extractor.extract(text, &history, &system_prompt).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    event_name = "pipeline.extraction_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                );
                return Ok(TurnStream::text(COULD_NOT_UNDERSTAND));
            }
        };

        info!(
            event_name = "pipeline.classified",
            correlation_id = %correlation_id,
            intent = classified.intent.wire_name(),
            relevance = classified.relevance,
            field_count = classified.fields.len(),
        );

        if !classified.is_relevant() {
            info!(
                event_name = "pipeline.irrelevant",
                correlation_id = %correlation_id,
                relevance = classified.relevance,
            );
            return Ok(TurnStream::text(pick_variant(IRRELEVANT_REPLIES, rng)));
        }

        let ClassificationResult { intent, mut fields, .. } = classified;

        if definition_for(intent).is_some_and(|definition| definition.accepts_field(FIELD_START_DATE))
        {
            self.resolve_dates(&mut fields, text, now, correlation_id).await;
        }

        match self.modes.check(request.prompt_mode(), intent) {
            GateDecision::Allow => {}
            GateDecision::Reject { active, correct } => {
                info!(
                    event_name = "pipeline.mode_mismatch",
                    correlation_id = %correlation_id,
                    active = %active,
                    intent = intent.wire_name(),
                );
                return Ok(TurnStream::text(mode_mismatch_reply(correct)));
            }
        }

        if let Some(definition) = definition_for(intent) {
            let missing = find_missing(definition, &fields);
            if !missing.is_empty() {
                info!(
                    event_name = "pipeline.missing_fields",
                    correlation_id = %correlation_id,
                    intent = intent.wire_name(),
                    missing = ?missing,
                );
                let payload = build_missing_fields_payload(definition, &fields, &missing, categories);
                return Ok(TurnStream::json(&payload)?);
            }
        }

        Ok(self.registry.dispatch(user, intent, &fields).await)
    }

    /// Fills and normalizes the date pair for range-capable intents: a
    /// relative phrase in the raw text fills an empty pair, a lone
    /// model-supplied bound gets one narrow inference for its partner, and
    /// whatever pair survives is swapped, widened and clamped into a valid
    /// past window. A bound still missing after all that is stripped.
    async fn resolve_dates(
        &self,
        fields: &mut PartialFields,
        text: &str,
        now: DateTime<Utc>,
        correlation_id: Uuid,
    ) {
        let has_start = fields.is_present(FIELD_START_DATE);
        let has_end = fields.is_present(FIELD_END_DATE);

        match (has_start, has_end) {
            (false, false) => {
                if let Some(range) = resolve_relative_expression(text, now) {
                    debug!(
                        event_name = "pipeline.relative_range_resolved",
                        correlation_id = %correlation_id,
                        start = %range.start,
                        end = %range.end,
                    );
                    apply_range(fields, range);
                }
            }
            (true, false) | (false, true) => {
                let (missing_name, known_name) = if has_start {
                    (FIELD_END_DATE, FIELD_START_DATE)
                } else {
                    (FIELD_START_DATE, FIELD_END_DATE)
                };
                if let Some(known) = fields.instant(known_name) {
                    let known_text = known.to_rfc3339_opts(SecondsFormat::Millis, true);
                    let inferred = self
                        .extractor
                        .infer_single_field(missing_name, known_name, &known_text, text, now)
                        .await;
                    match inferred {
                        Some(value) => fields.insert(missing_name, value),
                        None => debug!(
                            event_name = "pipeline.bound_inference_empty",
                            correlation_id = %correlation_id,
                            field = missing_name,
                        ),
                    }
                }
            }
            (true, true) => {}
        }

        if let Some(range) = range_of(fields) {
            let normalized = clamp_range_to_now(widen_plain_day(swap_if_inverted(range)), now);
            apply_range(fields, normalized);
        }

        if let Some(dropped) = enforce_pairing(fields) {
            debug!(
                event_name = "pipeline.lone_bound_dropped",
                correlation_id = %correlation_id,
                field = dropped,
            );
        }
    }
}

/// Values supplied on a resume turn ride in the message text as a JSON
/// object keyed by field name. Anything else (prose, foreign keys, unusable
/// values) contributes nothing, leaving those fields missing so the form is
/// asked for again.
fn supplied_fields(intent: IntentKind, text: &str) -> PartialFields {
    let mut supplied = PartialFields::new();
    let Ok(Value::Object(entries)) = serde_json::from_str::<Value>(text) else {
        return supplied;
    };
    let Some(definition) = definition_for(intent) else {
        return supplied;
    };

    for (name, value) in &entries {
        if !definition.accepts_field(name) {
            continue;
        }
        if let Err(error) = supplied.insert_json(name, value) {
            debug!(
                event_name = "pipeline.supplied_value_skipped",
                field = name.as_str(),
                error = %error,
            );
        }
    }
    supplied
}
