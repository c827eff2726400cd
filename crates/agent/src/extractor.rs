use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use trackcrow_core::catalog::{
    definition_for, ClassificationResult, IntentKind, MAX_RELEVANCE, RELEVANCE_THRESHOLD,
};
use trackcrow_core::conversation::TranscriptTurn;
use trackcrow_core::fields::{parse_instant, FieldValue, PartialFields};

use crate::prompt::build_single_field_prompt;
use crate::provider::ModelProvider;

/// One retry, then fatal for the turn.
const EXTRACTION_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
#[error("classification failed after {attempts} attempts: {last_failure}")]
pub struct ExtractError {
    pub attempts: u32,
    pub last_failure: String,
}

/// Wraps the model provider with the schema policy: every call is bounded by
/// a timeout, every response is validated against the intent catalog, and a
/// failed attempt of either kind is retried exactly once.
pub struct FieldExtractor<P> {
    provider: P,
    call_timeout: Duration,
}

impl<P: ModelProvider> FieldExtractor<P> {
    pub fn new(provider: P, call_timeout: Duration) -> Self {
        Self { provider, call_timeout }
    }

    pub async fn extract(
        &self,
        raw_text: &str,
        history: &[TranscriptTurn],
        system_prompt: &str,
    ) -> Result<ClassificationResult, ExtractError> {
        let mut last_failure = String::new();
        for attempt in 1..=EXTRACTION_ATTEMPTS {
            match self.attempt(raw_text, history, system_prompt).await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(event_name = "extractor.retry_succeeded", attempt);
                    }
                    return Ok(result);
                }
                Err(failure) => {
                    warn!(
                        event_name = "extractor.attempt_failed",
                        attempt,
                        max_attempts = EXTRACTION_ATTEMPTS,
                        failure = %failure,
                    );
                    last_failure = failure;
                }
            }
        }

        Err(ExtractError { attempts: EXTRACTION_ATTEMPTS, last_failure })
    }

    /// Narrow single-field inference used to complete a half-specified date
    /// pair. Single attempt; any failure, including an instant that would
    /// land in the future, yields `None` rather than an error.
    pub async fn infer_single_field(
        &self,
        field: &str,
        known_field: &str,
        known_value: &str,
        raw_text: &str,
        now: DateTime<Utc>,
    ) -> Option<FieldValue> {
        let prompt = build_single_field_prompt(field, known_field, known_value, now);
        let object = self.call_provider(&prompt, &[], raw_text).await.ok()?;
        let text = object.get("value")?.as_str()?;
        let instant = parse_instant(text)?;
        if instant > now {
            debug!(
                event_name = "extractor.future_inference_discarded",
                field,
                inferred = %instant,
            );
            return None;
        }
        Some(FieldValue::Instant(instant))
    }

    async fn attempt(
        &self,
        raw_text: &str,
        history: &[TranscriptTurn],
        system_prompt: &str,
    ) -> Result<ClassificationResult, String> {
        let object = self.call_provider(system_prompt, history, raw_text).await?;
        validate_classification(&object)
    }

    async fn call_provider(
        &self,
        system: &str,
        history: &[TranscriptTurn],
        user_text: &str,
    ) -> Result<Value, String> {
        let call = self.provider.generate_object(system, history, user_text);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(object)) => Ok(object),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!("model call timed out after {:?}", self.call_timeout)),
        }
    }
}

/// Checks a raw model object against the classification schema. Sub-threshold
/// relevance normalises to `other` with no fields, whatever else the model
/// claimed; above the threshold, field keys are restricted to the matched
/// intent's field union and values must coerce to their expected shapes.
fn validate_classification(object: &Value) -> Result<ClassificationResult, String> {
    let relevance = object
        .get("relevance")
        .and_then(Value::as_u64)
        .ok_or_else(|| "`relevance` must be a non-negative integer".to_owned())?;
    if relevance > u64::from(MAX_RELEVANCE) {
        return Err(format!("`relevance` must be 0-{MAX_RELEVANCE}, got {relevance}"));
    }
    let relevance = relevance as u8;

    let intent_name = object
        .get("intent")
        .and_then(Value::as_str)
        .ok_or_else(|| "`intent` must be a string".to_owned())?;
    let intent = IntentKind::parse(intent_name)
        .ok_or_else(|| format!("`{intent_name}` is not a supported intent"))?;

    if relevance < RELEVANCE_THRESHOLD || intent == IntentKind::Other {
        return Ok(ClassificationResult {
            relevance,
            intent: IntentKind::Other,
            fields: PartialFields::new(),
        });
    }

    let mut fields = PartialFields::new();
    match object.get("structured_data") {
        None | Some(Value::Null) => {}
        Some(Value::Object(entries)) => {
            let definition = definition_for(intent)
                .ok_or_else(|| format!("`{intent_name}` has no field definition"))?;
            for (name, value) in entries {
                if !definition.accepts_field(name) {
                    return Err(format!("field `{name}` is not part of `{intent_name}`"));
                }
                fields.insert_json(name, value).map_err(|error| error.to_string())?;
            }
        }
        Some(other) => {
            return Err(format!("`structured_data` must be an object, got {other}"));
        }
    }

    Ok(ClassificationResult { relevance, intent, fields })
}
