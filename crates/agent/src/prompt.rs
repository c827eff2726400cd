use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

use trackcrow_core::catalog::{definitions, Category, IntentDefinition, RELEVANCE_THRESHOLD};
use trackcrow_core::fields::{FieldKind, FIELD_END_DATE, FIELD_START_DATE};
use trackcrow_core::timeframe::month_bounds;

/// Deterministic system prompt for the classification call. Pure string
/// assembly; the only inputs that vary are the clock and the caller's
/// category vocabulary.
pub fn build_classification_prompt(categories: &[Category], now: DateTime<Utc>) -> String {
    let month = month_bounds(now);
    let mut prompt = String::new();

    prompt.push_str(
        "You are the intent classifier for TrackCrow, a personal expense tracker. \
         Classify the user's latest message and extract its fields.\n\n",
    );

    prompt.push_str("Time context (all times UTC):\n");
    let _ = writeln!(prompt, "- now: {}", wire_instant(now));
    let _ = writeln!(prompt, "- current month start: {}", wire_instant(month.start));
    let _ = writeln!(prompt, "- current month end: {}", wire_instant(month.end));
    prompt.push('\n');

    prompt.push_str("Supported intents:\n");
    for definition in definitions() {
        append_intent_entry(&mut prompt, definition);
    }
    prompt.push('\n');

    prompt.push_str("Date rules:\n");
    prompt.push_str("- Every date is an ISO-8601 UTC instant, e.g. 2024-05-15T00:00:00.000Z.\n");
    prompt.push_str(
        "- Dates never lie in the future. A day or month the user names that has not \
         happened yet this cycle means the most recent past occurrence.\n",
    );
    prompt.push_str(
        "- Relative phrases (today, yesterday, this week, last month, past 7 days) resolve \
         against `now` above. \"this ...\" periods end at `now`; \"last ...\" periods cover \
         the full previous cycle.\n",
    );
    let _ = writeln!(
        prompt,
        "- When a message implies a period, set both {FIELD_START_DATE} and {FIELD_END_DATE}. \
         When it implies none, omit both. Never emit only one of the pair."
    );
    prompt.push('\n');

    prompt.push_str("Category vocabulary (use these exact spellings, never invent new ones):\n");
    if categories.is_empty() {
        prompt.push_str("- (none recorded yet; leave category fields for the user to fill)\n");
    }
    for category in categories {
        if category.subcategories.is_empty() {
            let _ = writeln!(prompt, "- {}", category.name);
        } else {
            let _ = writeln!(prompt, "- {}: {}", category.name, category.subcategories.join(", "));
        }
    }
    prompt.push('\n');

    prompt.push_str("Output format:\n");
    prompt.push_str(
        "Return ONLY one JSON object, no prose and no markdown fences:\n\
         {\"relevance\": 0-5, \"intent\": \"<intent name>\", \"structured_data\": {...}}\n",
    );
    prompt.push_str(
        "- relevance: 5 = clearly an expense action or question, 0 = unrelated chatter.\n",
    );
    let _ = writeln!(
        prompt,
        "- If relevance is below {RELEVANCE_THRESHOLD}, set intent to \"other\" and \
         structured_data to {{}}."
    );
    prompt.push_str(
        "- structured_data keys come only from the matched intent's field list. \
         Amounts are JSON numbers. Omit fields the message does not supply; never guess.\n",
    );

    prompt
}

/// Narrow prompt for inferring the missing half of a date pair. The user's
/// original message is sent as the user turn, not embedded here.
pub fn build_single_field_prompt(
    field: &str,
    known_field: &str,
    known_value: &str,
    now: DateTime<Utc>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You infer one missing value for TrackCrow, a personal expense tracker. \
         The user's message established {known_field} = {known_value}, but not `{field}`."
    );
    let _ = writeln!(prompt, "Current time (UTC): {}", wire_instant(now));
    let _ = writeln!(
        prompt,
        "Infer `{field}` from the message. It must be an ISO-8601 UTC instant, must not lie \
         in the future, and must form a sensible range with {known_field}."
    );
    prompt.push_str(
        "Return ONLY one JSON object, no prose: {\"value\": \"<ISO-8601 UTC instant>\"}. \
         If the message gives no basis for the value, return {\"value\": null}.\n",
    );
    prompt
}

fn append_intent_entry(prompt: &mut String, definition: &IntentDefinition) {
    let _ = writeln!(prompt, "- {}: {}", definition.kind.wire_name(), definition.description);
    let _ = writeln!(prompt, "  required: {}", describe_fields(definition.required));
    if !definition.optional.is_empty() {
        let _ = writeln!(prompt, "  optional: {}", describe_fields(definition.optional));
    }
    for example in definition.examples {
        let _ = writeln!(prompt, "  example: \"{example}\"");
    }
}

fn describe_fields(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("{name} ({})", type_hint(name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn type_hint(name: &str) -> &'static str {
    match FieldKind::for_name(name) {
        FieldKind::Amount => "number",
        FieldKind::Instant => "ISO-8601 UTC",
        FieldKind::Text => "text",
    }
}

fn wire_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use trackcrow_core::catalog::{definitions, Category};

    use crate::prompt::{build_classification_prompt, build_single_field_prompt};

    fn reference_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn classification_prompt_names_every_intent() {
        let prompt = build_classification_prompt(&[], reference_now());
        for definition in definitions() {
            assert!(
                prompt.contains(definition.kind.wire_name()),
                "prompt is missing {}",
                definition.kind
            );
        }
    }

    #[test]
    fn classification_prompt_carries_time_context_and_output_shape() {
        let prompt = build_classification_prompt(&[], reference_now());
        assert!(prompt.contains("2024-05-15T10:30:00.000Z"));
        assert!(prompt.contains("2024-05-01T00:00:00.000Z"));
        assert!(prompt.contains("2024-05-31T23:59:59.999Z"));
        assert!(prompt.contains("structured_data"));
        assert!(prompt.contains("\"relevance\""));
        assert!(prompt.contains("never lie in the future"));
    }

    #[test]
    fn category_vocabulary_is_embedded_verbatim() {
        let categories = vec![
            Category::new("Food", &["Lunch", "Groceries"]),
            Category::new("Travel", &[]),
        ];
        let prompt = build_classification_prompt(&categories, reference_now());
        assert!(prompt.contains("- Food: Lunch, Groceries"));
        assert!(prompt.contains("- Travel"));
        assert!(prompt.contains("never invent"));
    }

    #[test]
    fn single_field_prompt_names_both_halves_of_the_pair() {
        let prompt = build_single_field_prompt(
            "endDate",
            "startDate",
            "2024-05-01T00:00:00.000Z",
            reference_now(),
        );
        assert!(prompt.contains("`endDate`"));
        assert!(prompt.contains("startDate = 2024-05-01T00:00:00.000Z"));
        assert!(prompt.contains("{\"value\""));
        assert!(prompt.contains("2024-05-15T10:30:00.000Z"));
    }

    #[test]
    fn prompt_is_deterministic_for_fixed_inputs() {
        let categories = vec![Category::new("Food", &["Lunch"])];
        let first = build_classification_prompt(&categories, reference_now());
        let second = build_classification_prompt(&categories, reference_now());
        assert_eq!(first, second);
    }
}
