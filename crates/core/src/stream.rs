use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One frame of the outbound response protocol. The client renders these
/// incrementally; `type` plus camelCase payload keys are the wire contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Start,
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    StartStep,
    ToolInputStart { tool_call_id: String, tool_name: String },
    ToolInputAvailable { tool_call_id: String, tool_name: String, input: Value },
    ToolOutputAvailable { tool_call_id: String, output: Value },
    FinishStep,
    Finish,
}

/// Builds the three legal turn framings. Streams are append-only and
/// single-pass: each constructor returns the complete ordered sequence, and
/// exactly one shape is produced per turn.
pub struct TurnStream;

impl TurnStream {
    /// `start` → `text-start` → `text-delta` → `text-end` → `finish`.
    pub fn text(message: impl Into<String>) -> Vec<StreamEvent> {
        let id = new_id();
        vec![
            StreamEvent::Start,
            StreamEvent::TextStart { id: id.clone() },
            StreamEvent::TextDelta { id: id.clone(), delta: message.into() },
            StreamEvent::TextEnd { id },
            StreamEvent::Finish,
        ]
    }

    /// Same framing as [`TurnStream::text`], the delta carrying a serialized
    /// JSON object for structured-but-non-tool payloads.
    pub fn json<T: Serialize>(payload: &T) -> Result<Vec<StreamEvent>, serde_json::Error> {
        Ok(Self::text(serde_json::to_string(payload)?))
    }

    /// `start` → `start-step` → `tool-input-start` → `tool-input-available`
    /// → `tool-output-available` → `finish-step` → `finish`.
    pub fn tool_result(tool_name: &str, input: Value, output: Value) -> Vec<StreamEvent> {
        let tool_call_id = new_id();
        vec![
            StreamEvent::Start,
            StreamEvent::StartStep,
            StreamEvent::ToolInputStart {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.to_owned(),
            },
            StreamEvent::ToolInputAvailable {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.to_owned(),
                input,
            },
            StreamEvent::ToolOutputAvailable { tool_call_id, output },
            StreamEvent::FinishStep,
            StreamEvent::Finish,
        ]
    }

    /// Tool framing whose output slot is replaced by a failure message, so
    /// the client stream still terminates cleanly after an execution error.
    pub fn tool_failure(tool_name: &str, input: Value, failure: &str) -> Vec<StreamEvent> {
        let tool_call_id = new_id();
        let text_id = new_id();
        vec![
            StreamEvent::Start,
            StreamEvent::StartStep,
            StreamEvent::ToolInputStart {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.to_owned(),
            },
            StreamEvent::ToolInputAvailable {
                tool_call_id,
                tool_name: tool_name.to_owned(),
                input,
            },
            StreamEvent::TextStart { id: text_id.clone() },
            StreamEvent::TextDelta { id: text_id.clone(), delta: failure.to_owned() },
            StreamEvent::TextEnd { id: text_id },
            StreamEvent::FinishStep,
            StreamEvent::Finish,
        ]
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::stream::{StreamEvent, TurnStream};

    fn type_names(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| {
                serde_json::to_value(event).expect("event should serialize")["type"]
                    .as_str()
                    .expect("type tag should be a string")
                    .to_owned()
            })
            .collect()
    }

    #[test]
    fn text_turn_uses_the_text_framing() {
        let events = TurnStream::text("hello");
        assert_eq!(
            type_names(&events),
            vec!["start", "text-start", "text-delta", "text-end", "finish"]
        );

        let delta = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .expect("delta should exist");
        assert_eq!(delta, "hello");
    }

    #[test]
    fn text_framing_shares_one_text_id() {
        let events = TurnStream::text("hello");
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::TextStart { id }
                | StreamEvent::TextDelta { id, .. }
                | StreamEvent::TextEnd { id } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn json_turn_carries_the_serialized_payload_as_a_delta() {
        let events =
            TurnStream::json(&json!({"type": "missing_fields"})).expect("payload serializes");
        assert_eq!(
            type_names(&events),
            vec!["start", "text-start", "text-delta", "text-end", "finish"]
        );

        let delta = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .expect("delta should exist");
        let decoded: serde_json::Value =
            serde_json::from_str(&delta).expect("delta should be JSON");
        assert_eq!(decoded["type"], "missing_fields");
    }

    #[test]
    fn tool_turn_frames_input_and_output_steps() {
        let events = TurnStream::tool_result(
            "totalSpend",
            json!({"startDate": "2024-05-01T00:00:00.000Z"}),
            json!({"message": "You spent 1200"}),
        );
        assert_eq!(
            type_names(&events),
            vec![
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-available",
                "tool-output-available",
                "finish-step",
                "finish"
            ]
        );
    }

    #[test]
    fn tool_failure_replaces_output_with_a_text_message() {
        let events = TurnStream::tool_failure("recordExpense", json!({}), "store unavailable");
        assert_eq!(
            type_names(&events),
            vec![
                "start",
                "start-step",
                "tool-input-start",
                "tool-input-available",
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert!(!events
            .iter()
            .any(|event| matches!(event, StreamEvent::ToolOutputAvailable { .. })));
    }

    #[test]
    fn wire_events_use_camel_case_keys() {
        let event = StreamEvent::ToolInputAvailable {
            tool_call_id: "call-1".to_owned(),
            tool_name: "totalSpend".to_owned(),
            input: json!({}),
        };
        let encoded = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(encoded["type"], "tool-input-available");
        assert_eq!(encoded["toolCallId"], "call-1");
        assert_eq!(encoded["toolName"], "totalSpend");
    }
}
