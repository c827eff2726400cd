use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::IntentKind;
use crate::errors::DomainError;
use crate::fields::PartialFields;
use crate::modes::PromptMode;

/// Inbound chat turn: the full message transcript as the client holds it.
/// All multi-turn state rides inside message metadata; the server keeps none.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    Text { text: String },
    /// Recorded on assistant messages once a tool call completed for that
    /// turn. Drives the double-resume guard.
    ToolResult { tool_name: String },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Active UI mode for this conversation, absent for programmatic callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<PromptMode>,
    #[serde(default)]
    pub resume_intent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<ResumeState>,
    /// UI-only marker for messages the client does not display.
    #[serde(default)]
    pub hidden: bool,
}

/// Client-echoed snapshot of a paused multi-turn flow. The intent name stays
/// a raw string so an unknown name surfaces as a pipeline message instead of
/// a deserialization failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub intent: String,
    #[serde(default)]
    pub context: ResumeContext,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeContext {
    #[serde(default)]
    pub partial_data: serde_json::Map<String, Value>,
}

impl ResumeState {
    pub fn new(kind: IntentKind, fields: &PartialFields) -> Self {
        Self {
            intent: kind.wire_name().to_owned(),
            context: ResumeContext { partial_data: fields.to_json_object() },
        }
    }

    pub fn parsed_intent(&self) -> Option<IntentKind> {
        IntentKind::parse(&self.intent)
    }

    pub fn partial_fields(&self) -> Result<PartialFields, DomainError> {
        PartialFields::from_json_object(&self.context.partial_data)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnKind {
    Fresh,
    Resume { state: ResumeState },
}

/// A flattened transcript entry handed to the classification model as
/// conversation history.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn text(&self) -> String {
        let mut combined = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                if !combined.is_empty() {
                    combined.push('\n');
                }
                combined.push_str(text);
            }
        }
        combined
    }

    pub fn completed_tool_call(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, MessagePart::ToolResult { .. }))
    }
}

impl ChatRequest {
    pub fn latest_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.role == Role::User)
    }

    pub fn latest_user_text(&self) -> Option<String> {
        self.latest_user_message().map(ChatMessage::text).filter(|text| !text.trim().is_empty())
    }

    pub fn prompt_mode(&self) -> Option<PromptMode> {
        self.latest_user_message()?.metadata.as_ref()?.intent
    }

    /// Prior turns, oldest first, excluding the message currently being
    /// handled. Empty-text entries are dropped.
    pub fn transcript_before_current(&self) -> Vec<TranscriptTurn> {
        let Some(current) = self.messages.iter().rposition(|message| message.role == Role::User)
        else {
            return Vec::new();
        };

        self.messages[..current]
            .iter()
            .map(|message| TranscriptTurn { role: message.role, text: message.text() })
            .filter(|turn| !turn.text.trim().is_empty())
            .collect()
    }
}

/// Decides whether the incoming turn resumes a paused flow or starts fresh.
///
/// A turn only counts as a resume when the client echoes both the resume flag
/// and a state snapshot, and the assistant turn immediately before it did not
/// already complete a tool call. The second condition guards against a client
/// re-submitting resume data for a flow that was already fulfilled.
pub fn classify_turn(messages: &[ChatMessage]) -> TurnKind {
    let Some(current_index) = messages.iter().rposition(|message| message.role == Role::User)
    else {
        return TurnKind::Fresh;
    };

    let Some(metadata) = messages[current_index].metadata.as_ref() else {
        return TurnKind::Fresh;
    };
    if !metadata.resume_intent {
        return TurnKind::Fresh;
    }
    let Some(state) = metadata.resume_state.clone() else {
        return TurnKind::Fresh;
    };

    let already_fulfilled = messages[..current_index]
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant)
        .map(ChatMessage::completed_tool_call)
        .unwrap_or(false);
    if already_fulfilled {
        return TurnKind::Fresh;
    }

    TurnKind::Resume { state }
}

/// Newly supplied values win; keys the user did not re-supply keep their
/// previously collected values. Merging an empty map is the identity.
pub fn merge_partial_data(prior: PartialFields, supplied: PartialFields) -> PartialFields {
    prior.merged_with(supplied)
}
