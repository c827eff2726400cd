use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use trackcrow_agent::pipeline::ChatPipeline;
use trackcrow_agent::provider::ModelProvider;
use trackcrow_agent::store::UserId;
use trackcrow_core::conversation::ChatRequest;
use trackcrow_core::stream::StreamEvent;

/// Maps a bearer token to the ledger owner it belongs to. Token issuance is
/// the session system's job, which lives outside this service.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, bearer_token: &str) -> Option<UserId>;
}

/// Resolver for the in-memory deployment: every distinct token owns its own
/// ledger. A session-backed deployment plugs its own resolver in here.
pub struct OpaqueTokenIdentity;

impl IdentityResolver for OpaqueTokenIdentity {
    fn resolve(&self, bearer_token: &str) -> Option<UserId> {
        let token = bearer_token.trim();
        if token.is_empty() {
            None
        } else {
            Some(UserId::new(token))
        }
    }
}

pub struct ChatState<P> {
    pub pipeline: Arc<ChatPipeline<P>>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl<P> Clone for ChatState<P> {
    fn clone(&self) -> Self {
        Self { pipeline: Arc::clone(&self.pipeline), identity: Arc::clone(&self.identity) }
    }
}

pub fn router<P: ModelProvider + 'static>(state: ChatState<P>) -> Router {
    Router::new().route("/api/chat", post(chat::<P>)).with_state(state)
}

/// POST /api/chat. Authentication failures stay plain HTTP; once a turn
/// reaches the pipeline every outcome, including tool and model failures, is
/// streamed back with status 200.
async fn chat<P: ModelProvider + 'static>(
    State(state): State<ChatState<P>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(user) = bearer_token(&headers).and_then(|token| state.identity.resolve(token)) else {
        info!(event_name = "chat.unauthorized", "rejected request without a usable bearer token");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    let request = match serde_json::from_str::<ChatRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            warn!(event_name = "chat.request_undecodable", error = %error);
            return internal_error();
        }
    };

    let mut rng = StdRng::from_entropy();
    match state.pipeline.handle_turn(&user, &request, Utc::now(), &mut rng).await {
        Ok(events) => stream_response(&events),
        Err(error) => {
            error!(event_name = "chat.turn_failed", error = %error);
            internal_error()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Server-sent-events encoding of a turn's frame sequence. The pipeline hands
/// over the complete sequence, so the body is assembled in one pass and closed
/// with the protocol's `[DONE]` marker.
fn stream_response(events: &[StreamEvent]) -> Response {
    let mut body = String::new();
    for event in events {
        match serde_json::to_string(event) {
            Ok(encoded) => {
                body.push_str("data: ");
                body.push_str(&encoded);
                body.push_str("\n\n");
            }
            Err(error) => {
                error!(event_name = "chat.frame_encode_failed", error = %error);
                return internal_error();
            }
        }
    }
    body.push_str("data: [DONE]\n\n");

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::extract::State;
    use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
    use axum::response::Response;
    use serde_json::Value;

    use trackcrow_agent::pipeline::ChatPipeline;
    use trackcrow_agent::provider::{ModelProvider, ProviderError};
    use trackcrow_agent::store::{InMemoryTransactionStore, TransactionStore};
    use trackcrow_core::conversation::TranscriptTurn;
    use trackcrow_core::modes::ModeTable;

    use crate::chat::{chat, ChatState, OpaqueTokenIdentity};

    struct NoModel;

    #[async_trait]
    impl ModelProvider for NoModel {
        async fn generate_object(
            &self,
            _system: &str,
            _history: &[TranscriptTurn],
            _user_text: &str,
        ) -> Result<Value, ProviderError> {
            Err(ProviderError::Transport("no model in transport tests".to_owned()))
        }
    }

    fn state() -> ChatState<NoModel> {
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
        ChatState {
            pipeline: Arc::new(ChatPipeline::new(
                NoModel,
                store,
                ModeTable::with_defaults(),
                Duration::from_secs(1),
            )),
            identity: Arc::new(OpaqueTokenIdentity),
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
        headers
    }

    fn help_body() -> String {
        r#"{"messages":[{"role":"user","parts":[{"type":"text","text":"What is TrackCrow?"}]}]}"#
            .to_owned()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body bytes");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn missing_bearer_token_is_unauthorized() {
        let response = chat(State(state()), HeaderMap::new(), help_body()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await, "Unauthorized");
    }

    #[tokio::test]
    async fn blank_bearer_token_is_unauthorized() {
        let response = chat(State(state()), bearer("   "), help_body()).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn undecodable_body_maps_to_internal_error() {
        let response = chat(State(state()), bearer("tester"), "not json".to_owned()).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal Server Error");
    }

    #[tokio::test]
    async fn handled_turn_streams_event_frames() {
        let response = chat(State(state()), bearer("tester"), help_body()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("text/event-stream"),
        );

        let body = body_text(response).await;
        assert!(body.starts_with("data: {\"type\":\"start\"}"));
        assert!(body.contains("\"type\":\"text-delta\""));
        assert!(body.contains("TrackCrow is your personal expense assistant"));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }
}
