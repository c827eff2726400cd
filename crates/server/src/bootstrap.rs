use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use trackcrow_agent::pipeline::ChatPipeline;
use trackcrow_agent::provider::{HttpModelProvider, ProviderConfig, ProviderError};
use trackcrow_agent::store::{InMemoryTransactionStore, TransactionStore};
use trackcrow_core::config::{AppConfig, ConfigError};

use crate::chat::{ChatState, IdentityResolver, OpaqueTokenIdentity};

pub struct Application {
    pub config: AppConfig,
    pipeline: Arc<ChatPipeline<HttpModelProvider>>,
    identity: Arc<dyn IdentityResolver>,
}

impl Application {
    pub fn chat_state(&self) -> ChatState<HttpModelProvider> {
        ChatState { pipeline: Arc::clone(&self.pipeline), identity: Arc::clone(&self.identity) }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model provider initialization failed: {0}")]
    Provider(#[from] ProviderError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap.start", "starting application bootstrap");

    let modes = config.modes.to_table()?;
    let call_timeout = Duration::from_secs(config.llm.timeout_secs);
    let provider = HttpModelProvider::new(ProviderConfig {
        base_url: config.llm.base_url.clone(),
        model: config.llm.model.clone(),
        api_key: config.llm.api_key.clone(),
        temperature: config.llm.temperature,
        timeout: call_timeout,
    })?;
    info!(
        event_name = "bootstrap.provider_ready",
        base_url = config.llm.base_url.as_str(),
        model = config.llm.model.as_str(),
        "model provider configured"
    );

    let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let pipeline = ChatPipeline::new(provider, store, modes, call_timeout);
    info!(event_name = "bootstrap.pipeline_ready", "chat pipeline assembled");

    Ok(Application {
        config,
        pipeline: Arc::new(pipeline),
        identity: Arc::new(OpaqueTokenIdentity),
    })
}
