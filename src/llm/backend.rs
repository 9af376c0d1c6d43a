use std::env;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::{BackendError, ConfigError};
use crate::llm::client::HttpBackend;
use crate::llm::command::CommandBackend;
use crate::llm::prompt::LlmPrompt;

/// A text-completion provider. Implementations must be cancel-safe: the
/// caller may drop the future at any await point.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &LlmPrompt, max_tokens: u32) -> Result<String, BackendError>;

    /// Short label for logs and reports.
    fn name(&self) -> String;
}

/// Build the configured backend. Missing credentials are a config error.
pub fn from_config(cfg: &BackendConfig) -> Result<Arc<dyn CompletionBackend>, ConfigError> {
    match cfg {
        BackendConfig::Http {
            provider,
            model,
            api_key_env,
            base_url,
        } => {
            let api_key = env::var(api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential(api_key_env.clone()))?;

            let backend = HttpBackend::new(*provider, model.clone(), api_key, base_url.clone())
                .map_err(|e| ConfigError::invalid("backend", e.to_string()))?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Command { program, args } => {
            if program.trim().is_empty() {
                return Err(ConfigError::invalid("backend.program", "must not be empty"));
            }
            Ok(Arc::new(CommandBackend::new(program.clone(), args.clone())))
        }
    }
}
