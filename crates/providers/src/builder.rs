//! Build the configured backend from [`AppConfig`].

use std::sync::Arc;

use chorus_config::AppConfig;
use chorus_core::Backend;
use chorus_core::error::BackendError;
use tracing::info;

use crate::alternation::StrictAlternation;
use crate::openai_compat::OpenAiCompatBackend;

/// Construct the default backend named by `config.default_backend`.
///
/// Backends that don't run locally need an API key.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Backend>, BackendError> {
    let name = config.default_backend.as_str();
    let backend_config = config.backend();

    let base_url = backend_config
        .api_url
        .clone()
        .or_else(|| default_base_url(name))
        .ok_or_else(|| BackendError::NotConfigured(format!("no api_url for backend '{name}'")))?;

    let api_key = match (backend_config.api_key.clone(), name) {
        (Some(key), _) => key,
        (None, "ollama") => "ollama".into(),
        (None, _) => {
            return Err(BackendError::NotConfigured(format!(
                "no API key for backend '{name}' (set CHORUS_API_KEY)"
            )));
        }
    };

    let model = backend_config
        .model
        .clone()
        .unwrap_or_else(|| default_model(name).into());

    info!(backend = %name, model = %model, url = %base_url, "Using backend");
    let backend = OpenAiCompatBackend::new(name, base_url, api_key, model);
    if backend_config.strict_alternation {
        Ok(Arc::new(StrictAlternation::new(backend)))
    } else {
        Ok(Arc::new(backend))
    }
}

/// Base URL for well-known backends.
fn default_base_url(name: &str) -> Option<String> {
    let url = match name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "together" => "https://api.together.xyz/v1",
        _ => return None,
    };
    Some(url.into())
}

fn default_model(name: &str) -> &'static str {
    match name {
        "ollama" => "llama3.1",
        "openrouter" => "openai/gpt-4o-mini",
        "deepseek" => "deepseek-chat",
        _ => "gpt-4o-mini",
    }
}
