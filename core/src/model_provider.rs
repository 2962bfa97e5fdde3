//! Registry of model providers the classifier can call.
//!
//! Providers expose OpenAI-compatible `chat/completions` endpoints.
//! Credentials are discovered by environment variable name; the fallback
//! chain at runtime is the registry order filtered to providers that
//! actually have a key (Ollama needs none and is always last).

use serde::Deserialize;
use serde::Serialize;

/// Serializable representation of a provider definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelProviderInfo {
    /// Friendly display name.
    pub name: String,
    /// Base URL for the provider's OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable that stores the user's API key for this
    /// provider. Empty means no credential is required.
    pub env_key: String,
    /// Model used for validation calls unless overridden.
    pub default_model: String,
}

impl ModelProviderInfo {
    /// Returns the API key for this provider if present in the environment.
    pub fn api_key(&self) -> Option<String> {
        if self.env_key.is_empty() {
            return None;
        }
        std::env::var(&self.env_key).ok().filter(|k| !k.is_empty())
    }

    /// A provider is usable if it needs no key or one is present.
    pub fn has_credentials(&self) -> bool {
        self.env_key.is_empty() || self.api_key().is_some()
    }
}

/// Built-in provider list, in fallback order.
pub fn built_in_model_providers() -> Vec<ModelProviderInfo> {
    use ModelProviderInfo as P;

    vec![
        P {
            name: "OpenAI".into(),
            base_url: "https://api.openai.com/v1".into(),
            env_key: "OPENAI_API_KEY".into(),
            default_model: "gpt-4o-mini".into(),
        },
        P {
            name: "OpenRouter".into(),
            base_url: "https://openrouter.ai/api/v1".into(),
            env_key: "OPENROUTER_API_KEY".into(),
            default_model: "openai/gpt-4o-mini".into(),
        },
        P {
            name: "Groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            env_key: "GROQ_API_KEY".into(),
            default_model: "llama-3.3-70b-versatile".into(),
        },
        P {
            name: "Mistral".into(),
            base_url: "https://api.mistral.ai/v1".into(),
            env_key: "MISTRAL_API_KEY".into(),
            default_model: "mistral-small-latest".into(),
        },
        P {
            name: "DeepSeek".into(),
            base_url: "https://api.deepseek.com".into(),
            env_key: "DEEPSEEK_API_KEY".into(),
            default_model: "deepseek-chat".into(),
        },
        P {
            name: "xAI".into(),
            base_url: "https://api.x.ai/v1".into(),
            env_key: "XAI_API_KEY".into(),
            default_model: "grok-3-mini".into(),
        },
        P {
            name: "Ollama".into(),
            base_url: "http://localhost:11434/v1".into(),
            env_key: String::new(),
            default_model: "llama3.1".into(),
        },
    ]
}
