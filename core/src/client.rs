//! Model client.
//!
//! [`LlmClient`] is the single seam between the validator and any language
//! model. The production implementation speaks the OpenAI-compatible
//! `chat/completions` API through an ordered provider fallback chain: the
//! first provider that returns a *well-formed* decision wins. A response is
//! well-formed iff it parses to a JSON object whose `action` case-folds to
//! allow/warn/block, whose `confidence` is a finite float, and whose
//! `reason` is a non-empty string. Anything else is provider failure, never
//! a demoted verdict.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::error::AegishErr;
use crate::error::Result;
use crate::model_provider::ModelProviderInfo;
use crate::protocol::DecisionAction;
use crate::protocol::sanitize_reason;
use crate::rate_limit::RateLimiter;
use crate::util::backoff;

/// Retries per provider for transport errors, 429 and 5xx.
const MAX_RETRIES_PER_PROVIDER: u64 = 2;

/// The model's verdict before policy aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmDecision {
    pub action: DecisionAction,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationPrompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One structured prompt in, one decision out. Implementations own
    /// retries, fallback and parsing; an `Err` is the failure sentinel the
    /// policy engine maps through the fail-mode.
    async fn validate(&self, prompt: &ValidationPrompt) -> Result<LlmDecision>;

    /// Primary model identifier, for the banner and audit events.
    fn model_name(&self) -> String;
}

pub struct ModelClient {
    providers: Vec<(ModelProviderInfo, String)>,
    http: reqwest::Client,
    limiter: RateLimiter,
    timeout: Duration,
}

impl ModelClient {
    /// Build a client over every provider with credentials, in registry
    /// order, with `model_override` applied to the first provider.
    pub fn from_available_providers(
        registry: Vec<ModelProviderInfo>,
        model_override: Option<&str>,
        queries_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let mut providers: Vec<(ModelProviderInfo, String)> = registry
            .into_iter()
            .filter(ModelProviderInfo::has_credentials)
            .map(|p| {
                let model = p.default_model.clone();
                (p, model)
            })
            .collect();
        if providers.is_empty() {
            return Err(AegishErr::ConfigInvalid(
                "no model provider credentials found".to_string(),
            ));
        }
        if let Some(model) = model_override {
            providers[0].1 = model.to_string();
        }
        Ok(Self::with_providers(providers, queries_per_minute, timeout))
    }

    pub fn with_providers(
        providers: Vec<(ModelProviderInfo, String)>,
        queries_per_minute: u32,
        timeout: Duration,
    ) -> Self {
        ModelClient {
            providers,
            http: reqwest::Client::new(),
            limiter: RateLimiter::new(queries_per_minute),
            timeout,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|(p, _)| p.name.clone()).collect()
    }

    async fn call_provider(
        &self,
        provider: &ModelProviderInfo,
        model: &str,
        prompt: &ValidationPrompt,
    ) -> Result<LlmDecision> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": 0.0,
            "stream": false,
        });
        let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));
        let api_key = provider.api_key();

        let mut attempt = 0u64;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let mut req = self.http.post(&url).timeout(self.timeout);
            if let Some(key) = &api_key {
                req = req.bearer_auth(key);
            }
            let res = req.json(&payload).send().await;

            match res {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await?;
                    let content = body
                        .pointer("/choices/0/message/content")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            AegishErr::ResponseMalformed(
                                "missing message content".to_string(),
                            )
                        })?;
                    return parse_decision(content);
                }
                Ok(resp) => {
                    let status = resp.status();
                    if !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()) {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AegishErr::UnexpectedStatus(status, body));
                    }
                    if attempt > MAX_RETRIES_PER_PROVIDER {
                        return Err(AegishErr::RetryLimit(status));
                    }
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    if attempt > MAX_RETRIES_PER_PROVIDER {
                        return Err(e.into());
                    }
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for ModelClient {
    async fn validate(&self, prompt: &ValidationPrompt) -> Result<LlmDecision> {
        for (provider, model) in &self.providers {
            match self.call_provider(provider, model, prompt).await {
                Ok(decision) => {
                    debug!(provider = %provider.name, "model decision: {:?}", decision.action);
                    return Ok(decision);
                }
                Err(e) => {
                    warn!(provider = %provider.name, "provider failed: {e}");
                }
            }
        }
        Err(AegishErr::ProviderUnavailable)
    }

    fn model_name(&self) -> String {
        self.providers
            .first()
            .map(|(p, m)| format!("{}/{}", p.name, m))
            .unwrap_or_else(|| "none".to_string())
    }
}

/// Locate the first balanced `{…}` in text that may carry markdown fences,
/// leading prose or trailing commentary.
pub fn extract_balanced_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (off, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + off + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the well-formedness contract to raw model output.
pub fn parse_decision(raw: &str) -> Result<LlmDecision> {
    let json_text = extract_balanced_json(raw)
        .ok_or_else(|| AegishErr::ResponseMalformed("no JSON object found".to_string()))?;
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| AegishErr::ResponseMalformed(format!("invalid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AegishErr::ResponseMalformed("response is not an object".to_string()))?;

    let action_raw = obj
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| AegishErr::ResponseMalformed("missing action".to_string()))?;
    let action = DecisionAction::parse(action_raw).ok_or_else(|| {
        AegishErr::ResponseMalformed(format!("unknown action: {action_raw}"))
    })?;

    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AegishErr::ResponseMalformed("missing confidence".to_string()))?;
    if !confidence.is_finite() {
        return Err(AegishErr::ResponseMalformed(
            "confidence is not finite".to_string(),
        ));
    }

    let reason_raw = obj
        .get("reason")
        .and_then(Value::as_str)
        .ok_or_else(|| AegishErr::ResponseMalformed("missing reason".to_string()))?;
    let reason = sanitize_reason(reason_raw);
    if reason.is_empty() {
        return Err(AegishErr::ResponseMalformed("empty reason".to_string()));
    }

    Ok(LlmDecision {
        action,
        reason,
        confidence: confidence.clamp(0.0, 1.0),
    })
}
