mod retry;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

use vaio_core::VaioConfig;

pub use retry::{ResilientClient, RetryPolicy, Sleeper};

/// A single request/response round trip to a generative backend.
pub trait Generate: Send + Sync {
    fn call(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    OpenAi,
    Anthropic,
    Gemini,
    Deepseek,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Deepseek => "deepseek",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "ollama" => Some(LlmProvider::Ollama),
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" => Some(LlmProvider::Gemini),
            "deepseek" => Some(LlmProvider::Deepseek),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    runtime: Arc<Runtime>,
    provider: LlmProvider,
    model: String,
    temperature: f32,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    Ollama(OllamaConfig),
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Gemini(GeminiConfig),
    Deepseek(DeepseekConfig),
    Local,
}

#[derive(Clone)]
struct OllamaConfig {
    host: String,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

#[derive(Clone)]
struct GeminiConfig {
    api_key: String,
}

#[derive(Clone)]
struct DeepseekConfig {
    api_key: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>, temperature: f32) -> Result<Self> {
        Self::with_ollama_host(provider, model, temperature, "http://localhost:11434")
    }

    pub fn from_config(cfg: &VaioConfig) -> Result<Self> {
        let provider = LlmProvider::from_str(&cfg.provider)
            .ok_or_else(|| anyhow!(format!("unknown provider {}", cfg.provider)))?;
        Self::with_ollama_host(provider, cfg.model.clone(), cfg.temperature, &cfg.ollama_host)
    }

    fn with_ollama_host(
        provider: LlmProvider,
        model: impl Into<String>,
        temperature: f32,
        ollama_host: &str,
    ) -> Result<Self> {
        let model = model.into();
        let http = Client::new();
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("vaio-llm")
            .enable_all()
            .build()
            .context("failed to create tokio runtime")?;
        let config = match provider {
            LlmProvider::Ollama => ProviderConfig::Ollama(OllamaConfig {
                host: ollama_host.trim_end_matches('/').to_string(),
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2048),
            }),
            LlmProvider::Gemini => ProviderConfig::Gemini(GeminiConfig {
                api_key: read_api_key("GEMINI_API_KEY")?,
            }),
            LlmProvider::Deepseek => ProviderConfig::Deepseek(DeepseekConfig {
                api_key: read_api_key("DEEPSEEK_API_KEY")?,
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            runtime: Arc::new(runtime),
            provider,
            model,
            temperature,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: &LlmRequest) -> Result<String> {
        match &self.config {
            ProviderConfig::Ollama(cfg) => self.chat_ollama(cfg, req).await,
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Gemini(cfg) => self.chat_gemini(cfg, req).await,
            ProviderConfig::Deepseek(cfg) => self.chat_deepseek(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    /// Blocks the calling thread on the client's shared runtime.
    pub fn complete(&self, req: &LlmRequest) -> Result<String> {
        self.runtime.block_on(self.chat(req))
    }

    async fn chat_ollama(&self, cfg: &OllamaConfig, req: &LlmRequest) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": chat_messages(req),
            "options": { "temperature": self.temperature },
            "stream": false,
        });
        let response = self
            .http
            .post(format!("{}/api/chat", cfg.host))
            .json(&payload)
            .send()
            .await
            .with_context(|| "ollama request failed")?
            .error_for_status()
            .context("ollama returned an error")?
            .json::<OllamaResponse>()
            .await
            .context("failed to decode ollama response")?;
        let content = response
            .message
            .map(|m| m.content)
            .ok_or_else(|| anyhow!("missing message in Ollama response"))?;
        Ok(content.trim().to_string())
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<String> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": chat_messages(req),
            "temperature": self.temperature,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| "openai request failed")?;
        let value = decode_openai_body(response).await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
        Ok(content)
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<String> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "temperature": self.temperature,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .with_context(|| "anthropic request failed")?
            .error_for_status()
            .context("anthropic returned an error")?
            .json::<AnthropicResponse>()
            .await
            .context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        Ok(text)
    }

    async fn chat_gemini(&self, cfg: &GeminiConfig, req: &LlmRequest) -> Result<String> {
        let mut prompt = String::new();
        if let Some(system) = &req.system {
            prompt.push_str("[SYSTEM]\n");
            prompt.push_str(system.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&req.user);
        let payload = json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ],
            "generationConfig": { "temperature": self.temperature },
        });
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, cfg.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .with_context(|| "gemini request failed")?
            .error_for_status()
            .context("gemini returned an error")?
            .json::<GeminiResponse>()
            .await
            .context("failed to decode gemini response")?;
        let text = response
            .candidates
            .and_then(|mut c| c.pop())
            .and_then(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .find_map(|part| part.text)
            })
            .ok_or_else(|| anyhow!("missing text in Gemini response"))?;
        Ok(text)
    }

    async fn chat_deepseek(&self, cfg: &DeepseekConfig, req: &LlmRequest) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": chat_messages(req),
            "temperature": self.temperature,
        });
        let response = self
            .http
            .post("https://api.deepseek.com/v1/chat/completions")
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| "deepseek request failed")?
            .error_for_status()
            .context("deepseek returned an error")?
            .json::<ChatResponse>()
            .await
            .context("failed to decode deepseek response")?;
        let text = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("missing text in DeepSeek response"))?;
        Ok(text)
    }

    fn chat_local(&self, req: &LlmRequest) -> String {
        summarize_text(&req.user, 40)
    }
}

impl Generate for LlmClient {
    fn call(&self, system: &str, user: &str) -> Result<String> {
        let response = self.complete(&LlmRequest {
            system: if system.trim().is_empty() {
                None
            } else {
                Some(system.to_string())
            },
            user: user.to_string(),
        })?;
        Ok(response.trim().to_string())
    }
}

fn chat_messages(req: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": req.user }));
    messages
}

async fn decode_openai_body(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(format!(
            "openai returned error (status {}): {}",
            status, body
        )));
    }
    serde_json::from_str(&body).context("failed to decode openai response")
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .flat_map(str::split_whitespace)
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!(format!("{var} is not set")))?;
    if value.trim().is_empty() {
        return Err(anyhow!(format!("{var} is empty")));
    }
    Ok(value)
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_round_trip() {
        for provider in [
            LlmProvider::Ollama,
            LlmProvider::OpenAi,
            LlmProvider::Anthropic,
            LlmProvider::Gemini,
            LlmProvider::Deepseek,
            LlmProvider::Local,
        ] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str("OLLAMA"), Some(LlmProvider::Ollama));
        assert!(LlmProvider::from_str("mystery").is_none());
    }

    #[test]
    fn local_provider_answers_without_network() {
        let client = LlmClient::new(LlmProvider::Local, "local", 0.0).unwrap();
        let out = client.call("system", "first line\n\n second   line").unwrap();
        assert_eq!(out, "first line second line");
    }

    #[test]
    fn clones_share_one_runtime_across_threads() {
        let client = LlmClient::new(LlmProvider::Local, "local", 0.0).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let worker = client.clone();
                std::thread::spawn(move || worker.call("", &format!("worker {i}")).unwrap())
            })
            .collect();
        let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outputs, vec!["worker 0", "worker 1", "worker 2", "worker 3"]);
        assert_eq!(Arc::strong_count(&client.runtime), 1);
    }

    #[test]
    fn openai_text_is_found_in_message_parts() {
        let value = json!({
            "choices": [ { "message": { "content": [ { "type": "text", "text": "hello" } ] } } ]
        });
        assert_eq!(extract_openai_text(&value).as_deref(), Some("hello"));
        let plain = json!({ "choices": [ { "message": { "content": "hi" } } ] });
        assert_eq!(extract_openai_text(&plain).as_deref(), Some("hi"));
        assert!(extract_openai_text(&json!({})).is_none());
    }
}
