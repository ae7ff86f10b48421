use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use vaio_core::VaioConfig;

/// A text-to-vector capability, chosen once per process.
pub trait Embedder: Send + Sync {
    /// Stable identifier stored with every collection built by this embedder.
    fn id(&self) -> String;

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut output = self.embed_batch(&[text.to_string()])?;
        output
            .pop()
            .ok_or_else(|| anyhow!("embedding backend returned no vector"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Offline bag-of-words embedder: tokens land in hashed buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = self.bucket_for(token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.config.dimensions.max(1)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Ollama(OllamaEmbeddingClient),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn from_config(cfg: &VaioConfig) -> Result<Self> {
        let backend = match cfg.embed_provider.as_str() {
            "hash" => {
                let dims = cfg
                    .embed_model
                    .as_deref()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(HashEmbedderConfig::default().dimensions);
                EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                    dimensions: dims,
                    ..HashEmbedderConfig::default()
                }))
            }
            "ollama" => EmbeddingBackend::Ollama(OllamaEmbeddingClient::new(
                &cfg.ollama_host,
                cfg.embed_model.as_deref().unwrap_or("nomic-embed-text"),
                cfg.embed_timeout,
            )?),
            "openai" => EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                cfg.embed_model.as_deref().unwrap_or("text-embedding-3-small"),
                cfg.embed_timeout,
            )?),
            other => return Err(anyhow!("unknown embedding provider {other}")),
        };
        Ok(Self { backend })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }
}

impl Embedder for EmbeddingClient {
    fn id(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => format!("hash:{}", embedder.config.dimensions),
            EmbeddingBackend::Ollama(client) => format!("ollama:{}", client.model),
            EmbeddingBackend::OpenAi(client) => format!("openai:{}", client.model),
        }
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = match &self.backend {
            EmbeddingBackend::Hash(embedder) => inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect(),
            EmbeddingBackend::Ollama(client) => client.embed_batch(inputs)?,
            EmbeddingBackend::OpenAi(client) => client.embed_batch(inputs)?,
        };
        if vectors.len() != inputs.len() {
            return Err(anyhow!(
                "embedding backend returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            ));
        }
        debug!(count = inputs.len(), provider = %self.id(), "embedded batch");
        Ok(vectors)
    }
}

#[derive(Clone)]
pub struct OllamaEmbeddingClient {
    http: Client,
    host: String,
    model: String,
}

impl OllamaEmbeddingClient {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            http,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(format!("{}/api/embed", self.host))
            .json(&payload)
            .send()
            .context("ollama embeddings request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "ollama embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OllamaEmbeddingResponse = response.json()?;
        Ok(parsed.embeddings)
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, timeout: Duration) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;
        Ok(Self {
            http,
            model: model.to_string(),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = "https://api.openai.com/v1/embeddings";
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .context("openai embeddings request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "openai embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response.json()?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embeddings_are_normalized_and_stable() {
        let client = EmbeddingClient::hash();
        let a = client.embed("Brand voice, brand story").unwrap();
        let b = client.embed("brand story brand voice").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(client.id(), "hash:64");
    }

    #[test]
    fn empty_text_yields_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut cfg = VaioConfig::from_lookup(|_| None).unwrap();
        cfg.embed_provider = "mystery".into();
        assert!(EmbeddingClient::from_config(&cfg).is_err());
    }
}
