//! HTTP embedding daemon client (Ollama-compatible `/api/embed`).
//!
//! Every request carries a timeout; the readiness probe (`GET /api/tags`) has its
//! own, shorter one. The blocking client is built on first use so that it is
//! always created on a blocking thread, never inside the async runtime.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::EmbeddingService;
use crate::config::EmbeddingConfig;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaService {
    url: String,
    model: String,
    dimensions: usize,
    request_timeout: Duration,
    probe_timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl OllamaService {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.probe_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Drop for OllamaService {
    fn drop(&mut self) {
        // The blocking client joins its worker thread on drop, which panics when
        // that happens on an async runtime thread.
        if let Some(client) = self.client.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}

impl EmbeddingService for OllamaService {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client()?
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .with_context(|| format!("embedding daemon unreachable at {}", self.url))?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "embedding daemon returned HTTP {status}");

        let parsed: EmbedResponse = response
            .json()
            .context("invalid embedding response")?;
        anyhow::ensure!(
            parsed.embeddings.len() == texts.len(),
            "embedding daemon returned {} vectors for {} inputs",
            parsed.embeddings.len(),
            texts.len()
        );
        Ok(parsed.embeddings)
    }

    fn probe(&self) -> bool {
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "probe skipped: no HTTP client");
                return false;
            }
        };
        match client
            .get(format!("{}/api/tags", self.url))
            .timeout(self.probe_timeout)
            .send()
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "embedding daemon probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> EmbeddingConfig {
        EmbeddingConfig {
            // Port 9 (discard) is closed on test machines; connect fails fast.
            url: "http://127.0.0.1:9/".into(),
            request_timeout_ms: 300,
            probe_timeout_ms: 200,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let service = OllamaService::new(&unreachable_config());
        assert_eq!(service.url, "http://127.0.0.1:9");
        assert_eq!(service.dimensions(), 768);
    }

    #[test]
    fn probe_fails_when_daemon_is_down() {
        let service = OllamaService::new(&unreachable_config());
        assert!(!service.probe());
    }

    #[test]
    fn embed_errors_when_daemon_is_down() {
        let service = OllamaService::new(&unreachable_config());
        assert!(service.embed("hello").is_err());
        assert!(service.embed_batch(&[]).unwrap().is_empty());
    }
}
