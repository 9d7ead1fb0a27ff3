//! Text-to-vector embedding pipeline.
//!
//! [`EmbeddingService`] is the boundary to whatever produces real embeddings (an
//! HTTP daemon via [`ollama`], or the in-process model in [`local`]).
//! [`Embedder`] wraps an optional service with a text cache, a readiness record
//! and the [`hashing`] fallback, so that embedding never fails from the caller's
//! point of view: when the service is down or misbehaves, the caller gets a
//! lower-quality fallback vector and the event is logged and counted.

pub mod hashing;
pub mod local;
pub mod ollama;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use crate::config::{EmbeddingConfig, LegacyVectorPolicy};
use crate::error::KnowledgeError;
use crate::knowledge::codec;
use hashing::HashingEmbedder;

/// An external embedding backend.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`. Implementations bound their own waits: a call
/// must return an error rather than hang when the backend is unresponsive.
pub trait EmbeddingService: Send + Sync {
    /// Model identifier, recorded alongside the vectors it produced.
    fn name(&self) -> &str;

    /// Width of the vectors this service produces.
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Cheap readiness check with a short timeout.
    fn probe(&self) -> bool;
}

/// Create the configured embedding service.
///
/// `"none"` yields no service (fallback only). `"local"` fails if the model files
/// are missing. Run `tessera model download` first.
pub fn create_service(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingService>>> {
    match config.provider.as_str() {
        "ollama" => Ok(Some(Arc::new(ollama::OllamaService::new(config)))),
        "local" => Ok(Some(Arc::new(local::OnnxService::new(config)?))),
        "none" => Ok(None),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: ollama, local, none"),
    }
}

/// Where a vector returned by [`Embedder::embed_with_source`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Cache,
    Service,
    Fallback,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedderStats {
    pub cache_hits: u64,
    pub service_embeddings: u64,
    pub fallback_embeddings: u64,
    pub cache_entries: usize,
    pub service_ready: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    ready: bool,
    checked_at: Option<Instant>,
}

#[derive(Default)]
struct EmbedderState {
    /// Insert-once: an entry is never replaced after it is written.
    cache: HashMap<String, Arc<[f32]>>,
    readiness: Readiness,
    cache_hits: u64,
    service_embeddings: u64,
    fallback_embeddings: u64,
}

/// Embedding front-end shared by every search and indexing path.
///
/// Owned by one component and handed out as `Arc<Embedder>`; the cache and the
/// readiness record live under the same mutex. The mutex is never held across a
/// service call.
pub struct Embedder {
    service: Option<Arc<dyn EmbeddingService>>,
    fallback: HashingEmbedder,
    cache_key_chars: usize,
    reprobe_interval: Duration,
    legacy_policy: LegacyVectorPolicy,
    state: Mutex<EmbedderState>,
}

impl Embedder {
    pub fn new(
        service: Option<Arc<dyn EmbeddingService>>,
        fallback_dimensions: usize,
        cache_key_chars: usize,
        reprobe_interval: Duration,
    ) -> Self {
        Self {
            service,
            fallback: HashingEmbedder::new(fallback_dimensions),
            cache_key_chars: cache_key_chars.max(1),
            reprobe_interval,
            legacy_policy: LegacyVectorPolicy::Coexist,
            state: Mutex::new(EmbedderState::default()),
        }
    }

    pub fn with_legacy_policy(mut self, policy: LegacyVectorPolicy) -> Self {
        self.legacy_policy = policy;
        self
    }

    /// Build from config, creating the configured service.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let service = create_service(config)?;
        Ok(Self::new(
            service,
            config.fallback_dimensions,
            config.cache_key_chars,
            Duration::from_secs(config.reprobe_interval_secs),
        )
        .with_legacy_policy(config.legacy_vectors))
    }

    /// An embedder with no service: every vector comes from the hashing fallback.
    pub fn fallback_only(dimensions: usize) -> Self {
        Self::new(None, dimensions, 500, Duration::from_secs(30))
    }

    fn state(&self) -> MutexGuard<'_, EmbedderState> {
        // Cache entries are immutable, so a poisoned lock still guards consistent data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Name of the model producing current vectors.
    pub fn model_name(&self) -> &str {
        match &self.service {
            Some(s) if self.is_ready() => s.name(),
            _ => "hashing-fallback",
        }
    }

    /// Width new vectors are produced with right now: the service width when it
    /// is believed ready, otherwise the fallback width.
    pub fn current_dimensions(&self) -> usize {
        match &self.service {
            Some(s) if self.is_ready() => s.dimensions(),
            _ => self.fallback.dimensions(),
        }
    }

    /// Width the service would produce, regardless of readiness.
    pub fn service_dimensions(&self) -> Option<usize> {
        self.service.as_ref().map(|s| s.dimensions())
    }

    pub fn legacy_policy(&self) -> LegacyVectorPolicy {
        self.legacy_policy
    }

    /// Whether a stored vector of width `stored` should be replaced even though its
    /// text is unchanged.
    pub fn wants_reembed(&self, stored: usize) -> bool {
        self.legacy_policy == LegacyVectorPolicy::Reembed
            && self.is_ready()
            && self.service_dimensions().is_some_and(|dims| dims != stored)
    }

    /// Last known readiness, without probing.
    pub fn is_ready(&self) -> bool {
        self.service.is_some() && self.state().readiness.ready
    }

    /// Probe the service now and record the answer.
    pub fn refresh_readiness(&self) -> bool {
        let ready = match &self.service {
            Some(service) => service.probe(),
            None => false,
        };
        self.state().readiness = Readiness {
            ready,
            checked_at: Some(Instant::now()),
        };
        tracing::debug!(ready, "embedding service readiness refreshed");
        ready
    }

    /// Whether to try the service for this call, probing when the last answer is stale.
    fn service_available(&self) -> bool {
        if self.service.is_none() {
            return false;
        }
        let readiness = self.state().readiness;
        match readiness.checked_at {
            None => self.refresh_readiness(),
            Some(_) if readiness.ready => true,
            Some(at) if at.elapsed() >= self.reprobe_interval => self.refresh_readiness(),
            Some(_) => false,
        }
    }

    fn mark_unavailable(&self, error: &KnowledgeError) {
        let mut state = self.state();
        state.readiness = Readiness {
            ready: false,
            checked_at: Some(Instant::now()),
        };
        drop(state);
        tracing::warn!(error = %error, fallback = true, "embedding service failed, switching to hashing fallback");
    }

    /// Embed `text`, never failing.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_with_source(text).0
    }

    /// Embed `text` and report which path produced the vector.
    pub fn embed_with_source(&self, text: &str) -> (Vec<f32>, EmbeddingSource) {
        let key = cache_key(text, self.cache_key_chars);
        {
            let mut state = self.state();
            if let Some(hit) = state.cache.get(key).cloned() {
                state.cache_hits += 1;
                return (hit.to_vec(), EmbeddingSource::Cache);
            }
        }

        if let Some(vector) = self.try_service(&[text]).and_then(|mut v| v.pop()) {
            let mut state = self.state();
            state.service_embeddings += 1;
            let stored = state
                .cache
                .entry(key.to_string())
                .or_insert_with(|| Arc::from(vector));
            return (stored.to_vec(), EmbeddingSource::Service);
        }

        (self.fallback_embed(text), EmbeddingSource::Fallback)
    }

    /// Embed many texts. Cache hits are served directly, misses go to the service
    /// in one batch; if the batch fails every miss is embedded through [`Self::embed`].
    pub fn embed_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();
        {
            let mut state = self.state();
            for (i, text) in texts.iter().enumerate() {
                match state.cache.get(cache_key(text, self.cache_key_chars)).cloned() {
                    Some(hit) => {
                        state.cache_hits += 1;
                        out.push(Some(hit.to_vec()));
                    }
                    None => {
                        out.push(None);
                        misses.push(i);
                    }
                }
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();
            match self.try_service(&miss_texts) {
                Some(vectors) => {
                    let mut state = self.state();
                    state.service_embeddings += vectors.len() as u64;
                    for (&i, vector) in misses.iter().zip(vectors) {
                        let key = cache_key(texts[i], self.cache_key_chars).to_string();
                        let stored = state.cache.entry(key).or_insert_with(|| Arc::from(vector));
                        out[i] = Some(stored.to_vec());
                    }
                }
                None => {
                    for &i in &misses {
                        out[i] = Some(self.embed(texts[i]));
                    }
                }
            }
        }

        out.into_iter().map(|v| v.unwrap_or_default()).collect()
    }

    /// Call the service if it is believed available. `None` means "use the fallback";
    /// the failure has already been logged and readiness cleared.
    fn try_service(&self, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        let service = self.service.as_ref()?;
        if !self.service_available() {
            return None;
        }

        let result = if texts.len() == 1 {
            service.embed(texts[0]).map(|v| vec![v])
        } else {
            service.embed_batch(texts)
        };

        let error = match result {
            Ok(vectors) if vectors.len() != texts.len() => KnowledgeError::EmbeddingUnavailable(
                format!("service returned {} vectors for {} texts", vectors.len(), texts.len()),
            ),
            Ok(vectors) => match vectors.iter().find(|v| !codec::is_supported_dimension(v.len())) {
                Some(bad) => KnowledgeError::DimensionUnsupported { found: bad.len() },
                None => return Some(vectors),
            },
            Err(e) => KnowledgeError::EmbeddingUnavailable(format!("{e:#}")),
        };
        self.mark_unavailable(&error);
        None
    }

    fn fallback_embed(&self, text: &str) -> Vec<f32> {
        self.state().fallback_embeddings += 1;
        tracing::debug!(
            dims = self.fallback.dimensions(),
            text_len = text.len(),
            fallback = true,
            "using hashing fallback embedding"
        );
        self.fallback.embed(text)
    }

    pub fn stats(&self) -> EmbedderStats {
        let state = self.state();
        EmbedderStats {
            cache_hits: state.cache_hits,
            service_embeddings: state.service_embeddings,
            fallback_embeddings: state.fallback_embeddings,
            cache_entries: state.cache.len(),
            service_ready: self.service.is_some() && state.readiness.ready,
        }
    }
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
fn cache_key(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
