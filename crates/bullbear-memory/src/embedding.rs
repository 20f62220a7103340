use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use moka::future::Cache;
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info};

use crate::error::MemoryError;

/// Turns situation text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    fn dimensions(&self) -> usize;
}

/// Local feature-hashing embedder.
///
/// Unigrams and bigrams of the lowercased text are hashed into a signed
/// bucket vector, then L2-normalized. Deterministic across processes, so
/// persisted embeddings stay comparable with fresh ones.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), 0.5);
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut vector {
                *val /= magnitude;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Sentence embeddings from a local ONNX model run by fastembed.
///
/// The model is loaded on the first `embed`, downloading into the cache
/// directory if it is not there yet. Construction only validates the name.
pub struct FastEmbedder {
    model_name: String,
    model: EmbeddingModel,
    dimensions: usize,
    cache_dir: Option<PathBuf>,
    loaded: OnceCell<Arc<Mutex<TextEmbedding>>>,
}

impl FastEmbedder {
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self, MemoryError> {
        let (model, dimensions) = Self::model_for(model_name)?;
        Ok(Self {
            model_name: model_name.to_string(),
            model,
            dimensions,
            cache_dir,
            loaded: OnceCell::new(),
        })
    }

    fn model_for(name: &str) -> Result<(EmbeddingModel, usize), MemoryError> {
        match name {
            "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
            "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
            _ => Err(MemoryError::Embedding(format!(
                "Unsupported embedding model '{name}'"
            ))),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn loaded_model(&self) -> Result<Arc<Mutex<TextEmbedding>>, MemoryError> {
        let model = self
            .loaded
            .get_or_try_init(|| async {
                info!(model = %self.model_name, cache_dir = ?self.cache_dir, "Loading embedding model");
                let mut init_options = InitOptions::default();
                init_options.model_name = self.model.clone();
                init_options.show_download_progress = false;
                if let Some(dir) = &self.cache_dir {
                    init_options.cache_dir = dir.clone();
                }

                let model = task::spawn_blocking(move || TextEmbedding::try_new(init_options))
                    .await
                    .map_err(|e| MemoryError::Embedding(format!("Model load task failed: {e}")))?
                    .map_err(|e| MemoryError::Embedding(format!("Failed to load model: {e}")))?;
                Ok::<_, MemoryError>(Arc::new(Mutex::new(model)))
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let model = self.loaded_model().await?;
        let texts = vec![text.to_string()];

        // fastembed is synchronous and needs the model mutably
        let mut embeddings = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| format!("Embedding model mutex poisoned: {e}"))?;
            guard
                .embed(texts, None)
                .map_err(|e| format!("Embedding generation failed: {e}"))
        })
        .await
        .map_err(|e| MemoryError::Embedding(format!("Embedding task failed: {e}")))?
        .map_err(MemoryError::Embedding)?;

        let vector = embeddings
            .pop()
            .ok_or_else(|| MemoryError::Embedding("No embedding returned".to_string()))?;
        if vector.len() != self.dimensions {
            return Err(MemoryError::Embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.model_name,
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Hot cache in front of another embedder, keyed by the exact text.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        if let Some(hit) = self.cache.get(text).await {
            return Ok(hit.as_ref().clone());
        }

        debug!(chars = text.len(), "Embedding cache miss");
        let vector = self.inner.embed(text).await?;
        self.cache
            .insert(text.to_string(), Arc::new(vector.clone()))
            .await;
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
