use std::sync::RwLock;

use async_trait::async_trait;
use bullbear_models::RecordId;

use crate::embedding::cosine_similarity;
use crate::error::MemoryError;

/// Nearest-neighbour lookup over stored situation vectors.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn insert(&self, id: RecordId, vector: Vec<f32>) -> Result<(), MemoryError>;

    /// Up to `k` entries ordered by similarity descending, ties broken by
    /// higher (more recent) id first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(RecordId, f32)>, MemoryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Order hits by score descending, then most recent first.
pub fn rank_hits(hits: &mut [(RecordId, f32)]) {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
}

/// Brute-force cosine index. Adequate for the few hundred records a
/// trading desk accumulates.
#[derive(Default)]
pub struct FlatIndex {
    entries: RwLock<Vec<(RecordId, Vec<f32>)>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimilarityIndex for FlatIndex {
    async fn insert(&self, id: RecordId, vector: Vec<f32>) -> Result<(), MemoryError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| MemoryError::IndexUnavailable(format!("index lock poisoned: {e}")))?;
        entries.retain(|(existing, _)| *existing != id);
        entries.push((id, vector));
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(RecordId, f32)>, MemoryError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| MemoryError::IndexUnavailable(format!("index lock poisoned: {e}")))?;
        let mut hits: Vec<(RecordId, f32)> = entries
            .iter()
            .map(|(id, stored)| (*id, cosine_similarity(vector, stored)))
            .collect();
        rank_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}
