use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bullbear_models::{
    EmbedderKind, MemoryConfig, MemoryRecord, NewMemoryRecord, Outcome, RecordId, RetrievedMemory,
};
use tracing::{debug, info, warn};

use crate::embedding::{CachedEmbedder, Embedder, FastEmbedder, HashingEmbedder};
use crate::error::MemoryError;
use crate::index::{FlatIndex, SimilarityIndex};
use crate::sqlite::SqliteMemory;

/// Reflective memory: records of past runs, retrievable by situation
/// similarity once their outcome has been labeled.
///
/// Reads are concurrent. Writes (`remember`, `label`) are serialized so id
/// assignment, persistence and indexing happen in one order.
///
/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub struct MemoryStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    records: RwLock<BTreeMap<RecordId, MemoryRecord>>,
    sqlite: Option<Mutex<SqliteMemory>>,
    next_id: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

impl MemoryStore {
    /// An in-process store with nothing persisted.
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn SimilarityIndex>) -> Self {
        Self {
            embedder,
            index,
            records: RwLock::new(BTreeMap::new()),
            sqlite: None,
            next_id: AtomicU64::new(1),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A store backed by SQLite. Existing rows are loaded and labeled ones
    /// are indexed again.
    pub async fn with_sqlite(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        sqlite: SqliteMemory,
    ) -> Result<Self, MemoryError> {
        let loaded = sqlite.load_all()?;
        let next_id = sqlite.max_id()?.map(|id| id + 1).unwrap_or(1);

        let mut records = BTreeMap::new();
        let mut labeled = 0usize;
        let mut foreign = 0usize;
        for record in loaded {
            if record.situation_embedding.len() != embedder.dimensions() {
                foreign += 1;
            }
            if record.is_labeled() {
                index
                    .insert(record.id, record.situation_embedding.clone())
                    .await?;
                labeled += 1;
            }
            records.insert(record.id, record);
        }
        if foreign > 0 {
            warn!(
                records = foreign,
                dimensions = embedder.dimensions(),
                "Records embedded by a different embedder never match new situations"
            );
        }
        info!(
            records = records.len(),
            labeled,
            next_id,
            "Loaded memory store"
        );

        Ok(Self {
            embedder,
            index,
            records: RwLock::new(records),
            sqlite: Some(Mutex::new(sqlite)),
            next_id: AtomicU64::new(next_id),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The configured embedder behind a moka cache, flat index, and SQLite
    /// when `sqlite_path` is set.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let inner: Arc<dyn Embedder> = match config.embedder {
            EmbedderKind::Fastembed => Arc::new(FastEmbedder::new(
                &config.embedding_model,
                config.embedding_model_cache_dir.as_ref().map(PathBuf::from),
            )?),
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimensions)),
        };
        info!(
            embedder = ?config.embedder,
            dimensions = inner.dimensions(),
            "Memory embedder selected"
        );
        let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
            inner,
            config.embedding_cache_capacity,
            Duration::from_secs(config.embedding_cache_ttl_seconds),
        ));
        let index: Arc<dyn SimilarityIndex> = Arc::new(FlatIndex::new());

        match &config.sqlite_path {
            Some(path) => Self::with_sqlite(embedder, index, SqliteMemory::open(path)?).await,
            None => Ok(Self::new(embedder, index)),
        }
    }

    /// Store an unlabeled record and return its id. Unlabeled records are
    /// not retrievable until `label` succeeds.
    pub async fn remember(&self, new_record: NewMemoryRecord) -> Result<RecordId, MemoryError> {
        let embedding = self.embedder.embed(&new_record.situation).await?;

        let _guard = self.write_lock.lock().await;
        let id = self.next_id.load(Ordering::SeqCst);
        let record = MemoryRecord::new(id, new_record, embedding);

        if let Some(sqlite) = &self.sqlite {
            let sqlite = sqlite
                .lock()
                .map_err(|e| MemoryError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            sqlite.insert(&record)?;
        }

        self.write_records()?.insert(id, record);
        self.next_id.store(id + 1, Ordering::SeqCst);
        debug!(record_id = id, "Remembered run");
        Ok(id)
    }

    /// Up to `k` labeled records most similar to `situation`, most similar
    /// first, ties broken by recency.
    pub async fn retrieve(
        &self,
        situation: &str,
        k: usize,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(situation).await?;
        self.retrieve_by_vector(&embedding, k).await
    }

    pub async fn retrieve_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedMemory>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self.index.query(embedding, k).await?;
        let records = self.read_records()?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, similarity)| {
                records
                    .get(&id)
                    .and_then(|record| RetrievedMemory::from_record(record, similarity))
            })
            .collect())
    }

    /// The most recent record, provided it has not been labeled yet.
    pub fn pending_reflection(&self) -> Result<MemoryRecord, MemoryError> {
        let records = self.read_records()?;
        match records.values().next_back() {
            Some(record) if !record.is_labeled() => Ok(record.clone()),
            _ => Err(MemoryError::NothingToReflect),
        }
    }

    /// One-way transition of a record to labeled. The record then becomes
    /// retrievable.
    pub async fn label(&self, id: RecordId, outcome: Outcome) -> Result<(), MemoryError> {
        let _guard = self.write_lock.lock().await;

        let embedding = {
            let records = self.read_records()?;
            let record = records.get(&id).ok_or(MemoryError::UnknownRecord(id))?;
            if record.is_labeled() {
                return Err(MemoryError::AlreadyLabeled(id));
            }
            record.situation_embedding.clone()
        };

        if let Some(sqlite) = &self.sqlite {
            let sqlite = sqlite
                .lock()
                .map_err(|e| MemoryError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            sqlite.label(id, &outcome)?;
        }

        {
            let mut records = self.write_records()?;
            let record = records.get_mut(&id).ok_or(MemoryError::UnknownRecord(id))?;
            record.label(outcome)?;
        }

        // The label is durable at this point; an index failure only delays
        // retrievability until the next load.
        if let Err(e) = self.index.insert(id, embedding).await {
            warn!(record_id = id, error = %e, "Labeled record could not be indexed");
        }
        info!(record_id = id, "Labeled memory record");
        Ok(())
    }

    pub fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>, MemoryError> {
        Ok(self.read_records()?.get(&id).cloned())
    }

    /// All records in id order.
    pub fn records(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.read_records()?.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent(&self) -> bool {
        self.sqlite.is_some()
    }

    fn read_records(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<RecordId, MemoryRecord>>, MemoryError>
    {
        self.records
            .read()
            .map_err(|e| MemoryError::Unavailable(format!("records lock poisoned: {e}")))
    }

    fn write_records(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<RecordId, MemoryRecord>>, MemoryError>
    {
        self.records
            .write()
            .map_err(|e| MemoryError::Unavailable(format!("records lock poisoned: {e}")))
    }
}
