pub mod embedding;
pub mod error;
pub mod index;
pub mod sqlite;
pub mod store;

pub use embedding::{cosine_similarity, CachedEmbedder, Embedder, FastEmbedder, HashingEmbedder};
pub use error::MemoryError;
pub use index::{FlatIndex, SimilarityIndex};
pub use sqlite::SqliteMemory;
pub use store::MemoryStore;
