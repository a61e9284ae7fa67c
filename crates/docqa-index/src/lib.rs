//! Vector index repository for the document QA system.
//!
//! Stores `(id, file_id, position, text, vector, metadata)` rows, serves
//! filtered top-K similarity search over a brute-force flat index, and
//! optionally persists to a binary index file with a JSON metadata sidecar.

pub mod cache;
mod persist;
pub mod repository;
mod store;
pub mod types;

pub use repository::{VectorRepository, VectorRepositoryConfig};
pub use types::{
    cosine_similarity, dot_product, euclidean_distance, normalize, Distance, SearchFilter,
    SearchResult, Vector, VectorDocument,
};
