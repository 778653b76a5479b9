#![allow(clippy::missing_docs_in_private_items)]

pub mod search;
pub mod secondary_index;
pub mod vector_index;

pub use search::{AskResult, RelevantSource, SearchClient, INFO_NOT_FOUND};
pub use secondary_index::VectorIndexSecondaryIndex;
pub use vector_index::{normalize_index_name, rescale_cosine, InMemoryVectorIndex, SurrealVectorIndex, VectorIndex, DEFAULT_INDEX};
