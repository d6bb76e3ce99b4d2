//! Vector-index access layer for patent passages

mod pinecone;
pub mod sparse;

use async_trait::async_trait;

pub use pinecone::PineconeIndex;
pub use sparse::{Bm25QueryEncoder, KeywordExtractor, SparseVector};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by index")]
    RateLimited,

    #[error("Index authentication failed")]
    Unauthorized,

    #[error("Unknown index or namespace: {0}")]
    UnknownNamespace(String),

    #[error("Failed to parse index response: {0}")]
    Parse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl IndexError {
    /// Whether a retry may help. Auth, schema, and dimension errors are
    /// permanent; only transport-level failures and throttling are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::RateLimited => true,
            IndexError::Http(e) => e.is_timeout() || e.is_connect(),
            IndexError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// One passage match returned by the index, with both retrieval scores.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    /// Vector id (one patent may span several chunks).
    pub chunk_id: String,
    pub publication_number: String,
    pub title: String,
    pub abstract_text: String,
    pub claims: Option<String>,
    pub ipc_code: String,
    pub dense_score: f32,
    pub sparse_score: f32,
}

/// A hybrid query against the index: dense vector plus sparse encoding,
/// with optional IPC prefix filters applied to the results.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub top_k: usize,
    pub ipc_filters: Vec<String>,
}

/// Read-only patent index populated by the offline ingestion pipeline.
#[async_trait]
pub trait PatentIndex: Send + Sync {
    /// Run one hybrid (dense + sparse) search and return matches carrying
    /// both per-side scores. Score fusion happens in the caller.
    async fn hybrid_query(&self, query: &HybridQuery) -> Result<Vec<IndexMatch>, IndexError>;

    /// Fetch passages for explicitly named publication numbers.
    async fn fetch_by_ids(&self, publication_numbers: &[String])
        -> Result<Vec<IndexMatch>, IndexError>;
}

/// Client-side IPC prefix filter, shared by index implementations.
///
/// `filters` are prefixes such as `G06` or `H04`; an empty filter list
/// admits everything.
pub(crate) fn ipc_allowed(ipc_code: &str, filters: &[String]) -> bool {
    filters.is_empty() || filters.iter().any(|f| ipc_code.starts_with(f.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_prefix_filtering() {
        let filters = vec!["G06".to_string(), "H04".to_string()];
        assert!(ipc_allowed("G06Q 50/10", &filters));
        assert!(ipc_allowed("H04W 4/02", &filters));
        assert!(!ipc_allowed("A61B 5/00", &filters));
        assert!(ipc_allowed("A61B 5/00", &[]));
    }

    #[test]
    fn transient_classification() {
        assert!(IndexError::RateLimited.is_transient());
        assert!(IndexError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!IndexError::Unauthorized.is_transient());
        assert!(!IndexError::UnknownNamespace("ns".into()).is_transient());
        assert!(!IndexError::DimensionMismatch {
            expected: 1536,
            got: 768
        }
        .is_transient());
    }
}
