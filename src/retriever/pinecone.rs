//! Pinecone serverless index client
//!
//! Dense and sparse sides of a hybrid query are issued as two concurrent
//! index queries and joined client-side by vector id, so every match carries
//! its true per-side scores. IPC filtering is prefix-based and therefore
//! also applied client-side.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ipc_allowed, HybridQuery, IndexError, IndexMatch, PatentIndex, SparseVector};
use crate::model::config::IndexConfig;

const USER_AGENT: &str = concat!("patent-intel/", env!("CARGO_PKG_VERSION"));

/// How many extra matches to request per side to survive the join and any
/// client-side IPC filtering.
const FILTER_OVERFETCH: usize = 5;

pub struct PineconeIndex {
    client: reqwest::Client,
    query_url: String,
    namespace: String,
    api_key: String,
    dim: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    patent_id: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
    #[serde(default)]
    claims: Option<String>,
    #[serde(default)]
    ipc_code: String,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig, dim: usize) -> Result<Self, IndexError> {
        let host = url::Url::parse(&config.host)
            .map_err(|e| IndexError::Parse(format!("invalid index host {:?}: {e}", config.host)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let query_url = format!("{}/query", host.as_str().trim_end_matches('/'));

        tracing::info!(
            index = %config.name,
            namespace = %config.namespace,
            "Pinecone index client initialized"
        );

        Ok(Self {
            client,
            query_url,
            namespace: config.namespace.clone(),
            api_key: config.api_key.clone(),
            dim,
        })
    }

    async fn query(&self, body: serde_json::Value) -> Result<Vec<RawMatch>, IndexError> {
        let response = self
            .client
            .post(&self.query_url)
            .header("Api-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IndexError::RateLimited);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IndexError::Unauthorized);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::UnknownNamespace(self.namespace.clone()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IndexError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Parse(e.to_string()))?;
        Ok(parsed.matches)
    }

    fn base_body(&self, top_k: usize) -> serde_json::Value {
        json!({
            "topK": top_k,
            "includeMetadata": true,
            "namespace": self.namespace,
        })
    }
}

#[async_trait]
impl PatentIndex for PineconeIndex {
    async fn hybrid_query(&self, query: &HybridQuery) -> Result<Vec<IndexMatch>, IndexError> {
        if query.dense.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                got: query.dense.len(),
            });
        }

        let fetch_k = if query.ipc_filters.is_empty() {
            query.top_k * 2
        } else {
            query.top_k * FILTER_OVERFETCH
        };

        let mut dense_body = self.base_body(fetch_k);
        dense_body["vector"] = json!(query.dense);

        // A query whose terms are all outside the fitted vocabulary has an
        // empty sparse side; degrade to dense-only instead of sending an
        // empty sparse vector the index would reject.
        let (dense_matches, sparse_matches) = if query.sparse.is_empty() {
            (self.query(dense_body).await?, Vec::new())
        } else {
            let mut sparse_body = self.base_body(fetch_k);
            // The sparse side still needs a dense vector per the API shape;
            // a zero vector makes the dense contribution vanish.
            sparse_body["vector"] = json!(vec![0.0f32; self.dim]);
            sparse_body["sparseVector"] = json!({
                "indices": query.sparse.indices,
                "values": query.sparse.values,
            });
            let (dense, sparse) =
                tokio::join!(self.query(dense_body), self.query(sparse_body));
            (dense?, sparse?)
        };

        let mut merged = merge_hybrid_sides(dense_matches, sparse_matches);
        merged.retain(|m| ipc_allowed(&m.ipc_code, &query.ipc_filters));
        merged.truncate(query.top_k);

        tracing::debug!(
            matches = merged.len(),
            ipc_filters = ?query.ipc_filters,
            "Hybrid index query complete"
        );
        Ok(merged)
    }

    async fn fetch_by_ids(
        &self,
        publication_numbers: &[String],
    ) -> Result<Vec<IndexMatch>, IndexError> {
        if publication_numbers.is_empty() {
            return Ok(Vec::new());
        }

        tracing::debug!(ids = ?publication_numbers, "Fetching patents by id");

        // patent_id is a metadata field, not the vector id, so this is a
        // metadata-filtered query with a zero vector.
        let mut body = self.base_body(20);
        body["vector"] = json!(vec![0.0f32; self.dim]);
        body["filter"] = json!({ "patent_id": { "$in": publication_numbers } });

        let matches = self.query(body).await?;

        // One patent spans several chunks; keep the first chunk per patent.
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for m in matches {
            if m.metadata.patent_id.is_empty()
                || seen.contains(&m.metadata.patent_id)
                || !publication_numbers.contains(&m.metadata.patent_id)
            {
                continue;
            }
            seen.insert(m.metadata.patent_id.clone());
            results.push(IndexMatch {
                chunk_id: m.id,
                publication_number: m.metadata.patent_id,
                title: m.metadata.title,
                abstract_text: m.metadata.abstract_text,
                claims: m.metadata.claims,
                ipc_code: m.metadata.ipc_code,
                dense_score: 1.0,
                sparse_score: 0.0,
            });
        }
        Ok(results)
    }
}

/// Join dense-side and sparse-side results by vector id, keeping the score
/// each side produced. Output is ordered by best available evidence: dense
/// order first, then sparse-only matches.
fn merge_hybrid_sides(dense: Vec<RawMatch>, sparse: Vec<RawMatch>) -> Vec<IndexMatch> {
    let mut by_id: HashMap<String, IndexMatch> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for m in dense {
        order.push(m.id.clone());
        by_id.insert(
            m.id.clone(),
            IndexMatch {
                chunk_id: m.id,
                publication_number: m.metadata.patent_id,
                title: m.metadata.title,
                abstract_text: m.metadata.abstract_text,
                claims: m.metadata.claims,
                ipc_code: m.metadata.ipc_code,
                dense_score: m.score,
                sparse_score: 0.0,
            },
        );
    }

    for m in sparse {
        if let Some(existing) = by_id.get_mut(&m.id) {
            existing.sparse_score = m.score;
        } else {
            order.push(m.id.clone());
            by_id.insert(
                m.id.clone(),
                IndexMatch {
                    chunk_id: m.id,
                    publication_number: m.metadata.patent_id,
                    title: m.metadata.title,
                    abstract_text: m.metadata.abstract_text,
                    claims: m.metadata.claims,
                    ipc_code: m.metadata.ipc_code,
                    dense_score: 0.0,
                    sparse_score: m.score,
                },
            );
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}
