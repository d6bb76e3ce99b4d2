//! Client-side sparse query encoding for hybrid search
//!
//! The index stores sparse document vectors produced at ingestion time; at
//! query time we reproduce the same BM25-style term weighting from a fitted
//! parameter file. Parameters are stored as plain JSON — code-executing
//! serialization formats are not accepted for on-disk state.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Sparse vector in index wire format: parallel term-id / weight arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Scale all weights, used for client-side hybrid weighting.
    pub fn scaled(&self, weight: f32) -> SparseVector {
        SparseVector {
            indices: self.indices.clone(),
            values: self.values.iter().map(|v| v * weight).collect(),
        }
    }
}

/// Fitted BM25 parameters produced by the ingestion pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bm25Params {
    /// term -> stable term id used by the index
    pub vocabulary: HashMap<String, u32>,
    /// term -> number of documents containing the term
    pub doc_freq: HashMap<String, u32>,
    pub n_docs: u32,
    pub avg_doc_len: f32,
    #[serde(default = "default_k1")]
    pub k1: f32,
    #[serde(default = "default_b")]
    pub b: f32,
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}

#[derive(Debug, thiserror::Error)]
pub enum SparseEncoderError {
    #[error("Failed to read BM25 params from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse BM25 params: {0}")]
    Parse(#[from] serde_json::Error),
}

/// BM25 query encoder over a prebuilt vocabulary.
///
/// Query-side BM25 weighting: idf(t) * tf / (tf + k1), with idf computed
/// from the fitted document frequencies. Terms outside the vocabulary are
/// dropped; an all-unknown query yields an empty sparse vector and the
/// search degrades to dense-only.
#[derive(Debug, Clone)]
pub struct Bm25QueryEncoder {
    params: Bm25Params,
}

impl Bm25QueryEncoder {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }

    /// Load fitted parameters from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SparseEncoderError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SparseEncoderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let params: Bm25Params = serde_json::from_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            vocabulary = params.vocabulary.len(),
            n_docs = params.n_docs,
            "Loaded BM25 query-encoder parameters"
        );
        Ok(Self::new(params))
    }

    pub fn encode(&self, query_text: &str) -> SparseVector {
        let mut term_freq: HashMap<&str, u32> = HashMap::new();
        for token in tokenize(query_text) {
            *term_freq.entry(token).or_insert(0) += 1;
        }

        let mut pairs: Vec<(u32, f32)> = Vec::new();
        for (term, tf) in term_freq {
            let Some(&term_id) = self.params.vocabulary.get(term) else {
                continue;
            };
            let df = self.params.doc_freq.get(term).copied().unwrap_or(0);
            let idf = self.idf(df);
            let tf = tf as f32;
            let weight = idf * tf / (tf + self.params.k1);
            if weight > 0.0 {
                pairs.push((term_id, weight));
            }
        }

        pairs.sort_by_key(|(id, _)| *id);
        SparseVector {
            indices: pairs.iter().map(|(id, _)| *id).collect(),
            values: pairs.iter().map(|(_, w)| *w).collect(),
        }
    }

    fn idf(&self, df: u32) -> f32 {
        let n = self.params.n_docs as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
}

/// Rule-based keyword extraction for the sparse query string.
///
/// Stop words are dropped, remaining terms scored by frequency with a boost
/// for recurring patent-claim vocabulary, and the top terms returned in
/// score order.
pub struct KeywordExtractor;

impl KeywordExtractor {
    const STOP_WORDS: &'static [&'static str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
        "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
        "during", "before", "after", "between", "under", "then", "once", "here", "there", "when",
        "where", "why", "how", "all", "each", "few", "more", "most", "other", "some", "such",
        "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "and",
        "but", "if", "or", "because", "until", "while", "this", "that", "these", "those", "what",
        "which", "who", "whom", "whose",
    ];

    const TECHNICAL_TERMS: &'static [&'static str] = &[
        "method", "system", "apparatus", "device", "process", "machine", "algorithm", "model",
        "network", "layer", "module", "component", "database", "index", "vector", "embedding",
        "retrieval", "search", "query", "document", "sensor", "signal", "display", "server",
        "neural", "learning", "training", "inference", "classification", "recognition",
    ];

    pub fn extract(text: &str, max_keywords: usize) -> Vec<String> {
        let mut freq: HashMap<String, u32> = HashMap::new();
        for token in tokenize(&text.to_lowercase()) {
            if token.len() <= 2 || Self::STOP_WORDS.contains(&token) {
                continue;
            }
            *freq.entry(token.to_string()).or_insert(0) += 1;
        }

        let mut scored: Vec<(String, u32)> = freq
            .into_iter()
            .map(|(word, count)| {
                let boost = if Self::TECHNICAL_TERMS.contains(&word.as_str()) {
                    2
                } else {
                    1
                };
                (word, count * boost)
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(max_keywords)
            .map(|(word, _)| word)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> Bm25Params {
        let mut vocabulary = HashMap::new();
        let mut doc_freq = HashMap::new();
        for (i, term) in ["augmented", "reality", "navigation", "glasses"]
            .iter()
            .enumerate()
        {
            vocabulary.insert(term.to_string(), i as u32);
            doc_freq.insert(term.to_string(), 10 + i as u32);
        }
        Bm25Params {
            vocabulary,
            doc_freq,
            n_docs: 1000,
            avg_doc_len: 120.0,
            k1: 1.2,
            b: 0.75,
        }
    }

    #[test]
    fn encode_known_terms_sorted_by_term_id() {
        let encoder = Bm25QueryEncoder::new(test_params());
        let sparse = encoder.encode("navigation with augmented reality glasses");
        assert_eq!(sparse.indices.len(), 4);
        assert!(sparse.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(sparse.values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn unknown_terms_yield_empty_vector() {
        let encoder = Bm25QueryEncoder::new(test_params());
        let sparse = encoder.encode("완전히 다른 한국어 질의");
        assert!(sparse.is_empty());
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let mut params = test_params();
        params.doc_freq.insert("augmented".to_string(), 2);
        params.doc_freq.insert("reality".to_string(), 500);
        let encoder = Bm25QueryEncoder::new(params);
        let sparse = encoder.encode("augmented reality");
        // term ids: augmented=0, reality=1
        assert!(sparse.values[0] > sparse.values[1]);
    }

    #[test]
    fn scaled_preserves_indices() {
        let encoder = Bm25QueryEncoder::new(test_params());
        let sparse = encoder.encode("glasses navigation");
        let half = sparse.scaled(0.5);
        assert_eq!(half.indices, sparse.indices);
        assert!((half.values[0] - sparse.values[0] * 0.5).abs() < 1e-6);
    }

    #[test]
    fn keyword_extractor_filters_stop_words_and_boosts_technical_terms() {
        let keywords = KeywordExtractor::extract(
            "A method and system for the navigation of smart glasses using a display",
            5,
        );
        assert!(keywords.contains(&"method".to_string()));
        assert!(keywords.contains(&"system".to_string()));
        assert!(!keywords.iter().any(|k| k == "the" || k == "for"));
        // boosted technical terms outrank one-off plain words
        let method_pos = keywords.iter().position(|k| k == "method").unwrap();
        let glasses_pos = keywords
            .iter()
            .position(|k| k == "glasses")
            .unwrap_or(usize::MAX);
        assert!(method_pos < glasses_pos);
    }
}
