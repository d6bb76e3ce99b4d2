//! Optional per-run history collaborator
//!
//! The pipeline itself persists nothing; completed runs are handed to a
//! `HistorySink`. Recording failures never fail a run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::model::AnalysisReport;

/// Number of recent runs kept per session.
const HISTORY_DEPTH: isize = 50;
const HISTORY_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub idea: String,
    pub report: AnalysisReport,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, entry: HistoryEntry);
}

/// Discards history; used when no store is configured.
pub struct NoopHistory;

#[async_trait]
impl HistorySink for NoopHistory {
    async fn record(&self, _entry: HistoryEntry) {}
}

/// Redis-backed history: a capped list of recent runs per session.
pub struct RedisHistory {
    client: redis::Client,
}

impl RedisHistory {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    fn key(session_id: &str) -> String {
        format!("history:{session_id}")
    }
}

#[async_trait]
impl HistorySink for RedisHistory {
    async fn record(&self, entry: HistoryEntry) {
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize history entry");
                return;
            }
        };

        let key = Self::key(&entry.session_id);
        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = redis::pipe()
                .atomic()
                .lpush(&key, payload)
                .ignore()
                .ltrim(&key, 0, HISTORY_DEPTH - 1)
                .ignore()
                .cmd("EXPIRE")
                .arg(&key)
                .arg(HISTORY_TTL_SECONDS)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, session_id = %entry.session_id, "Failed to record history");
        } else {
            tracing::debug!(session_id = %entry.session_id, "Run recorded to history");
        }
    }
}
