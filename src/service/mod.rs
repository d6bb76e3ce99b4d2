pub mod analysis;
pub mod cutoff;
pub mod embedding;
pub mod expansion;
pub mod grading;
pub mod history;
pub mod llm;
pub mod pipeline;
pub mod rate_limit;
pub mod rerank;
pub mod sandbox;
pub mod search;

#[cfg(test)]
pub mod testing;

pub use analysis::AnalysisService;
pub use expansion::QueryExpansionService;
pub use grading::GradingService;
pub use history::{HistorySink, NoopHistory, RedisHistory};
pub use llm::LlmClient;
pub use pipeline::{AnalysisPipeline, RunRequest};
pub use rate_limit::RateLimiter;
pub use rerank::RerankService;
pub use sandbox::InputSandbox;
pub use search::HybridSearchService;
