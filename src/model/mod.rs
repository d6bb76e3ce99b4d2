pub mod candidate;
pub mod config;
pub mod event;
pub mod grading;
pub mod query;
pub mod report;

pub use candidate::Candidate;
pub use config::Config;
pub use event::PipelineEvent;
pub use grading::{FilterStats, GradingResponse, GradingRow};
pub use query::{Query, QueryKind};
pub use report::{AnalysisReport, RiskLevel, TopPatent};
