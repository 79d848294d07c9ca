pub mod batching;
pub mod client;
pub mod config;
pub mod context;
pub mod executive;
pub mod narration;
pub mod pipeline;
pub mod reduction;
pub mod services;
pub mod sinks;
pub mod sources;
pub mod speech;
pub mod testing;
pub mod tokens;
pub mod types;

pub use batching::BatchPlanner;
pub use client::{RateState, RemoteService, RetryPolicy, ThrottledClient};
pub use config::PipelineConfig;
pub use context::RunContext;
pub use executive::{parse_executive, ExecutiveSections};
pub use pipeline::{AudioOutcome, DigestPipeline, PipelineOptions, RunReport};
pub use reduction::{PromptTemplateSet, ReductionController};
pub use speech::{Announcement, SpeechSynthesizer};
pub use tokens::TokenEstimator;
pub use types::*;
