pub mod extraction;
pub mod normalize;
pub mod llm;
pub mod prompt;
pub mod parser;
pub mod schema;
pub mod consensus;
pub mod matrix;
pub mod summary;
pub mod workers;
pub mod orchestrator;

pub use orchestrator::{AlignmentPayload, AlignmentPipeline, CompetencyPayload, PipelineError, StudentPayload};
pub use workers::CancelFlag;
