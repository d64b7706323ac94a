// Model-response extraction and application
pub mod morph;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod reconcile;

pub use morph::{MorphClient, PatchMerger};
pub use orchestrator::{ApplyOrchestrator, ApplyResult};
pub use parser::{parse_response, ParseError};
