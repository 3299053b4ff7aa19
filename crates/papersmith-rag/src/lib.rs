//! Retrieval orchestration: the readiness-guarded index registry, context
//! assembly, support scoring and the corrective retrieval loop.
pub mod context;
pub mod corrective;
pub mod engine;
pub mod prompts;
pub mod registry;

pub use engine::RagEngine;
pub use registry::{IndexRegistry, RebuildGuard, StoreWriter};
