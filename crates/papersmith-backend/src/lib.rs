//! Embedding and generation providers behind the `Embedder` / `Generator`
//! traits, plus the factory that builds them from configuration.
pub mod cache;
pub mod fake;
pub mod hosted;
pub mod kind;
pub mod local;
pub mod retry;

use std::sync::Arc;

use papersmith_core::config::BackendSettings;
use papersmith_core::error::{Error, Result};
use papersmith_core::traits::{Embedder, Generator};
use tracing::info;

pub use cache::CachingEmbedder;
pub use fake::FakeEmbedder;
pub use kind::{BackendKind, Role};
pub use retry::RetryPolicy;

use hosted::gemini::{GeminiEmbedder, GeminiGenerator};
use hosted::openai::{OpenAiEmbedder, OpenAiGenerator};
use local::device::select_device;
use local::embed::LocalEmbedder;
use local::generate::LocalGenerator;

fn parse_kind(id: &str, role: Role) -> Result<BackendKind> {
    let unknown = || Error::UnknownBackend { id: id.to_string(), role: role.as_str() };
    let kind: BackendKind = id.parse().map_err(|_| unknown())?;
    if kind.supports(role) {
        Ok(kind)
    } else {
        Err(unknown())
    }
}

/// Build the embedder named by `settings.embedding`. Never falls back to
/// another backend.
pub fn create_embedder(settings: &BackendSettings) -> Result<Arc<dyn Embedder>> {
    let kind = parse_kind(&settings.embedding, Role::Embedding)?;
    info!(backend = %kind, "creating embedder");
    let embedder: Arc<dyn Embedder> = match kind {
        BackendKind::Gemini => Arc::new(GeminiEmbedder::new(settings)?),
        BackendKind::OpenAi => Arc::new(OpenAiEmbedder::new(settings)?),
        BackendKind::LocalCpu | BackendKind::LocalAccelerated => {
            let device = select_device(kind)?;
            Arc::new(LocalEmbedder::load(kind, &settings.local, device)?)
        }
        BackendKind::Fake => Arc::new(FakeEmbedder::default()),
    };
    Ok(embedder)
}

/// Build the generator named by `settings.generation`.
pub fn create_generator(settings: &BackendSettings) -> Result<Arc<dyn Generator>> {
    let kind = parse_kind(&settings.generation, Role::Generation)?;
    info!(backend = %kind, "creating generator");
    let generator: Arc<dyn Generator> = match kind {
        BackendKind::Gemini => Arc::new(GeminiGenerator::new(settings)?),
        BackendKind::OpenAi => Arc::new(OpenAiGenerator::new(settings)?),
        BackendKind::LocalCpu | BackendKind::LocalAccelerated => {
            let device = select_device(kind)?;
            Arc::new(LocalGenerator::load(kind, &settings.local, settings.temperature, device)?)
        }
        BackendKind::Fake => return Err(Error::UnknownBackend { id: settings.generation.clone(), role: "generation" }),
    };
    Ok(generator)
}

/// `APP_USE_FAKE_EMBEDDINGS=1|true` swaps in the hashing embedder.
pub fn fake_embeddings_requested() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
