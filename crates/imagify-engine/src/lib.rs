//! Imagify generation core: collage compositing, provider fallback, image
//! edits, prompt helpers, and credit/artifact bookkeeping.

pub mod collage;
pub mod config;
pub mod engine;
pub mod error;
pub mod providers;
pub mod transform;

pub use config::{ClipDropConfig, GeminiConfig, GeneratorConfig, ProviderConfig, ProviderStatus};
pub use engine::{GenerateReply, GenerationEngine, GenerationOutcome, GenerationRequest, COLLAGE_LABEL};
pub use error::GenerateError;
pub use providers::{
    ClipDropProvider, GeminiProvider, GenerationResult, ImageEditor, ImageProvider, PromptAssistant,
    ProviderChain, ProviderError,
};
pub use transform::{ImageEdit, Transforms};
