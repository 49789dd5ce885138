//! Image provider clients, the ordered fallback chain that drives them, and
//! the edit and prompt-assistant seams used by the transform operations.

mod clipdrop;
mod gemini;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::ProviderConfig;

pub use clipdrop::ClipDropProvider;
pub use gemini::GeminiProvider;

/// First four bytes of every PNG file.
pub const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

/// Provider output after boundary decoding. Raw provider payloads never
/// travel past the client that received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider credential not configured")]
    NotConfigured,
    #[error("provider request timed out")]
    Timeout,
    #[error("provider transport failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("provider payload is not a PNG image")]
    NotPng,
    #[error("provider payload is not a recognised image format")]
    NotAnImage,
    #[error("provider response invalid: {0}")]
    InvalidResponse(String),
    #[error("provider image base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl ProviderError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err)
        }
    }
}

pub trait ImageProvider: Send + Sync {
    /// Stable identifier, used in logs.
    fn name(&self) -> &str;
    /// Label reported to callers when this provider produced the image.
    fn label(&self) -> &str;
    fn generate(&self, prompt: &str) -> Result<GenerationResult, ProviderError>;
}

/// Image-to-image edits on an existing picture.
pub trait ImageEditor: Send + Sync {
    fn name(&self) -> &str;
    fn label(&self) -> &str;
    fn remove_background(&self, image: &[u8]) -> Result<GenerationResult, ProviderError>;
    fn upscale(&self, image: &[u8], width: u32, height: u32) -> Result<GenerationResult, ProviderError>;
    /// A new take on the picture with the same subject.
    fn reimagine(&self, image: &[u8]) -> Result<GenerationResult, ProviderError>;
}

/// Text answers from a multimodal model.
pub trait PromptAssistant: Send + Sync {
    fn name(&self) -> &str;
    fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError>;
    fn describe_image(&self, image: &[u8], mime_type: &str) -> Result<String, ProviderError>;
}

#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

#[derive(Debug, Clone)]
pub struct ChainSuccess {
    pub result: GenerationResult,
    pub provider: String,
    pub label: String,
}

/// Ordered provider attempts; the first success wins.
#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Box<dyn ImageProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// ClipDrop first, then Gemini. Providers without a credential are left
    /// out of the chain entirely.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let mut chain = Self::new();
        if let Some(clipdrop) = config.clipdrop.as_ref() {
            chain.push(ClipDropProvider::new(clipdrop.clone()));
        }
        if let Some(gemini) = config.gemini.as_ref() {
            chain.push(GeminiProvider::new(gemini.clone()));
        }
        chain
    }

    pub fn push<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers.push(Box::new(provider));
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn generate(&self, prompt: &str) -> Result<ChainSuccess, Vec<ProviderFailure>> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.generate(prompt) {
                Ok(result) => {
                    info!(
                        provider = provider.name(),
                        bytes = result.bytes.len(),
                        "provider produced image"
                    );
                    return Ok(ChainSuccess {
                        result,
                        provider: provider.name().to_string(),
                        label: provider.label().to_string(),
                    });
                }
                Err(error) => {
                    warn!(provider = provider.name(), %error, "provider failed; trying next");
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }
        Err(failures)
    }
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_MAGIC)
}

/// MIME type from the leading bytes, or `None` when no known format matches.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn trimmed_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
