use imagify_contracts::store::StoreError;
use thiserror::Error;

use crate::collage::CollageError;
use crate::providers::{ProviderError, ProviderFailure};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no authenticated owner")]
    Unauthenticated,
    #[error("a prompt or at least one source image is required")]
    MissingInput,
    #[error("source image could not be decoded: {0}")]
    InvalidSourceImage(#[from] imagify_contracts::data_uri::DataUriError),
    #[error("no credits left (balance {balance})")]
    InsufficientCredits { balance: i64 },
    #[error("collage compositing failed: {0}")]
    CollageFailed(#[from] CollageError),
    #[error("all image providers failed: {}", summarize_failures(.failures))]
    AllProvidersExhausted { failures: Vec<ProviderFailure> },
    #[error("source image format is not recognised")]
    UnsupportedImage,
    #[error("no provider configured for {0}")]
    TransformUnavailable(&'static str),
    #[error("{operation} failed: {source}")]
    TransformFailed {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
    #[error("artifact '{0}' not found for this owner")]
    ArtifactNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerateError {
    /// Caller-facing text. Provider bodies and store internals stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            GenerateError::Unauthenticated => "Unauthorized".to_string(),
            GenerateError::MissingInput => "Missing details: enter a prompt or add images".to_string(),
            GenerateError::InvalidSourceImage(_) => "One of the uploaded images is not valid".to_string(),
            GenerateError::InsufficientCredits { .. } => "No credits left".to_string(),
            GenerateError::CollageFailed(_) => "Failed to create collage from the uploaded images".to_string(),
            GenerateError::AllProvidersExhausted { .. } => {
                "Image generation failed: both providers failed".to_string()
            }
            GenerateError::UnsupportedImage => "Unsupported image format".to_string(),
            GenerateError::TransformUnavailable(_) => "This feature is not available right now".to_string(),
            GenerateError::TransformFailed { operation, .. } => format!("Failed to {}", describe(operation)),
            GenerateError::ArtifactNotFound(_) => "Image not found or unauthorized".to_string(),
            GenerateError::Store(_) => "Internal storage error".to_string(),
        }
    }
}

fn describe(operation: &str) -> &str {
    match operation {
        "remove-background" => "remove background",
        "upscale" => "upscale image",
        "variation" => "generate variation",
        "enhance-prompt" => "enhance prompt",
        "image-to-prompt" => "analyze image",
        other => other,
    }
}

fn summarize_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no provider configured".to_string();
    }
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.provider, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::GenerateError;
    use crate::providers::{ProviderError, ProviderFailure};

    #[test]
    fn exhausted_display_lists_failures_but_user_message_does_not() {
        let err = GenerateError::AllProvidersExhausted {
            failures: vec![
                ProviderFailure {
                    provider: "clipdrop".to_string(),
                    error: ProviderError::NotPng,
                },
                ProviderFailure {
                    provider: "gemini".to_string(),
                    error: ProviderError::Status {
                        code: 500,
                        body: "secret upstream detail".to_string(),
                    },
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("clipdrop: provider payload is not a PNG image"));
        assert!(rendered.contains("secret upstream detail"));
        assert!(!err.user_message().contains("secret"));
    }

    #[test]
    fn exhausted_without_providers_says_so() {
        let err = GenerateError::AllProvidersExhausted { failures: Vec::new() };
        assert!(err.to_string().contains("no provider configured"));
    }

    #[test]
    fn transform_failure_hides_provider_detail() {
        let err = GenerateError::TransformFailed {
            operation: "remove-background",
            source: ProviderError::Status {
                code: 403,
                body: "bad key abc123".to_string(),
            },
        };
        assert!(err.to_string().contains("bad key abc123"));
        assert_eq!(err.user_message(), "Failed to remove background");
        assert!(std::error::Error::source(&err).is_some());
    }
}
