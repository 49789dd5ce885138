//! Explicit configuration for the provider chain and the generation engine.
//!
//! Credentials are resolved once, when the config is built. A provider whose
//! key is absent is simply not part of the chain.

use std::env;
use std::time::Duration;

use imagify_contracts::accounts::DEFAULT_STARTING_BALANCE;
use serde::Serialize;

pub const CLIPDROP_API_BASE: &str = "https://clipdrop-api.co";
pub const CLIPDROP_TIMEOUT: Duration = Duration::from_secs(30);

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
/// Model behind prompt enhancement and image-to-prompt.
pub const GEMINI_TEXT_MODEL: &str = "gemini-2.0-flash";
pub const GEMINI_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipDropConfig {
    pub api_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl ClipDropConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: CLIPDROP_API_BASE.to_string(),
            timeout: CLIPDROP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub text_model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: GEMINI_API_BASE.to_string(),
            model: GEMINI_IMAGE_MODEL.to_string(),
            text_model: GEMINI_TEXT_MODEL.to_string(),
            timeout: GEMINI_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub clipdrop: Option<ClipDropConfig>,
    pub gemini: Option<GeminiConfig>,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let clipdrop = get("CLIPDROP_API").map(|api_key| {
            let mut config = ClipDropConfig::new(api_key);
            if let Some(base) = get("CLIPDROP_API_BASE") {
                config.api_base = base.trim_end_matches('/').to_string();
            }
            config
        });

        let gemini = get("GEMINI_API_KEY")
            .or_else(|| get("GOOGLE_API_KEY"))
            .map(|api_key| {
                let mut config = GeminiConfig::new(api_key);
                if let Some(base) = get("GEMINI_API_BASE") {
                    config.api_base = base.trim_end_matches('/').to_string();
                }
                if let Some(model) = get("GEMINI_IMAGE_MODEL") {
                    config.model = model;
                }
                if let Some(model) = get("GEMINI_TEXT_MODEL") {
                    config.text_model = model;
                }
                if let Some(secs) = get("GEMINI_TIMEOUT_SECS").and_then(|raw| raw.parse::<u64>().ok()) {
                    config.timeout = Duration::from_secs(secs.clamp(5, 600));
                }
                config
            });

        Self { clipdrop, gemini }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        vec![
            ProviderStatus::new(
                "clipdrop",
                self.clipdrop.as_ref().map(|config| config.api_key.as_str()),
            ),
            ProviderStatus::new(
                "gemini",
                self.gemini.as_ref().map(|config| config.api_key.as_str()),
            ),
        ]
    }
}

/// Credential presence report; never contains the full key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: String,
    pub configured: bool,
    pub key_length: usize,
    pub key_preview: String,
}

impl ProviderStatus {
    fn new(provider: &str, api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) => Self {
                provider: provider.to_string(),
                configured: true,
                key_length: key.chars().count(),
                key_preview: format!("{}...", key.chars().take(4).collect::<String>()),
            },
            None => Self {
                provider: provider.to_string(),
                configured: false,
                key_length: 0,
                key_preview: "NOT SET".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Balance for accounts created on their first generation.
    pub starting_balance: i64,
    /// Refuse generation at zero balance. Off by default.
    pub require_credits: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            starting_balance: DEFAULT_STARTING_BALANCE,
            require_credits: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{ProviderConfig, CLIPDROP_API_BASE, GEMINI_IMAGE_MODEL, GEMINI_TEXT_MODEL};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_and_blank_keys_leave_providers_out() {
        let config = ProviderConfig::from_lookup(lookup(&[("CLIPDROP_API", "   ")]));
        assert_eq!(config, ProviderConfig::default());
    }

    #[test]
    fn keys_and_overrides_are_picked_up() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("CLIPDROP_API", "clip-key"),
            ("GOOGLE_API_KEY", "google-key"),
            ("GEMINI_API_BASE", "http://127.0.0.1:9/v1beta/"),
            ("GEMINI_TIMEOUT_SECS", "1"),
        ]));
        let clipdrop = config.clipdrop.expect("clipdrop configured");
        assert_eq!(clipdrop.api_key, "clip-key");
        assert_eq!(clipdrop.api_base, CLIPDROP_API_BASE);
        assert_eq!(clipdrop.timeout, Duration::from_secs(30));

        let gemini = config.gemini.expect("gemini configured");
        assert_eq!(gemini.api_key, "google-key");
        assert_eq!(gemini.api_base, "http://127.0.0.1:9/v1beta");
        assert_eq!(gemini.model, GEMINI_IMAGE_MODEL);
        assert_eq!(gemini.text_model, GEMINI_TEXT_MODEL);
        assert_eq!(gemini.timeout, Duration::from_secs(5));
    }

    #[test]
    fn gemini_models_can_be_overridden_separately() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gemini-key"),
            ("GEMINI_IMAGE_MODEL", "imagen-3.0-generate-002"),
            ("GEMINI_TEXT_MODEL", "gemini-1.5-pro"),
        ]));
        let gemini = config.gemini.expect("gemini configured");
        assert_eq!(gemini.model, "imagen-3.0-generate-002");
        assert_eq!(gemini.text_model, "gemini-1.5-pro");
    }

    #[test]
    fn gemini_key_wins_over_google_key() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gemini-key"),
            ("GOOGLE_API_KEY", "google-key"),
        ]));
        assert_eq!(config.gemini.map(|row| row.api_key).as_deref(), Some("gemini-key"));
    }

    #[test]
    fn status_masks_keys() {
        let config = ProviderConfig::from_lookup(lookup(&[("CLIPDROP_API", "abcdefghijkl")]));
        let status = config.status();
        assert!(status[0].configured);
        assert_eq!(status[0].key_length, 12);
        assert_eq!(status[0].key_preview, "abcd...");
        assert!(!status[1].configured);
        assert_eq!(status[1].key_preview, "NOT SET");
    }
}
