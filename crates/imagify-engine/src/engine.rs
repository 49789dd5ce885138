use std::sync::Arc;

use imagify_contracts::accounts::{Account, CreditPlan, RESET_BALANCE};
use imagify_contracts::artifacts::GeneratedArtifact;
use imagify_contracts::data_uri::{decode_data_uri, encode_data_uri};
use imagify_contracts::events::{
    EventWriter, ARTIFACT_DELETED, CREDITS_CHANGED, GENERATION_FAILED, GENERATION_SUCCEEDED,
};
use imagify_contracts::store::{AccountStore, DEFAULT_HISTORY_LIMIT};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::collage::{self, MAX_COLLAGE_IMAGES};
use crate::config::GeneratorConfig;
use crate::error::GenerateError;
use crate::providers::{sniff_mime_type, GenerationResult, ProviderChain};
use crate::transform::{image_dimensions, upscale_target, ImageEdit, Transforms};

pub const COLLAGE_LABEL: &str = "Collage";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Encoded images; only the first four are used.
    pub source_images: Vec<Vec<u8>>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.source_images = images;
        self
    }

    /// Accepts `data:` URIs or bare base64, as uploaded by browsers.
    pub fn from_data_uris(prompt: impl Into<String>, uris: &[String]) -> Result<Self, GenerateError> {
        let images = uris
            .iter()
            .map(|uri| decode_data_uri(uri).map(|decoded| decoded.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(prompt).with_images(images))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub image: Vec<u8>,
    pub mime_type: String,
    pub provider_label: String,
    pub new_balance: i64,
    pub artifact_id: String,
}

impl GenerationOutcome {
    pub fn data_uri(&self) -> String {
        encode_data_uri(&self.mime_type, &self.image)
    }
}

/// Structured reply for the caller layer: success and failure share one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
}

impl GenerateReply {
    pub fn from_result(result: &Result<GenerationOutcome, GenerateError>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                image: Some(outcome.data_uri()),
                message: None,
                provider_label: Some(outcome.provider_label.clone()),
                new_balance: Some(outcome.new_balance),
            },
            Err(err) => Self {
                success: false,
                image: None,
                message: Some(err.user_message()),
                provider_label: None,
                new_balance: None,
            },
        }
    }
}

#[derive(Serialize)]
struct GenerationRecord<'a> {
    operation: &'a str,
    owner_id: &'a str,
    prompt: &'a str,
    source_images: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ArtifactDeleted<'a> {
    owner_id: &'a str,
    artifact_id: &'a str,
}

#[derive(Serialize)]
struct CreditChange<'a> {
    owner_id: &'a str,
    reason: &'a str,
    balance: i64,
}

struct ProducedImage {
    bytes: Vec<u8>,
    mime_type: String,
    label: String,
}

impl ProducedImage {
    fn from_provider(result: GenerationResult, label: &str) -> Self {
        Self {
            bytes: result.bytes,
            mime_type: result.mime_type,
            label: label.to_string(),
        }
    }
}

/// Generation orchestrator: picks collage or provider generation, then
/// debits one credit and records the artifact. Image edits follow the same
/// charge-on-success rule; prompt helpers are free.
pub struct GenerationEngine {
    providers: ProviderChain,
    transforms: Transforms,
    store: Arc<dyn AccountStore>,
    events: Option<EventWriter>,
    config: GeneratorConfig,
}

impl GenerationEngine {
    pub fn new(providers: ProviderChain, store: Arc<dyn AccountStore>, config: GeneratorConfig) -> Self {
        Self {
            providers,
            transforms: Transforms::default(),
            store,
            events: None,
            config,
        }
    }

    pub fn with_transforms(mut self, transforms: Transforms) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    /// Text-to-image providers in the order they are tried.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.names()
    }

    pub fn transform_names(&self) -> Vec<String> {
        self.transforms.names()
    }

    pub fn generate(
        &self,
        request: &GenerationRequest,
        owner_id: Option<&str>,
    ) -> Result<GenerationOutcome, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        let result = self.generate_for_owner(request, owner_id);
        self.record_outcome(
            "generate",
            owner_id,
            &request.prompt,
            request.source_images.len(),
            &result,
        );
        result
    }

    fn generate_for_owner(
        &self,
        request: &GenerationRequest,
        owner_id: &str,
    ) -> Result<GenerationOutcome, GenerateError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() && request.source_images.is_empty() {
            return Err(GenerateError::MissingInput);
        }

        self.open_account(owner_id)?;
        let produced = if request.source_images.is_empty() {
            self.generate_from_prompt(prompt)?
        } else {
            self.generate_collage(&request.source_images)?
        };
        self.commit(owner_id, &request.prompt, produced)
    }

    /// Runs one ClipDrop edit on `image` and charges one credit when it
    /// returns a picture.
    pub fn edit_image(
        &self,
        edit: ImageEdit,
        image: &[u8],
        owner_id: Option<&str>,
    ) -> Result<GenerationOutcome, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        let result = self.edit_for_owner(edit, image, owner_id);
        self.record_outcome(edit.as_str(), owner_id, edit.as_str(), 1, &result);
        result
    }

    fn edit_for_owner(
        &self,
        edit: ImageEdit,
        image: &[u8],
        owner_id: &str,
    ) -> Result<GenerationOutcome, GenerateError> {
        if image.is_empty() {
            return Err(GenerateError::MissingInput);
        }
        let (width, height) = image_dimensions(image).ok_or(GenerateError::UnsupportedImage)?;

        self.open_account(owner_id)?;
        let editor = self
            .transforms
            .editor
            .as_ref()
            .ok_or(GenerateError::TransformUnavailable(edit.as_str()))?;
        let result = match edit {
            ImageEdit::RemoveBackground => editor.remove_background(image),
            ImageEdit::Upscale => {
                let (target_width, target_height) = upscale_target(width, height);
                info!(width, height, target_width, target_height, "upscaling image");
                editor.upscale(image, target_width, target_height)
            }
            ImageEdit::Variation => editor.reimagine(image),
        }
        .map_err(|source| GenerateError::TransformFailed {
            operation: edit.as_str(),
            source,
        })?;

        self.commit(
            owner_id,
            edit.as_str(),
            ProducedImage::from_provider(result, editor.label()),
        )
    }

    /// Rewrites a prompt into a richer one. Free of charge, nothing stored.
    pub fn enhance_prompt(&self, prompt: &str, owner_id: Option<&str>) -> Result<String, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerateError::MissingInput);
        }
        let assistant = self
            .transforms
            .assistant
            .as_ref()
            .ok_or(GenerateError::TransformUnavailable("enhance-prompt"))?;
        let enhanced = assistant
            .enhance_prompt(prompt)
            .map_err(|source| GenerateError::TransformFailed {
                operation: "enhance-prompt",
                source,
            })?;
        info!(owner = owner_id, provider = assistant.name(), "prompt enhanced");
        Ok(enhanced)
    }

    /// Describes an image as a prompt. Free of charge, nothing stored.
    pub fn image_to_prompt(&self, image: &[u8], owner_id: Option<&str>) -> Result<String, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        if image.is_empty() {
            return Err(GenerateError::MissingInput);
        }
        let mime_type = sniff_mime_type(image).ok_or(GenerateError::UnsupportedImage)?;
        let assistant = self
            .transforms
            .assistant
            .as_ref()
            .ok_or(GenerateError::TransformUnavailable("image-to-prompt"))?;
        let prompt = assistant
            .describe_image(image, mime_type)
            .map_err(|source| GenerateError::TransformFailed {
                operation: "image-to-prompt",
                source,
            })?;
        info!(owner = owner_id, provider = assistant.name(), mime_type, "image described");
        Ok(prompt)
    }

    /// Find-or-create, then the optional zero-balance gate.
    fn open_account(&self, owner_id: &str) -> Result<Account, GenerateError> {
        let account = self
            .store
            .find_or_create_account(owner_id, self.config.starting_balance)?;
        if self.config.require_credits && account.credit_balance <= 0 {
            return Err(GenerateError::InsufficientCredits {
                balance: account.credit_balance,
            });
        }
        Ok(account)
    }

    fn commit(
        &self,
        owner_id: &str,
        prompt: &str,
        produced: ProducedImage,
    ) -> Result<GenerationOutcome, GenerateError> {
        // Debit and insert are independent store writes; nothing rolls one
        // back if the other fails.
        let new_balance = self.store.decrement_balance(owner_id, 1)?;
        let artifact = GeneratedArtifact::new(
            owner_id,
            encode_data_uri(&produced.mime_type, &produced.bytes),
            prompt,
            produced.label.clone(),
        );
        let artifact_id = artifact.id.clone();
        self.store.insert_artifact(artifact)?;

        Ok(GenerationOutcome {
            image: produced.bytes,
            mime_type: produced.mime_type,
            provider_label: produced.label,
            new_balance,
            artifact_id,
        })
    }

    fn record_outcome(
        &self,
        operation: &str,
        owner_id: &str,
        prompt: &str,
        source_images: usize,
        result: &Result<GenerationOutcome, GenerateError>,
    ) {
        let mut record = GenerationRecord {
            operation,
            owner_id,
            prompt,
            source_images,
            provider: None,
            artifact_id: None,
            new_balance: None,
            image_sha256: None,
            error: None,
        };
        match result {
            Ok(outcome) => {
                info!(
                    operation,
                    owner = owner_id,
                    provider = %outcome.provider_label,
                    balance = outcome.new_balance,
                    "image produced"
                );
                record.provider = Some(&outcome.provider_label);
                record.artifact_id = Some(&outcome.artifact_id);
                record.new_balance = Some(outcome.new_balance);
                record.image_sha256 = Some(sha256_hex(&outcome.image));
                self.emit(GENERATION_SUCCEEDED, &record);
            }
            Err(err) => {
                error!(operation, owner = owner_id, error = %err, "image operation failed");
                record.error = Some(err.to_string());
                self.emit(GENERATION_FAILED, &record);
            }
        }
    }

    fn generate_collage(&self, images: &[Vec<u8>]) -> Result<ProducedImage, GenerateError> {
        if images.len() > MAX_COLLAGE_IMAGES {
            warn!(
                supplied = images.len(),
                used = MAX_COLLAGE_IMAGES,
                "extra collage images dropped"
            );
        }
        let bytes = collage::composite(images)?;
        Ok(ProducedImage {
            bytes,
            mime_type: "image/png".to_string(),
            label: COLLAGE_LABEL.to_string(),
        })
    }

    fn generate_from_prompt(&self, prompt: &str) -> Result<ProducedImage, GenerateError> {
        if self.providers.is_empty() {
            warn!("no image provider configured");
        }
        let success = self
            .providers
            .generate(prompt)
            .map_err(|failures| GenerateError::AllProvidersExhausted { failures })?;
        Ok(ProducedImage::from_provider(success.result, &success.label))
    }

    /// Owner's artifacts, newest first, capped at 100 by default.
    pub fn history(
        &self,
        owner_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<GeneratedArtifact>, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(DEFAULT_HISTORY_LIMIT);
        Ok(self.store.list_artifacts(owner_id, limit)?)
    }

    pub fn delete_artifact(&self, owner_id: Option<&str>, artifact_id: &str) -> Result<(), GenerateError> {
        let owner_id = require_owner(owner_id)?;
        if !self.store.delete_artifact(owner_id, artifact_id)? {
            return Err(GenerateError::ArtifactNotFound(artifact_id.to_string()));
        }
        info!(owner = owner_id, artifact = artifact_id, "artifact deleted");
        self.emit(
            ARTIFACT_DELETED,
            &ArtifactDeleted {
                owner_id,
                artifact_id,
            },
        );
        Ok(())
    }

    pub fn credits(&self, owner_id: Option<&str>) -> Result<i64, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        let account = self
            .store
            .find_or_create_account(owner_id, self.config.starting_balance)?;
        Ok(account.credit_balance)
    }

    pub fn reset_credits(&self, owner_id: Option<&str>) -> Result<i64, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        self.store
            .find_or_create_account(owner_id, self.config.starting_balance)?;
        let balance = self.store.set_balance(owner_id, RESET_BALANCE)?;
        self.record_credit_change(owner_id, "reset", balance);
        Ok(balance)
    }

    /// Adds the plan's credits. Payment itself is not verified here.
    pub fn purchase(&self, owner_id: Option<&str>, plan: CreditPlan) -> Result<i64, GenerateError> {
        let owner_id = require_owner(owner_id)?;
        self.store
            .find_or_create_account(owner_id, self.config.starting_balance)?;
        let balance = self.store.add_credits(owner_id, plan.credits())?;
        self.record_credit_change(owner_id, plan.name(), balance);
        Ok(balance)
    }

    fn record_credit_change(&self, owner_id: &str, reason: &str, balance: i64) {
        info!(owner = owner_id, reason, balance, "credits changed");
        self.emit(
            CREDITS_CHANGED,
            &CreditChange {
                owner_id,
                reason,
                balance,
            },
        );
    }

    /// Event log failures are logged and otherwise ignored.
    fn emit<T: Serialize>(&self, event_type: &str, record: &T) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, record) {
            warn!(event = event_type, error = %err, "event log write failed");
        }
    }
}

fn require_owner(owner_id: Option<&str>) -> Result<&str, GenerateError> {
    owner_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(GenerateError::Unauthenticated)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
