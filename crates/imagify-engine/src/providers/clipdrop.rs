use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;

use super::{
    is_png, sniff_mime_type, trimmed_base, truncate_text, GenerationResult, ImageEditor,
    ImageProvider, ProviderError,
};
use crate::config::ClipDropConfig;

const TEXT_TO_IMAGE_PATH: &str = "text-to-image/v1";
const REMOVE_BACKGROUND_PATH: &str = "remove-background/v1";
const UPSCALE_PATH: &str = "image-upscaling/v1/upscale";
const REIMAGINE_PATH: &str = "reimagine/v1/reimagine";

/// ClipDrop API client. Every call is a multipart form and every answer is
/// the raw image body.
pub struct ClipDropProvider {
    config: ClipDropConfig,
    http: HttpClient,
}

impl ClipDropProvider {
    pub fn new(config: ClipDropConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: ClipDropConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", trimmed_base(&self.config.api_base), path)
    }

    fn post_form(&self, path: &str, form: MultipartForm) -> Result<Vec<u8>, ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        let response = self
            .http
            .post(self.endpoint(path))
            .header("x-api-key", &self.config.api_key)
            .timeout(self.config.timeout)
            .multipart(form)
            .send()
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }

        Ok(response
            .bytes()
            .map_err(ProviderError::from_transport)?
            .to_vec())
    }

    fn image_form(image: &[u8]) -> Result<MultipartForm, ProviderError> {
        let mime_type = sniff_mime_type(image).unwrap_or("application/octet-stream");
        let part = MultipartPart::bytes(image.to_vec())
            .file_name("image")
            .mime_str(mime_type)
            .map_err(ProviderError::Transport)?;
        Ok(MultipartForm::new().part("image_file", part))
    }
}

/// Only PNG payloads are accepted; the MIME type follows the bytes, not the
/// response headers.
fn png_result(bytes: Vec<u8>) -> Result<GenerationResult, ProviderError> {
    if !is_png(&bytes) {
        return Err(ProviderError::NotPng);
    }
    Ok(GenerationResult {
        bytes,
        mime_type: "image/png".to_string(),
    })
}

fn any_image_result(bytes: Vec<u8>) -> Result<GenerationResult, ProviderError> {
    let mime_type = sniff_mime_type(&bytes).ok_or(ProviderError::NotAnImage)?;
    Ok(GenerationResult {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

impl ImageProvider for ClipDropProvider {
    fn name(&self) -> &str {
        "clipdrop"
    }

    fn label(&self) -> &str {
        "ClipDrop"
    }

    fn generate(&self, prompt: &str) -> Result<GenerationResult, ProviderError> {
        let form = MultipartForm::new().text("prompt", prompt.to_string());
        png_result(self.post_form(TEXT_TO_IMAGE_PATH, form)?)
    }
}

impl ImageEditor for ClipDropProvider {
    fn name(&self) -> &str {
        "clipdrop"
    }

    fn label(&self) -> &str {
        "ClipDrop"
    }

    fn remove_background(&self, image: &[u8]) -> Result<GenerationResult, ProviderError> {
        png_result(self.post_form(REMOVE_BACKGROUND_PATH, Self::image_form(image)?)?)
    }

    fn upscale(&self, image: &[u8], width: u32, height: u32) -> Result<GenerationResult, ProviderError> {
        let form = Self::image_form(image)?
            .text("target_width", width.to_string())
            .text("target_height", height.to_string());
        any_image_result(self.post_form(UPSCALE_PATH, form)?)
    }

    fn reimagine(&self, image: &[u8]) -> Result<GenerationResult, ProviderError> {
        any_image_result(self.post_form(REIMAGINE_PATH, Self::image_form(image)?)?)
    }
}
