use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    trimmed_base, truncate_text, GenerationResult, ImageProvider, PromptAssistant, ProviderError,
};
use crate::config::GeminiConfig;

const ENHANCE_INSTRUCTION: &str = "Rewrite the following image generation prompt so it is more vivid and specific. \
Keep the subject and intent, add style, lighting and composition details. \
Answer with the rewritten prompt only.";

const DESCRIBE_INSTRUCTION: &str = "Describe this image as one detailed prompt that an image generator could use to \
recreate it. Answer with the prompt only.";

/// JSON client for the Generative Language API. Image generation uses the
/// image model (`:generateContent`, or `:predict` for Imagen); prompt help
/// uses the text model.
pub struct GeminiProvider {
    config: GeminiConfig,
    http: HttpClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    GenerateContent,
    Predict,
}

/// Both response shapes, decoded at the client boundary.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiResponse {
    Content { candidates: Vec<Candidate> },
    Predictions { predictions: Vec<Prediction> },
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default, rename = "bytesBase64Encoded")]
    bytes_base64_encoded: Option<String>,
    #[serde(default, rename = "mimeType")]
    mime_type: Option<String>,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: GeminiConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    fn transport(&self) -> Transport {
        let model = self.config.model.trim().trim_start_matches("models/");
        if model.starts_with("imagen") {
            Transport::Predict
        } else {
            Transport::GenerateContent
        }
    }

    fn endpoint(&self) -> String {
        let method = match self.transport() {
            Transport::GenerateContent => "generateContent",
            Transport::Predict => "predict",
        };
        self.endpoint_for(&self.config.model, method)
    }

    fn endpoint_for(&self, model: &str, method: &str) -> String {
        let model = model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:{}", trimmed_base(&self.config.api_base), model_path, method)
    }

    fn post_json(&self, url: String, payload: &Value) -> Result<String, ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured);
        }

        let response = self
            .http
            .post(url)
            .query(&[("key", self.config.api_key.as_str())])
            .timeout(self.config.timeout)
            .json(payload)
            .send()
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        let body = response.text().map_err(ProviderError::from_transport)?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body: truncate_text(&body, 512),
            });
        }
        Ok(body)
    }

    fn ask_text(&self, parts: Vec<Value>) -> Result<String, ProviderError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
        });
        let body = self.post_json(
            self.endpoint_for(&self.config.text_model, "generateContent"),
            &payload,
        )?;
        Self::decode_text(&body)
    }

    fn payload(&self, prompt: &str) -> Value {
        match self.transport() {
            Transport::GenerateContent => json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": prompt }],
                }],
                "generationConfig": {
                    "responseModalities": ["TEXT", "IMAGE"],
                },
            }),
            Transport::Predict => json!({
                "instances": [{ "prompt": prompt }],
                "parameters": { "sampleCount": 1 },
            }),
        }
    }

    fn decode_text(body: &str) -> Result<String, ProviderError> {
        let response: GeminiResponse = serde_json::from_str(body).map_err(|_| {
            ProviderError::InvalidResponse("response has no candidates".to_string())
        })?;
        let GeminiResponse::Content { candidates } = response else {
            return Err(ProviderError::InvalidResponse(
                "prediction responses carry no text".to_string(),
            ));
        };

        let text = candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<String>();
        let text = text.trim().trim_matches('"').trim();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "model returned no text".to_string(),
            ));
        }
        Ok(text.to_string())
    }

    fn decode_response(body: &str) -> Result<GenerationResult, ProviderError> {
        let response: GeminiResponse = serde_json::from_str(body).map_err(|_| {
            ProviderError::InvalidResponse(
                "response has neither candidates nor predictions".to_string(),
            )
        })?;

        match response {
            GeminiResponse::Content { candidates } => {
                let mut text_only = false;
                for part in candidates
                    .into_iter()
                    .filter_map(|candidate| candidate.content)
                    .flat_map(|content| content.parts)
                {
                    match part.inline_data {
                        Some(inline) if !inline.data.trim().is_empty() => {
                            return decode_image(&inline.data, inline.mime_type);
                        }
                        _ => {
                            text_only |= part
                                .text
                                .as_deref()
                                .map(|text| !text.trim().is_empty())
                                .unwrap_or(false);
                        }
                    }
                }
                let reason = if text_only {
                    "model answered with text but no image"
                } else {
                    "no inline image data in candidates"
                };
                Err(ProviderError::InvalidResponse(reason.to_string()))
            }
            GeminiResponse::Predictions { predictions } => predictions
                .into_iter()
                .find_map(|prediction| {
                    prediction
                        .bytes_base64_encoded
                        .filter(|data| !data.trim().is_empty())
                        .map(|data| (data, prediction.mime_type))
                })
                .map(|(data, mime_type)| decode_image(&data, mime_type))
                .unwrap_or_else(|| {
                    Err(ProviderError::InvalidResponse(
                        "no image bytes in predictions".to_string(),
                    ))
                }),
        }
    }
}

fn decode_image(data: &str, mime_type: Option<String>) -> Result<GenerationResult, ProviderError> {
    let bytes = BASE64.decode(data.trim().as_bytes())?;
    if bytes.is_empty() {
        return Err(ProviderError::InvalidResponse("image data is empty".to_string()));
    }
    Ok(GenerationResult {
        bytes,
        mime_type: mime_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "image/png".to_string()),
    })
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn label(&self) -> &str {
        "Gemini"
    }

    fn generate(&self, prompt: &str) -> Result<GenerationResult, ProviderError> {
        let body = self.post_json(self.endpoint(), &self.payload(prompt))?;
        Self::decode_response(&body)
    }
}

impl PromptAssistant for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        self.ask_text(vec![json!({
            "text": format!("{ENHANCE_INSTRUCTION}\n\nPrompt: {prompt}"),
        })])
    }

    fn describe_image(&self, image: &[u8], mime_type: &str) -> Result<String, ProviderError> {
        self.ask_text(vec![
            json!({ "text": DESCRIBE_INSTRUCTION }),
            json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64.encode(image),
                },
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{GeminiProvider, Transport};
    use crate::config::GeminiConfig;
    use crate::providers::test_support::serve_once;
    use crate::providers::{ImageProvider, PromptAssistant, ProviderError};

    fn provider(model: &str, base: &str) -> GeminiProvider {
        let mut config = GeminiConfig::new("gem-key");
        config.model = model.to_string();
        config.api_base = base.to_string();
        let http = reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .expect("http client");
        GeminiProvider::with_client(config, http)
    }

    #[test]
    fn endpoint_and_payload_follow_model_family() {
        let flash = provider("gemini-2.0-flash-preview-image-generation", "https://api.test/v1beta/");
        assert_eq!(flash.transport(), Transport::GenerateContent);
        assert_eq!(
            flash.endpoint(),
            "https://api.test/v1beta/models/gemini-2.0-flash-preview-image-generation:generateContent"
        );
        let payload = flash.payload("a cat");
        assert_eq!(payload["contents"][0]["parts"][0]["text"], json!("a cat"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );

        let imagen = provider("models/imagen-3.0-generate-001", "https://api.test/v1beta");
        assert_eq!(imagen.transport(), Transport::Predict);
        assert_eq!(
            imagen.endpoint(),
            "https://api.test/v1beta/models/imagen-3.0-generate-001:predict"
        );
        let payload = imagen.payload("a cat");
        assert_eq!(payload["instances"][0]["prompt"], json!("a cat"));
        assert_eq!(payload["parameters"]["sampleCount"], json!(1));
    }

    #[test]
    fn decodes_inline_data_from_candidates() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here is your image" },
                        { "inlineData": { "mimeType": "image/png", "data": "iVBORw==" } }
                    ]
                }
            }],
            "usageMetadata": { "totalTokenCount": 12 }
        });
        let result = GeminiProvider::decode_response(&body.to_string())?;
        assert_eq!(result.bytes, vec![0x89, 0x50, 0x4E, 0x47]);
        assert_eq!(result.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn decodes_snake_case_inline_data_and_predictions() -> anyhow::Result<()> {
        let snake = json!({
            "candidates": [{
                "content": { "parts": [{ "inline_data": { "mime_type": "image/jpeg", "data": "aGVsbG8=" } }] }
            }]
        });
        let result = GeminiProvider::decode_response(&snake.to_string())?;
        assert_eq!(result.bytes, b"hello");
        assert_eq!(result.mime_type, "image/jpeg");

        let predictions = json!({
            "predictions": [{ "bytesBase64Encoded": "aGVsbG8=" }]
        });
        let result = GeminiProvider::decode_response(&predictions.to_string())?;
        assert_eq!(result.bytes, b"hello");
        assert_eq!(result.mime_type, "image/png");
        Ok(())
    }

    #[test]
    fn missing_or_empty_image_is_invalid_response() {
        let cases: Vec<Value> = vec![
            json!({}),
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "I can't draw that" }] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "" } }] } }] }),
            json!({ "predictions": [{ "mimeType": "image/png" }] }),
            json!({ "promptFeedback": { "blockReason": "SAFETY" } }),
        ];
        for body in cases {
            let err = GeminiProvider::decode_response(&body.to_string())
                .expect_err("must be rejected");
            assert!(
                matches!(err, ProviderError::InvalidResponse(_)),
                "unexpected error for {body}: {err}"
            );
        }
    }

    #[test]
    fn text_only_answer_is_reported_as_such() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I can't draw that" }] } }]
        });
        match GeminiProvider::decode_response(&body.to_string()) {
            Err(ProviderError::InvalidResponse(reason)) => {
                assert!(reason.contains("text but no image"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn corrupt_base64_is_a_decode_failure() {
        let body = json!({
            "predictions": [{ "bytesBase64Encoded": "***" }]
        });
        assert!(matches!(
            GeminiProvider::decode_response(&body.to_string()),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn sends_key_as_query_parameter() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": "iVBORw==" } }] } }]
        });
        let (base, captured) =
            serve_once("200 OK", "application/json", body.to_string().into_bytes())?;
        let result = provider("gemini-2.0-flash-preview-image-generation", &base)
            .generate("a cool cat")?;
        assert_eq!(result.bytes, vec![0x89, 0x50, 0x4E, 0x47]);

        let request = captured.recv()?;
        assert!(request.head.starts_with(
            "POST /models/gemini-2.0-flash-preview-image-generation:generateContent?key=gem-key "
        ));
        let sent: Value = serde_json::from_slice(&request.body)?;
        assert_eq!(sent["contents"][0]["parts"][0]["text"], json!("a cool cat"));
        Ok(())
    }

    #[test]
    fn error_status_is_surfaced() -> anyhow::Result<()> {
        let (base, _captured) = serve_once(
            "429 Too Many Requests",
            "application/json",
            br#"{"error":{"message":"quota"}}"#.to_vec(),
        )?;
        let err = provider("gemini-2.0-flash-preview-image-generation", &base)
            .generate("a cool cat")
            .expect_err("429 must fail");
        assert!(matches!(err, ProviderError::Status { code: 429, .. }));
        Ok(())
    }

    #[test]
    fn describe_image_sends_inline_data_to_the_text_model() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": " \"A red fox in snow, soft light\"\n" }] } }]
        });
        let (base, captured) =
            serve_once("200 OK", "application/json", body.to_string().into_bytes())?;
        let answer = provider("gemini-2.0-flash-preview-image-generation", &base)
            .describe_image(b"hello", "image/jpeg")?;
        assert_eq!(answer, "A red fox in snow, soft light");

        let request = captured.recv()?;
        assert!(request
            .head
            .starts_with("POST /models/gemini-2.0-flash:generateContent?key=gem-key "));
        let sent: Value = serde_json::from_slice(&request.body)?;
        let parts = &sent["contents"][0]["parts"];
        assert!(parts[0]["text"].as_str().unwrap_or("").contains("Describe this image"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["inlineData"]["data"], json!("aGVsbG8="));
        assert!(sent.get("generationConfig").is_none());
        Ok(())
    }

    #[test]
    fn enhance_prompt_embeds_the_original_prompt() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "A cool cat wearing sunglasses, " },
                { "text": "neon city at night" }
            ] } }]
        });
        let (base, captured) =
            serve_once("200 OK", "application/json", body.to_string().into_bytes())?;
        let answer = provider("gemini-2.0-flash-preview-image-generation", &base)
            .enhance_prompt("a cool cat")?;
        assert_eq!(answer, "A cool cat wearing sunglasses, neon city at night");

        let sent: Value = serde_json::from_slice(&captured.recv()?.body)?;
        let text = sent["contents"][0]["parts"][0]["text"].as_str().unwrap_or("");
        assert!(text.ends_with("Prompt: a cool cat"));
        Ok(())
    }

    #[test]
    fn text_answers_without_text_are_invalid() {
        let cases: Vec<Value> = vec![
            json!({ "candidates": [] }),
            json!({ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] }),
            json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "data": "aGVsbG8=" } }] } }] }),
            json!({ "predictions": [{ "bytesBase64Encoded": "aGVsbG8=" }] }),
            json!({ "error": "nope" }),
        ];
        for body in cases {
            assert!(
                matches!(
                    GeminiProvider::decode_text(&body.to_string()),
                    Err(ProviderError::InvalidResponse(_))
                ),
                "accepted {body}"
            );
        }
    }
}
