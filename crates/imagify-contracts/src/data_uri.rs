use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataUriError {
    #[error("data URI is missing the ';base64,' marker")]
    NotBase64,
    #[error("data URI payload is empty")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Decoded payload of a `data:` URI or bare base64 string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}

/// Accepts `data:image/png;base64,...` or a bare base64 payload.
pub fn decode_data_uri(raw: &str) -> Result<DataUri, DataUriError> {
    let trimmed = raw.trim();
    let (mime_type, payload) = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or(DataUriError::NotBase64)?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or(DataUriError::NotBase64)?;
            let mime = Some(mime.to_string()).filter(|value| !value.is_empty());
            (mime, payload)
        }
        None => (None, trimmed),
    };
    if payload.trim().is_empty() {
        return Err(DataUriError::Empty);
    }
    let bytes = BASE64.decode(payload.trim().as_bytes())?;
    Ok(DataUri { mime_type, bytes })
}
