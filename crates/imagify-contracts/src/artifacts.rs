use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One completed generation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub id: String,
    pub owner_id: String,
    /// Image as a `data:<mime>;base64,...` URI.
    pub image_data: String,
    pub prompt: String,
    pub provider: String,
    pub created_at: String,
}

impl GeneratedArtifact {
    pub fn new(
        owner_id: impl Into<String>,
        image_data: impl Into<String>,
        prompt: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            image_data: image_data.into(),
            prompt: prompt.into(),
            provider: provider.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}
