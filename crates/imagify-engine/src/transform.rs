//! Image edits and prompt helpers that sit beside plain generation.

use std::fmt;
use std::io::Cursor;

use image::ImageReader;

use crate::config::ProviderConfig;
use crate::providers::{ClipDropProvider, GeminiProvider, ImageEditor, PromptAssistant};

/// Upscales ask for this multiple of the source size.
pub const UPSCALE_FACTOR: u32 = 4;
/// Longest side an upscale may request.
pub const MAX_UPSCALE_SIDE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEdit {
    RemoveBackground,
    Upscale,
    Variation,
}

impl ImageEdit {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageEdit::RemoveBackground => "remove-background",
            ImageEdit::Upscale => "upscale",
            ImageEdit::Variation => "variation",
        }
    }
}

impl fmt::Display for ImageEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Providers for the transform operations. Either side may be missing, in
/// which case the matching operations report that they are unavailable.
#[derive(Default)]
pub struct Transforms {
    pub editor: Option<Box<dyn ImageEditor>>,
    pub assistant: Option<Box<dyn PromptAssistant>>,
}

impl Transforms {
    /// ClipDrop edits images, Gemini answers prompt questions.
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            editor: config
                .clipdrop
                .as_ref()
                .map(|clipdrop| Box::new(ClipDropProvider::new(clipdrop.clone())) as Box<dyn ImageEditor>),
            assistant: config
                .gemini
                .as_ref()
                .map(|gemini| Box::new(GeminiProvider::new(gemini.clone())) as Box<dyn PromptAssistant>),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let editor = self.editor.as_ref().map(|editor| editor.name().to_string());
        let assistant = self
            .assistant
            .as_ref()
            .map(|assistant| assistant.name().to_string());
        editor.into_iter().chain(assistant).collect()
    }
}

/// Width and height of an encoded image without decoding its pixels.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Source size times [`UPSCALE_FACTOR`], scaled back down to fit
/// [`MAX_UPSCALE_SIDE`] with the aspect ratio kept.
pub fn upscale_target(width: u32, height: u32) -> (u32, u32) {
    let width = u64::from(width.max(1)) * u64::from(UPSCALE_FACTOR);
    let height = u64::from(height.max(1)) * u64::from(UPSCALE_FACTOR);
    let longest = width.max(height);
    let limit = u64::from(MAX_UPSCALE_SIDE);
    if longest <= limit {
        return (width as u32, height as u32);
    }
    let fit = |side: u64| ((side * limit) / longest).max(1) as u32;
    (fit(width), fit(height))
}
