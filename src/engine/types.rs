use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One rendered page, handed to OCR and dropped right after.
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub page: u32,
    pub scale: f32,
    pub image: DynamicImage,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrStatus {
    Initializing,
    LoadingLanguage,
    RecognizingText,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcrUpdate {
    pub status: OcrStatus,
    /// Fraction of the current status done, in `[0, 1]`.
    pub fraction: f64,
}

impl OcrUpdate {
    pub fn recognizing(fraction: f64) -> Self {
        Self {
            status: OcrStatus::RecognizingText,
            fraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recognized {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiag {
    pub tool: String,
    pub exe: String,
    pub version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
