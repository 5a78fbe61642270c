pub mod poppler;
pub mod process;
pub mod tesseract;
pub mod types;

use crate::cancel::CancelToken;
use anyhow::Result;

pub use types::{Bitmap, OcrStatus, OcrUpdate, Recognized, ToolDiag};

/// Loads PDF bytes into a document the pipeline can page through.
pub trait PdfRenderer {
    type Document: PdfDocument;

    fn load(&self, bytes: &[u8]) -> Result<Self::Document>;
}

pub trait PdfDocument {
    type Page: PdfPage;

    fn page_count(&self) -> u32;
    /// `number` is 1-based.
    fn page(&self, number: u32) -> Result<Self::Page>;
}

pub trait PdfPage {
    fn render(&self, scale: f32, cancel: &CancelToken) -> Result<Bitmap>;
}

pub trait OcrEngine {
    /// Recognize the text in `bitmap`, reporting intermediate state through `on_update`.
    fn recognize(
        &self,
        bitmap: &Bitmap,
        language: &str,
        cancel: &CancelToken,
        on_update: &mut dyn FnMut(OcrUpdate),
    ) -> Result<Recognized>;
}
