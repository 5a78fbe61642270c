#![allow(dead_code)]

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::Receiver;
use image::DynamicImage;
use pdf_ocr::{
    CancelToken, ProgressEvent, ProgressObserver, Status,
    engine::{Bitmap, OcrEngine, OcrStatus, OcrUpdate, PdfDocument, PdfPage, PdfRenderer, Recognized},
};
use std::sync::Mutex;

/// Scripted renderer: a fixed page list, optionally failing to load or to render a page.
#[derive(Default, Clone)]
pub struct FakeRenderer {
    pub pages: u32,
    pub fail_load: bool,
    pub fail_render_on: Option<u32>,
}

impl FakeRenderer {
    pub fn with_pages(pages: u32) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }
}

impl PdfRenderer for FakeRenderer {
    type Document = FakeDocument;

    fn load(&self, bytes: &[u8]) -> Result<FakeDocument> {
        if self.fail_load || !bytes.starts_with(b"%PDF") {
            bail!("not a PDF");
        }
        Ok(FakeDocument {
            pages: self.pages,
            fail_render_on: self.fail_render_on,
        })
    }
}

pub struct FakeDocument {
    pages: u32,
    fail_render_on: Option<u32>,
}

impl PdfDocument for FakeDocument {
    type Page = FakePage;

    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page(&self, number: u32) -> Result<FakePage> {
        Ok(FakePage {
            number,
            fail: self.fail_render_on == Some(number),
        })
    }
}

pub struct FakePage {
    number: u32,
    fail: bool,
}

impl PdfPage for FakePage {
    fn render(&self, scale: f32, _cancel: &CancelToken) -> Result<Bitmap> {
        if self.fail {
            bail!("corrupt page stream");
        }
        Ok(Bitmap {
            page: self.number,
            scale,
            image: DynamicImage::new_rgb8(8, 8),
        })
    }
}

/// Scripted OCR: returns `texts[page - 1]`, reporting `fractions` while "recognizing".
#[derive(Default)]
pub struct FakeOcr {
    pub texts: Vec<String>,
    pub fractions: Vec<f64>,
    pub fail_on: Option<u32>,
    /// Trip this token while recognizing the given page.
    pub cancel_during: Option<(u32, CancelToken)>,
    /// Block on this channel before recognizing page 1 of the first run only.
    pub gate: Mutex<Option<Receiver<()>>>,
    pub seen: Mutex<Vec<u32>>,
}

impl FakeOcr {
    pub fn with_texts(texts: &[&str]) -> Self {
        Self {
            texts: texts.iter().map(|t| t.to_string()).collect(),
            fractions: vec![0.0, 0.5, 1.0],
            ..Default::default()
        }
    }

    pub fn gated(mut self, gate: Receiver<()>) -> Self {
        self.gate = Mutex::new(Some(gate));
        self
    }

    pub fn seen(&self) -> Vec<u32> {
        self.seen.lock().unwrap().clone()
    }
}

impl OcrEngine for FakeOcr {
    fn recognize(
        &self,
        bitmap: &Bitmap,
        language: &str,
        cancel: &CancelToken,
        on_update: &mut dyn FnMut(OcrUpdate),
    ) -> Result<Recognized> {
        assert_eq!(language, "eng");
        self.seen.lock().unwrap().push(bitmap.page);

        if bitmap.page == 1 {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
        }

        on_update(OcrUpdate {
            status: OcrStatus::Initializing,
            fraction: 0.0,
        });
        on_update(OcrUpdate {
            status: OcrStatus::LoadingLanguage,
            fraction: 1.0,
        });

        for &f in &self.fractions {
            on_update(OcrUpdate::recognizing(f));
        }

        if let Some((page, token)) = &self.cancel_during {
            if *page == bitmap.page {
                token.cancel();
            }
        }
        if cancel.is_cancelled() && self.cancel_during.is_none() {
            bail!("interrupted");
        }

        if self.fail_on == Some(bitmap.page) {
            return Err(anyhow!("engine crashed"));
        }

        let idx = (bitmap.page - 1) as usize;
        let text = self
            .texts
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("page {}", bitmap.page));
        Ok(Recognized { text })
    }
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ProgressEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.events().iter().map(|e| e.progress).collect()
    }

    pub fn count(&self, status: Status) -> usize {
        self.events().iter().filter(|e| e.status == status).count()
    }
}

impl ProgressObserver for Recorder {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub const PDF: &[u8] = b"%PDF-1.7 fake";

pub fn assert_monotonic(progress: &[f64]) {
    for w in progress.windows(2) {
        assert!(w[0] <= w[1], "progress went backwards: {progress:?}");
    }
    for p in progress {
        assert!((0.0..=100.0).contains(p), "out of range: {p}");
    }
}
