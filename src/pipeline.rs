use crate::{
    cancel::CancelToken,
    engine::{OcrEngine, OcrStatus, PdfDocument, PdfPage, PdfRenderer},
    error::ProcessError,
    progress::{ProgressEvent, ProgressObserver, Tracker},
};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Appended after every page's text, the last one included.
pub const PAGE_SEPARATOR: &str = "\n\n";
pub const DEFAULT_SCALE: f32 = 1.5;
pub const DEFAULT_LANGUAGE: &str = "eng";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub scale: f32,
    pub language: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageStats {
    pub page: u32,
    pub chars: usize,
    pub render_ms: u64,
    pub ocr_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub text: String,
    pub num_pages: u32,
    pub pages: Vec<PageStats>,
}

/// Drives one document at a time through render -> recognize -> accumulate.
pub struct Pipeline<R, O> {
    settings: PipelineSettings,
    renderer: R,
    ocr: O,
    busy: AtomicBool,
}

/// Held for the duration of a run; releases the pipeline on drop.
struct RunGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl<R, O> Pipeline<R, O>
where
    R: PdfRenderer,
    O: OcrEngine,
{
    pub fn new(settings: PipelineSettings, renderer: R, ocr: O) -> Self {
        Self {
            settings,
            renderer,
            ocr,
            busy: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn ocr(&self) -> &O {
        &self.ocr
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn begin(&self) -> Option<RunGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard { busy: &self.busy })
    }

    /// Run the whole document on the calling thread.
    ///
    /// Every outcome other than `RunInProgress` ends with exactly one terminal
    /// event (`complete`, `error` or `cancelled`) delivered to `observer`.
    pub fn process(
        &self,
        bytes: &[u8],
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<AggregatedResult, ProcessError> {
        let Some(_guard) = self.begin() else {
            warn!("rejecting run: pipeline busy");
            return Err(ProcessError::RunInProgress);
        };

        let mut tracker = Tracker::new(observer);
        let started = Instant::now();

        let doc = match self.renderer.load(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("load failed: {e:#}");
                tracker.error(format!("Error processing PDF: could not load document: {e:#}"));
                return Err(ProcessError::DocumentLoad { source: e.into() });
            }
        };

        let num_pages = doc.page_count();
        tracker.set_pages(num_pages);
        tracker.loading();
        info!(
            "document loaded pages={} bytes={} scale={} language={}",
            num_pages,
            bytes.len(),
            self.settings.scale,
            self.settings.language
        );

        let mut text = String::new();
        let mut pages = Vec::with_capacity(num_pages as usize);

        for page in 1..=num_pages {
            if cancel.is_cancelled() {
                return Err(cancelled(&mut tracker, page));
            }

            tracker.processing(page);

            let render_started = Instant::now();
            let bitmap = match doc
                .page(page)
                .and_then(|p| p.render(self.settings.scale, cancel))
            {
                Ok(b) => b,
                Err(_) if cancel.is_cancelled() => return Err(cancelled(&mut tracker, page)),
                Err(e) => {
                    warn!("render failed page={page}: {e:#}");
                    tracker.error(format!("Error processing PDF: page {page} could not be rendered"));
                    return Err(ProcessError::PageRender {
                        page,
                        source: e.into(),
                    });
                }
            };
            let render_ms = render_started.elapsed().as_millis() as u64;
            debug!(
                "page {page} rendered {}x{} in {render_ms}ms",
                bitmap.width(),
                bitmap.height()
            );

            let ocr_started = Instant::now();
            let recognized = {
                let mut on_update = |u: crate::engine::OcrUpdate| {
                    if u.status == OcrStatus::RecognizingText {
                        tracker.recognizing(page, u.fraction);
                    }
                };
                self.ocr
                    .recognize(&bitmap, &self.settings.language, cancel, &mut on_update)
            };
            drop(bitmap);

            let recognized = match recognized {
                Ok(r) => r,
                Err(_) if cancel.is_cancelled() => return Err(cancelled(&mut tracker, page)),
                Err(e) => {
                    warn!("recognition failed page={page}: {e:#}");
                    tracker.error(format!("Error processing PDF: text recognition failed on page {page}"));
                    return Err(ProcessError::Recognition {
                        page,
                        source: e.into(),
                    });
                }
            };
            let ocr_ms = ocr_started.elapsed().as_millis() as u64;

            let chars = recognized.text.chars().count();
            debug!("page {page}/{num_pages} recognized chars={chars} in {ocr_ms}ms");

            pages.push(PageStats {
                page,
                chars,
                render_ms,
                ocr_ms,
            });
            text.push_str(&recognized.text);
            text.push_str(PAGE_SEPARATOR);
        }

        drop(doc);
        tracker.complete();
        info!(
            "run complete pages={} chars={} elapsed_ms={}",
            num_pages,
            text.chars().count(),
            started.elapsed().as_millis()
        );

        Ok(AggregatedResult {
            text,
            num_pages,
            pages,
        })
    }
}

fn cancelled(tracker: &mut Tracker<'_>, page: u32) -> ProcessError {
    info!("run cancelled at page {page}");
    tracker.cancelled(format!("Processing cancelled at page {page}"));
    ProcessError::Cancelled { page }
}

impl<R, O> Pipeline<R, O>
where
    R: PdfRenderer + Send + Sync + 'static,
    O: OcrEngine + Send + Sync + 'static,
{
    /// Run on a worker thread, streaming events through the returned handle.
    pub fn spawn(self: Arc<Self>, bytes: Vec<u8>) -> RunHandle {
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let join = std::thread::spawn(move || self.process(&bytes, &tx, &token));
        RunHandle { events: rx, cancel, join }
    }
}

/// An in-flight run started by [`Pipeline::spawn`].
pub struct RunHandle {
    events: Receiver<ProgressEvent>,
    cancel: CancelToken,
    join: JoinHandle<Result<AggregatedResult, ProcessError>>,
}

impl RunHandle {
    /// Events in emission order. Disconnects once the run has finished.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the run finishes. A panic on the worker is resumed here.
    pub fn wait(self) -> Result<AggregatedResult, ProcessError> {
        match self.join.join() {
            Ok(res) => res,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
