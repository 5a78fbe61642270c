use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Processing,
    Recognizing,
    Complete,
    Error,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Error | Status::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: Status,
    /// Overall progress in `[0, 100]`.
    pub progress: f64,
    pub message: String,
}

/// Receives progress events from a run.
///
/// Called synchronously on the thread driving the run, so implementations
/// should return quickly. A panic here aborts the run.
pub trait ProgressObserver {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent),
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

impl ProgressObserver for Sender<ProgressEvent> {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver means nobody is watching; the run carries on.
        let _ = self.send(event.clone());
    }
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl ProgressObserver for Silent {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Overall progress for `page` (1-based) of `pages` with intra-page fraction `fraction`.
///
/// `((page - 1) + fraction) / pages * 100`, with `fraction` clamped to `[0, 1]`.
/// Zero pages maps to 100.
pub fn overall(page: u32, pages: u32, fraction: f64) -> f64 {
    if pages == 0 {
        return 100.0;
    }
    let r = clamp_fraction(fraction);
    (f64::from(page.saturating_sub(1)) + r) / f64::from(pages) * 100.0
}

/// Clamp to `[0, 1]`, treating NaN as no progress.
fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Emits the events of a single run and keeps the reported progress monotonic.
pub(crate) struct Tracker<'a> {
    observer: &'a dyn ProgressObserver,
    pages: u32,
    last: f64,
}

impl<'a> Tracker<'a> {
    pub(crate) fn new(observer: &'a dyn ProgressObserver) -> Self {
        Self {
            observer,
            pages: 0,
            last: 0.0,
        }
    }

    pub(crate) fn set_pages(&mut self, pages: u32) {
        self.pages = pages;
    }

    pub(crate) fn loading(&mut self) {
        self.emit(Status::Loading, 0.0, "Loading PDF...".to_string());
    }

    pub(crate) fn processing(&mut self, page: u32) {
        let p = overall(page, self.pages, 0.0);
        self.emit(
            Status::Processing,
            p,
            format!("Processing page {page} of {}...", self.pages),
        );
    }

    pub(crate) fn recognizing(&mut self, page: u32, fraction: f64) {
        let p = overall(page, self.pages, fraction);
        let pct = (clamp_fraction(fraction) * 100.0).round();
        self.emit(
            Status::Recognizing,
            p,
            format!("Recognizing text on page {page}: {pct}%"),
        );
    }

    pub(crate) fn complete(&mut self) {
        self.emit(Status::Complete, 100.0, "Processing complete!".to_string());
    }

    pub(crate) fn error(&mut self, message: String) {
        let p = self.last;
        self.emit(Status::Error, p, message);
    }

    pub(crate) fn cancelled(&mut self, message: String) {
        let p = self.last;
        self.emit(Status::Cancelled, p, message);
    }

    fn emit(&mut self, status: Status, progress: f64, message: String) {
        let progress = progress.clamp(0.0, 100.0).max(self.last);
        self.last = progress;
        self.observer.on_progress(&ProgressEvent {
            status,
            progress,
            message,
        });
    }
}
