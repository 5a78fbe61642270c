mod common;

use common::{FakeOcr, FakeRenderer, PDF, Recorder, assert_monotonic};
use pdf_ocr::{
    CancelToken, Pipeline, PipelineSettings, ProcessError, Status, progress::Silent,
};
use std::sync::Arc;

#[test]
fn cancelled_before_first_page() {
    let pipeline = Pipeline::new(
        PipelineSettings::default(),
        FakeRenderer::with_pages(2),
        FakeOcr::with_texts(&["a", "b"]),
    );
    let rec = Recorder::default();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = pipeline.process(PDF, &rec, &cancel).unwrap_err();

    assert!(matches!(err, ProcessError::Cancelled { page: 1 }));
    assert!(err.is_cancelled());
    assert!(pipeline.ocr().seen().is_empty());
    let statuses: Vec<Status> = rec.events().iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![Status::Loading, Status::Cancelled]);
}

#[test]
fn cancellation_is_checked_at_page_boundary() {
    let cancel = CancelToken::new();
    let mut ocr = FakeOcr::with_texts(&["a", "b", "c"]);
    ocr.cancel_during = Some((2, cancel.clone()));
    let pipeline = Pipeline::new(PipelineSettings::default(), FakeRenderer::with_pages(3), ocr);
    let rec = Recorder::default();

    let err = pipeline.process(PDF, &rec, &cancel).unwrap_err();

    assert!(matches!(err, ProcessError::Cancelled { page: 3 }));
    assert_eq!(pipeline.ocr().seen(), vec![1, 2]);
    assert_eq!(rec.count(Status::Cancelled), 1);
    assert_eq!(rec.count(Status::Error), 0);
    assert_eq!(rec.count(Status::Complete), 0);
    assert_monotonic(&rec.progress());
}

#[test]
fn failure_after_cancel_is_reported_as_cancellation() {
    let cancel = CancelToken::new();
    let mut ocr = FakeOcr::with_texts(&["a", "b"]);
    ocr.cancel_during = Some((2, cancel.clone()));
    ocr.fail_on = Some(2);
    let pipeline = Pipeline::new(PipelineSettings::default(), FakeRenderer::with_pages(2), ocr);
    let rec = Recorder::default();

    let err = pipeline.process(PDF, &rec, &cancel).unwrap_err();

    assert!(matches!(err, ProcessError::Cancelled { page: 2 }));
    assert_eq!(rec.count(Status::Cancelled), 1);
    assert_eq!(rec.count(Status::Error), 0);
}

#[test]
fn spawned_run_streams_events() {
    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings::default(),
        FakeRenderer::with_pages(2),
        FakeOcr::with_texts(&["Hello", "World"]),
    ));

    let handle = Arc::clone(&pipeline).spawn(PDF.to_vec());
    let events: Vec<_> = handle.events().iter().collect();
    let res = handle.wait().unwrap();

    assert_eq!(res.text, "Hello\n\nWorld\n\n");
    assert_eq!(events.first().unwrap().status, Status::Loading);
    assert_eq!(events.last().unwrap().status, Status::Complete);
    let progress: Vec<f64> = events.iter().map(|e| e.progress).collect();
    assert_monotonic(&progress);
}

#[test]
fn concurrent_run_is_rejected() {
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let ocr = FakeOcr::with_texts(&["only"]).gated(gate);
    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings::default(),
        FakeRenderer::with_pages(1),
        ocr,
    ));

    let handle = Arc::clone(&pipeline).spawn(PDF.to_vec());
    loop {
        let ev = handle.events().recv().expect("run ended early");
        if ev.status == Status::Processing {
            break;
        }
    }
    assert!(pipeline.is_busy());

    let rec = Recorder::default();
    let err = pipeline.process(PDF, &rec, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, ProcessError::RunInProgress));
    assert!(rec.events().is_empty());

    release.send(()).unwrap();
    let res = handle.wait().unwrap();
    assert_eq!(res.text, "only\n\n");
    assert!(!pipeline.is_busy());

    // The gate is consumed by the first run.
    let again = pipeline.process(PDF, &Silent, &CancelToken::new()).unwrap();
    assert_eq!(again.text, "only\n\n");
    assert_eq!(pipeline.ocr().seen(), vec![1, 1]);
    drop(release);
}

#[test]
fn handle_cancel_stops_spawned_run() {
    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let ocr = FakeOcr::with_texts(&["a", "b", "c"]).gated(gate);
    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings::default(),
        FakeRenderer::with_pages(3),
        ocr,
    ));

    let handle = Arc::clone(&pipeline).spawn(PDF.to_vec());
    loop {
        let ev = handle.events().recv().expect("run ended early");
        if ev.status == Status::Processing {
            break;
        }
    }
    handle.cancel();
    release.send(()).unwrap();

    let err = handle.wait().unwrap_err();
    assert!(matches!(err, ProcessError::Cancelled { page: 1 }));
}
