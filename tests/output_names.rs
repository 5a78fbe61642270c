use pdf_ocr::util::{output_text_name, sha256_hex};
use std::path::Path;

#[test]
fn text_name_replaces_pdf_extension() {
    assert_eq!(output_text_name(Path::new("scans/invoice.pdf"), "_ocr.txt"), "invoice_ocr.txt");
    assert_eq!(output_text_name(Path::new("report.v2.PDF"), "_ocr.txt"), "report.v2_ocr.txt");
}

#[test]
fn text_name_without_stem() {
    assert_eq!(output_text_name(Path::new(""), ".txt"), "document.txt");
}

#[test]
fn sha256_is_stable() {
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
