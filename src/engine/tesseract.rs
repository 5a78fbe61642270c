use super::{
    OcrEngine,
    process::{tool_version, run_tool, timeout_from_secs},
    types::{Bitmap, OcrStatus, OcrUpdate, Recognized, ToolDiag},
};
use crate::{cancel::CancelToken, config};
use anyhow::{Context, Result};
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// OCR through the `tesseract` command line tool.
///
/// The bitmap is piped in as PNG on stdin and plain text is read back from stdout.
/// The CLI gives no incremental progress, so each page reports the start and
/// the end of recognition only.
pub struct TesseractEngine {
    cfg: config::Ocr,
    keep_stderr: bool,
}

impl TesseractEngine {
    /// `keep_stderr` controls whether the tool's stderr chatter is logged at debug.
    pub fn new(cfg: &config::Ocr, keep_stderr: bool) -> Self {
        Self {
            cfg: cfg.clone(),
            keep_stderr,
        }
    }

    pub fn doctor(&self) -> Vec<ToolDiag> {
        let mut out = vec![tool_version("tesseract", &self.cfg.tesseract_exe, "--version")];
        out.push(self.language_diag());
        out
    }

    fn language_diag(&self) -> ToolDiag {
        let lang = &self.cfg.language;
        let res = run_tool(
            &self.cfg.tesseract_exe,
            ["--list-langs"],
            None,
            timeout_from_secs(10),
            None,
        );
        let (ok, error) = match res {
            Ok(o) => {
                let listed = String::from_utf8_lossy(&o.stdout);
                if languages_include(&listed, lang) {
                    (true, None)
                } else {
                    (false, Some(format!("language pack not installed: {lang}")))
                }
            }
            Err(e) => (false, Some(format!("{e:#}"))),
        };
        ToolDiag {
            tool: format!("tesseract-lang-{lang}"),
            exe: self.cfg.tesseract_exe.clone(),
            version: None,
            ok,
            error,
        }
    }

    fn args(&self, language: &str) -> Vec<String> {
        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            language.to_string(),
            // Drop the form feed tesseract appends after every page.
            "-c".to_string(),
            "page_separator=".to_string(),
        ];
        args.extend(self.cfg.extra_args.iter().cloned());
        args
    }

    fn stderr_note(&self, stderr: &[u8]) -> Option<String> {
        if !self.keep_stderr {
            return None;
        }
        let text = String::from_utf8_lossy(stderr);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &self,
        bitmap: &Bitmap,
        language: &str,
        cancel: &CancelToken,
        on_update: &mut dyn FnMut(OcrUpdate),
    ) -> Result<Recognized> {
        on_update(OcrUpdate {
            status: OcrStatus::Initializing,
            fraction: 0.0,
        });

        let mut png = Vec::new();
        bitmap
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .with_context(|| format!("encoding page {} as PNG", bitmap.page))?;

        on_update(OcrUpdate::recognizing(0.0));

        let out = run_tool(
            &self.cfg.tesseract_exe,
            self.args(language),
            Some(png),
            timeout_from_secs(self.cfg.page_timeout_seconds),
            Some(cancel),
        )
        .with_context(|| format!("tesseract page {}", bitmap.page))?;

        if let Some(note) = self.stderr_note(&out.stderr) {
            debug!("tesseract stderr page {}: {}", bitmap.page, note);
        }

        on_update(OcrUpdate::recognizing(1.0));

        Ok(Recognized {
            text: String::from_utf8_lossy(&out.stdout).into_owned(),
        })
    }
}

fn languages_include(listed: &str, lang: &str) -> bool {
    // `--list-langs` prints a header line, then one language per line.
    // A `+`-joined request needs every part installed.
    lang.split('+')
        .all(|want| listed.lines().skip(1).any(|l| l.trim() == want))
}
