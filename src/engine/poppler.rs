use super::{
    PdfDocument, PdfPage, PdfRenderer,
    process::{tool_version, run_tool, timeout_from_secs},
    types::{Bitmap, ToolDiag},
};
use crate::{cancel::CancelToken, config, util::ensure_dir, util::sha256_hex};
use anyhow::{Context, Result, anyhow, bail};
use image::ImageFormat;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Renders PDF pages with poppler-utils (`pdfinfo` + `pdftoppm`).
pub struct PopplerRenderer {
    cfg: config::Render,
    scratch_dir: PathBuf,
    keep_scratch: bool,
}

impl PopplerRenderer {
    pub fn new(cfg: &config::Render, scratch_dir: &Path, keep_scratch: bool) -> Self {
        Self {
            cfg: cfg.clone(),
            scratch_dir: scratch_dir.to_path_buf(),
            keep_scratch,
        }
    }

    pub fn doctor(&self) -> Vec<ToolDiag> {
        vec![
            tool_version("pdfinfo", &self.cfg.pdfinfo_exe, "-v"),
            tool_version("pdftoppm", &self.cfg.pdftoppm_exe, "-v"),
        ]
    }
}

impl PdfRenderer for PopplerRenderer {
    type Document = PopplerDocument;

    fn load(&self, bytes: &[u8]) -> Result<PopplerDocument> {
        if bytes.is_empty() {
            bail!("input is empty");
        }
        ensure_dir(&self.scratch_dir)?;

        let digest = sha256_hex(bytes);
        let tag = digest[..16].to_string();
        let pdf_path = self.scratch_dir.join(format!("doc-{tag}.pdf"));
        std::fs::write(&pdf_path, bytes)
            .with_context(|| format!("writing scratch PDF: {}", pdf_path.display()))?;

        let inner = Arc::new(Loaded {
            cfg: self.cfg.clone(),
            pdf_path,
            scratch_dir: self.scratch_dir.clone(),
            tag,
            keep_scratch: self.keep_scratch,
        });

        let out = run_tool(
            &self.cfg.pdfinfo_exe,
            [inner.pdf_path.as_os_str()],
            None,
            timeout_from_secs(self.cfg.load_timeout_seconds),
            None,
        )?;
        let info = String::from_utf8_lossy(&out.stdout);
        let pages = parse_page_count(&info)
            .ok_or_else(|| anyhow!("pdfinfo reported no page count"))?;

        debug!("loaded {} ({} pages)", inner.pdf_path.display(), pages);
        Ok(PopplerDocument { inner, pages })
    }
}

struct Loaded {
    cfg: config::Render,
    pdf_path: PathBuf,
    scratch_dir: PathBuf,
    /// Digest prefix shared by every scratch file of this document.
    tag: String,
    keep_scratch: bool,
}

impl Drop for Loaded {
    fn drop(&mut self) {
        if self.keep_scratch {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.pdf_path) {
            warn!("removing {}: {e}", self.pdf_path.display());
        }
    }
}

pub struct PopplerDocument {
    inner: Arc<Loaded>,
    pages: u32,
}

impl PdfDocument for PopplerDocument {
    type Page = PopplerPage;

    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page(&self, number: u32) -> Result<PopplerPage> {
        if number == 0 || number > self.pages {
            bail!("page {number} out of range 1..={}", self.pages);
        }
        Ok(PopplerPage {
            doc: Arc::clone(&self.inner),
            number,
        })
    }
}

pub struct PopplerPage {
    doc: Arc<Loaded>,
    number: u32,
}

impl PdfPage for PopplerPage {
    fn render(&self, scale: f32, cancel: &CancelToken) -> Result<Bitmap> {
        let doc = &self.doc;
        let dpi = dpi_for_scale(scale);
        let prefix = page_prefix(&doc.scratch_dir, &doc.tag, self.number);
        let png_path = prefix.with_extension("png");
        let page = self.number.to_string();
        let dpi_arg = dpi.to_string();

        let args: Vec<&OsStr> = vec![
            OsStr::new("-f"),
            OsStr::new(&page),
            OsStr::new("-l"),
            OsStr::new(&page),
            OsStr::new("-r"),
            OsStr::new(&dpi_arg),
            OsStr::new("-png"),
            OsStr::new("-singlefile"),
            doc.pdf_path.as_os_str(),
            prefix.as_os_str(),
        ];

        run_tool(
            &doc.cfg.pdftoppm_exe,
            args,
            None,
            timeout_from_secs(doc.cfg.page_timeout_seconds),
            Some(cancel),
        )
        .with_context(|| format!("pdftoppm page {}", self.number))?;

        let bytes = std::fs::read(&png_path)
            .with_context(|| format!("reading rendered page: {}", png_path.display()))?;
        if !doc.keep_scratch {
            let _ = std::fs::remove_file(&png_path);
        }
        let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .with_context(|| format!("decoding rendered page {}", self.number))?;

        debug!(
            "rendered page {} at {} dpi ({}x{})",
            self.number,
            dpi,
            image.width(),
            image.height()
        );

        Ok(Bitmap {
            page: self.number,
            scale,
            image,
        })
    }
}

/// PDF user space is 72 units per inch, so scale 1.0 renders at 72 dpi.
pub(crate) fn dpi_for_scale(scale: f32) -> u32 {
    (72.0 * scale).round().max(1.0) as u32
}

/// `pdftoppm` output prefix; the extension is added by the tool.
pub(crate) fn page_prefix(scratch_dir: &Path, tag: &str, number: u32) -> PathBuf {
    scratch_dir.join(format!("doc-{tag}-page-{number:05}"))
}

pub(crate) fn parse_page_count(pdfinfo: &str) -> Option<u32> {
    pdfinfo.lines().find_map(|line| {
        let rest = line.strip_prefix("Pages:")?;
        rest.trim().parse().ok()
    })
}
