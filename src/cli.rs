use crate::{
    cancel::CancelToken,
    config::Config,
    engine::{PdfDocument, PdfRenderer, poppler::PopplerRenderer, tesseract::TesseractEngine},
    pipeline::{Pipeline, PipelineSettings},
    progress::{ProgressEvent, Status},
    report::{InputInfo, RunReport},
    util::{ensure_dir, now_rfc3339, output_text_name, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pdf-ocr")]
#[command(about = "Extract a text layer from a PDF by rendering and OCR-ing each page")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-ocr.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the external render and OCR tools are usable.
    Doctor {},
    /// Print the page count of a PDF.
    Pages {
        #[arg(long)]
        input: PathBuf,
    },
    /// OCR every page and write the text file.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Tesseract language, e.g. `eng` or `eng+deu`.
        #[arg(long)]
        language: Option<String>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => {
            let _guard = init_logging(&args, &cfg, None)?;
            doctor(&cfg)
        }
        Command::Pages { input } => {
            let _guard = init_logging(&args, &cfg, None)?;
            pages(&cfg, input)
        }
        Command::Run {
            input,
            out_dir,
            language,
        } => {
            let mut cfg = cfg;
            if let Some(lang) = language {
                cfg.ocr.language = lang.clone();
            }
            run(&args, &cfg, input, out_dir.as_deref())
        }
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    for candidate in ["pdf-ocr.toml", "pdf-ocr.example.toml"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Config::load(p);
        }
    }
    Ok(Config::default())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn build_pipeline(cfg: &Config, scratch_dir: &Path) -> Pipeline<PopplerRenderer, TesseractEngine> {
    let renderer = PopplerRenderer::new(&cfg.render, scratch_dir, cfg.debug.keep_scratch);
    let ocr = TesseractEngine::new(&cfg.ocr, cfg.debug.keep_tool_stderr);
    let settings = PipelineSettings {
        scale: cfg.render.scale,
        language: cfg.ocr.language.clone(),
    };
    Pipeline::new(settings, renderer, ocr)
}

fn doctor(cfg: &Config) -> Result<()> {
    let scratch = Path::new(&cfg.paths.work_dir).join("doctor");
    let pipeline = build_pipeline(cfg, &scratch);
    let mut diags = pipeline.renderer().doctor();
    diags.extend(pipeline.ocr().doctor());
    println!("{}", serde_json::to_string_pretty(&diags)?);

    let missing: Vec<&str> = diags
        .iter()
        .filter(|d| !d.ok)
        .map(|d| d.tool.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(anyhow!("unusable tools: {}", missing.join(", ")));
    }
    Ok(())
}

fn pages(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(cfg, input)?;
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let scratch = Path::new(&cfg.paths.work_dir).join("pages");
    let renderer = PopplerRenderer::new(&cfg.render, &scratch, cfg.debug.keep_scratch);
    let doc = renderer
        .load(&bytes)
        .with_context(|| format!("loading {}", input.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "input": input,
            "file_bytes": bytes.len(),
            "page_count": doc.page_count(),
        }))?
    );
    Ok(())
}

fn run(args: &Args, cfg: &Config, input: &Path, out_override: Option<&Path>) -> Result<()> {
    validate_input(cfg, input)?;

    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let cfg_hash = sha256_hex(cfg.normalized_for_hash().as_bytes());
    let input_hash = sha256_hex(&bytes);
    let job_id = sha256_hex(format!("{}:{}", cfg_hash, input_hash).as_bytes());

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    let job_dir = out_root.join(&job_id);

    if job_dir.exists() && !cfg.global.overwrite {
        return Err(anyhow!(
            "job_dir already exists and overwrite=false: {}",
            job_dir.display()
        ));
    }

    ensure_dir(&job_dir.join("final"))?;
    ensure_dir(&job_dir.join("logs"))?;

    let log_path = resolve_log_path(cfg, &job_dir);
    let _guard = init_logging(args, cfg, log_path.as_deref())?;

    info!("job_id={job_id} out={}", job_dir.display());

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(job_dir.join("effective-config.toml"), raw)?;
    }

    let scratch = Path::new(&cfg.paths.work_dir).join(&job_id);
    let pipeline = Arc::new(build_pipeline(cfg, &scratch));
    let settings = pipeline.settings().clone();

    let started = now_rfc3339();
    let mut watchdog = Watchdog::new(
        (cfg.limits.job_timeout_seconds > 0)
            .then(|| Duration::from_secs(cfg.limits.job_timeout_seconds)),
        Instant::now(),
    );

    let file_bytes = bytes.len() as u64;
    let handle = pipeline.spawn(bytes);
    let mut line = ProgressLine::new(cfg.global.show_progress);

    pump_events(handle.events(), &mut watchdog, &handle.cancel_token(), &mut line);
    let timed_out = watchdog.tripped();

    let outcome = handle.wait();

    if !cfg.debug.keep_scratch && scratch.exists() {
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            warn!("removing scratch dir {}: {e}", scratch.display());
        }
    }

    let result = match outcome {
        Ok(r) => r,
        Err(e) if e.is_cancelled() && timed_out => {
            return Err(anyhow::Error::new(e).context(format!(
                "job timeout exceeded: {}s",
                cfg.limits.job_timeout_seconds
            )));
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("OCR failed: {}", input.display()))),
    };

    let text_name = output_text_name(input, &cfg.output.text_suffix);

    if cfg.output.write_text {
        std::fs::write(job_dir.join("final").join(&text_name), &result.text)?;
    }

    if cfg.output.write_report_json {
        let report = RunReport {
            job_name: cfg.global.job_name.clone(),
            input: InputInfo {
                path: input.display().to_string(),
                file_bytes,
                sha256: input_hash,
            },
            settings,
            num_pages: result.num_pages,
            total_chars: result.text.chars().count(),
            started: started.clone(),
            finished: now_rfc3339(),
            pages: result.pages.clone(),
        };
        std::fs::write(
            job_dir.join("final").join(&cfg.output.report_filename),
            serde_json::to_string_pretty(&report)?,
        )?;
    }

    if cfg.output.write_index_json {
        let index = index_json(cfg, &job_id, &started, result.num_pages, &text_name);
        std::fs::write(job_dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": job_id,
                "job_dir": job_dir,
                "num_pages": result.num_pages,
                "text": job_dir.join("final").join(&text_name),
                "status": "ok"
            }))?
        );
    }

    Ok(())
}

fn index_json(
    cfg: &Config,
    job_id: &str,
    started: &str,
    num_pages: u32,
    text_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "job_name": cfg.global.job_name,
        "job_id": job_id,
        "started": started,
        "finished": now_rfc3339(),
        "num_pages": num_pages,
        "final_text": format!("final/{text_name}"),
        "report": format!("final/{}", cfg.output.report_filename),
    })
}

/// Trips once when a run outlives the job timeout.
struct Watchdog {
    limit: Option<Duration>,
    started: Instant,
    tripped: bool,
}

impl Watchdog {
    fn new(limit: Option<Duration>, started: Instant) -> Self {
        Self {
            limit,
            started,
            tripped: false,
        }
    }

    /// True exactly once: on the first call after the limit has passed.
    fn check(&mut self) -> bool {
        match self.limit {
            Some(limit) if !self.tripped && self.started.elapsed() >= limit => {
                self.tripped = true;
                true
            }
            _ => false,
        }
    }

    fn tripped(&self) -> bool {
        self.tripped
    }
}

/// Drain run events until the worker hangs up.
///
/// The watchdog is consulted on every iteration, so a run that keeps
/// emitting events is still cancelled once it exceeds the job timeout.
fn pump_events(
    events: &Receiver<ProgressEvent>,
    watchdog: &mut Watchdog,
    cancel: &CancelToken,
    line: &mut ProgressLine,
) {
    loop {
        let next = events.recv_timeout(Duration::from_millis(200));
        if watchdog.check() {
            warn!("job timeout exceeded ({:?}); cancelling", watchdog.limit);
            cancel.cancel();
        }
        match next {
            Ok(ev) => {
                log_event(&ev);
                line.draw(&ev);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    line.finish();
}

fn log_event(ev: &ProgressEvent) {
    match ev.status {
        Status::Recognizing => debug!("{:>5.1}% {}", ev.progress, ev.message),
        Status::Error | Status::Cancelled => warn!("{:>5.1}% {}", ev.progress, ev.message),
        _ => info!("{:>5.1}% {}", ev.progress, ev.message),
    }
}

/// Single-line progress indicator redrawn in place on stderr.
struct ProgressLine {
    enabled: bool,
    drawn: bool,
}

impl ProgressLine {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            drawn: false,
        }
    }

    fn draw(&mut self, ev: &ProgressEvent) {
        if !self.enabled {
            return;
        }
        let mut err = std::io::stderr().lock();
        let _ = write!(err, "\r\x1b[2K[{:>5.1}%] {}", ev.progress, ev.message);
        let _ = err.flush();
        drop(err);
        self.drawn = true;
        if ev.status.is_terminal() {
            self.finish();
        }
    }

    fn finish(&mut self) {
        if self.drawn {
            eprintln!();
            self.drawn = false;
        }
    }
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    let meta = std::fs::metadata(input)
        .with_context(|| format!("input does not exist: {}", input.display()))?;
    if !meta.is_file() {
        return Err(anyhow!("input is not a file: {}", input.display()));
    }
    if meta.len() > cfg.limits.max_input_file_bytes {
        return Err(anyhow!(
            "input exceeds max_input_file_bytes: {} > {}",
            meta.len(),
            cfg.limits.max_input_file_bytes
        ));
    }

    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn resolve_log_path(cfg: &Config, job_dir: &Path) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }

    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }

    Some(job_dir.join("logs").join("pdf-ocr.log"))
}
