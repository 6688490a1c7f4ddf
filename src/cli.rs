//! CLI parsing and orchestration. Acquire -> Convert -> Deliver -> Cleanup. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::convert::{
    convert, ConvertError, ConvertOptions, ExternalConverter, OutputFormat, DEFAULT_CONVERTER,
};
use crate::delivery::{send_to_kindle, DeliveryError, EmailConfig};
use crate::model::ConversionOutcome;
use crate::source::substack::ensure_article_url;
use crate::source::{
    check_body, AcquireError, ContentSource, DocumentOptions, EmptyBodyBehavior, HttpClient,
    LocalDocument, RemoteArticle,
};
use clap::{ArgGroup, Parser};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Acquire(#[from] AcquireError),

    #[error("{0}")]
    Convert(#[from] ConvertError),

    #[error("{0}")]
    Delivery(#[from] DeliveryError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Acquire(
                AcquireError::InvalidUrl { .. }
                | AcquireError::NotSubstack { .. }
                | AcquireError::FileNotFound { .. }
                | AcquireError::NotAFile { .. }
                | AcquireError::UnsupportedExtension { .. },
            ) => 1,
            CliRunError::Convert(ConvertError::UnsupportedFormat { .. }) => 1,
            CliRunError::Acquire(_) => 2,
            CliRunError::Convert(_) => 3,
            CliRunError::Delivery(_) => 4,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "substack2kindle")]
#[command(about = "Convert a Substack article or a PDF into an e-book and email it to your Kindle")]
#[command(
    after_help = "Email settings come from EMAIL_FROM, EMAIL_TO, EMAIL_PASSWORD, SMTP_HOST and SMTP_PORT (a .env file is read if present). SMTP_HOST has no default; SMTP_PORT defaults to 587, and port 465 uses implicit TLS. Config file keys (format, user_agent, timeout_secs, converter, skip_converter, empty_body, smtp_host, smtp_port, email_from, email_to) are read from ./substack2kindle.toml or the user config directory. CLI flags override environment, which overrides config."
)]
#[command(group(ArgGroup::new("input").required(true).args(["url_arg", "url", "pdf"])))]
pub struct Args {
    /// Substack article URL.
    #[arg(value_name = "URL")]
    pub url_arg: Option<String>,

    /// Substack article URL (same as the positional argument).
    #[arg(long = "url", value_name = "URL")]
    pub url: Option<String>,

    /// Local PDF file to convert instead of an article.
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// Output format: epub (default), azw3, or mobi.
    #[arg(long)]
    pub format: Option<String>,

    /// Title for PDF input (default: file name).
    #[arg(long)]
    pub title: Option<String>,

    /// Author for PDF input (default: "PDF Conversion").
    #[arg(long)]
    pub author: Option<String>,

    /// Never use the external converter; build the file directly.
    #[arg(long)]
    pub skip_converter: bool,

    /// Attach the original PDF inside a directly built EPUB.
    #[arg(long)]
    pub include_pdf: bool,

    /// External converter program (default: ebook-convert).
    #[arg(long)]
    pub converter: Option<String>,

    /// Accept article URLs from hosts other than *.substack.com (custom domains).
    #[arg(long)]
    pub any_host: bool,

    /// What to do when no article body is found: warn (default), placeholder, or fail.
    #[arg(long, value_parser = parse_empty_body)]
    pub empty_body: Option<EmptyBodyBehavior>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds (overrides config; default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Convert but do not send; copy the result into --output-dir.
    #[arg(long)]
    pub dry_run: bool,

    /// Where --dry-run puts the converted file.
    #[arg(long, default_value = ".", requires = "dry_run")]
    pub output_dir: PathBuf,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,
}

/// What the user asked to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Article(String),
    Document(PathBuf),
}

impl Args {
    fn input(&self) -> Result<Input, CliRunError> {
        match (&self.url_arg, &self.url, &self.pdf) {
            (Some(u), None, None) | (None, Some(u), None) => Ok(Input::Article(u.trim().to_string())),
            (None, None, Some(p)) => Ok(Input::Document(p.clone())),
            (None, None, None) => Err(CliRunError::InvalidInput(
                "Provide a Substack URL or --pdf <file>.".to_string(),
            )),
            _ => Err(CliRunError::InvalidInput(
                "Provide either a Substack URL or --pdf <file>, not both.".to_string(),
            )),
        }
    }
}

fn parse_empty_body(s: &str) -> Result<EmptyBodyBehavior, String> {
    match s.to_lowercase().as_str() {
        "warn" => Ok(EmptyBodyBehavior::Warn),
        "placeholder" => Ok(EmptyBodyBehavior::Placeholder),
        "fail" => Ok(EmptyBodyBehavior::Fail),
        _ => Err(format!(
            "Invalid empty-body value: '{}'. Use warn, placeholder, or fail.",
            s
        )),
    }
}

/// CLI flag, then config file, then warn. An invalid config value is an error.
fn resolve_empty_body(
    flag: Option<EmptyBodyBehavior>,
    config: Option<&Config>,
) -> Result<EmptyBodyBehavior, CliRunError> {
    if let Some(behavior) = flag {
        return Ok(behavior);
    }
    match config.and_then(|c| c.empty_body.as_deref()) {
        Some(value) => parse_empty_body(value).map_err(CliRunError::InvalidInput),
        None => Ok(EmptyBodyBehavior::default()),
    }
}

/// CLI flag, then config file, then epub.
fn resolve_format(flag: Option<&str>, config: Option<&Config>) -> Result<OutputFormat, CliRunError> {
    let value = flag
        .or_else(|| config.and_then(|c| c.format.as_deref()))
        .unwrap_or("epub");
    value
        .parse::<OutputFormat>()
        .map_err(|e| CliRunError::InvalidInput(e.to_string()))
}

fn resolve_converter(args: &Args, config: Option<&Config>) -> Option<ExternalConverter> {
    let skip = args.skip_converter || config.and_then(|c| c.skip_converter).unwrap_or(false);
    if skip {
        tracing::debug!("External converter disabled");
        return None;
    }
    let requested = args
        .converter
        .clone()
        .or_else(|| config.and_then(|c| c.converter.clone()));
    let name = requested.as_deref().unwrap_or(DEFAULT_CONVERTER);
    let found = ExternalConverter::detect(name);
    if found.is_none() && requested.is_some() {
        tracing::warn!("Converter '{}' not found; building directly where possible", name);
    }
    found
}

/// Copy the converted file into `dir` and return the destination.
fn keep_copy(src: &Path, file_name: &str, dir: &Path) -> Result<PathBuf, ConvertError> {
    if !dir.is_dir() {
        return Err(ConvertError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "output directory does not exist",
            ),
        });
    }
    let dest = dir.join(file_name);
    std::fs::copy(src, &dest).map_err(|e| ConvertError::Io {
        path: dest.clone(),
        source: e,
    })?;
    Ok(dest)
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let input = args.input()?;
    if let Input::Article(url) = &input {
        ensure_article_url(url, args.any_host)?;
        if args.title.is_some() || args.author.is_some() || args.include_pdf {
            tracing::warn!("--title, --author and --include-pdf only apply to --pdf input; ignoring");
        }
    }

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let format = resolve_format(args.format.as_deref(), config.as_ref())?;
    let email = EmailConfig::resolve(|k| std::env::var(k).ok(), config.as_ref())
        .map_err(CliRunError::InvalidInput)?;
    tracing::debug!(?email, "Email settings");

    let empty_body = resolve_empty_body(args.empty_body, config.as_ref())?;
    let timeout_secs = args
        .timeout
        .or_else(|| config.as_ref().and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.user_agent.clone()));

    let mut builder = HttpClient::builder().timeout_secs(timeout_secs);
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let converter = resolve_converter(args, config.as_ref());

    // Acquire
    let mut source: Box<dyn ContentSource + '_> = match &input {
        Input::Article(url) => Box::new(RemoteArticle::new(url.as_str(), &client).allow_any_host(args.any_host)),
        Input::Document(path) => Box::new(LocalDocument::new(
            path.clone(),
            DocumentOptions {
                title: args.title.clone(),
                author: args.author.clone(),
                extract_text: converter.is_none() && format == OutputFormat::Epub,
            },
        )),
    };
    let kind = source.kind();
    let record = check_body(source.acquire()?, empty_body)?;
    tracing::info!(title = %record.title, author = %record.author, "Acquired");

    // Convert
    let work_dir = tempfile::Builder::new()
        .prefix("substack2kindle-")
        .tempdir()
        .map_err(ConvertError::TempDir)?;

    let progress_state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let progress_cb = |n: u32, total: u32| {
        if total == 0 {
            return;
        }
        let mut state = progress_state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            if let Ok(style) = indicatif::ProgressStyle::default_bar()
                .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
            {
                bar.set_style(
                    style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                        .progress_chars("█▉▊▋▌▍▎▏ "),
                );
            }
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("Downloading image {}/{}", n, total));
    };
    let progress: Option<&dyn Fn(u32, u32)> = if args.quiet { None } else { Some(&progress_cb) };

    let options = ConvertOptions {
        converter: converter.as_ref(),
        skip_converter: args.skip_converter,
        include_original: args.include_pdf,
        progress,
    };
    let result = convert(&record, kind, format, work_dir.path(), &client, &options);
    if let Some(pb) = progress_state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    let outcome = result?;
    if !outcome.images.is_empty() && !args.quiet {
        eprintln!(
            "Images: {} embedded, {} skipped",
            outcome.images.embedded_count(),
            outcome.images.failed_count()
        );
    }

    if args.dry_run {
        let dest = keep_copy(&outcome.path, &outcome.file_name(), &args.output_dir)?;
        if !args.quiet {
            eprintln!("Wrote {} (not sent)", dest.display());
        }
        return Ok(());
    }

    deliver(&outcome, &email, work_dir)?;
    if !args.quiet {
        eprintln!("Sent '{}' to {}", outcome.title, email.to);
    }
    Ok(())
}

/// Send the converted file, then clean up. Cleanup only follows a successful send;
/// on failure the scratch directory is kept so the file can be sent by hand.
fn deliver(
    outcome: &ConversionOutcome,
    email: &EmailConfig,
    work_dir: TempDir,
) -> Result<(), CliRunError> {
    if let Err(e) = send_to_kindle(outcome, email) {
        let kept = work_dir.keep();
        tracing::warn!(
            dir = %kept.display(),
            "Delivery failed; converted file kept at {}",
            outcome.path.display()
        );
        return Err(e.into());
    }

    if let Err(e) = std::fs::remove_file(&outcome.path) {
        tracing::warn!(path = %outcome.path.display(), "Failed to remove converted file: {}", e);
    }
    if let Err(e) = work_dir.close() {
        tracing::warn!("Failed to remove scratch directory: {}", e);
    }
    Ok(())
}
