use clap::{Parser, Subcommand};
use light_images::cache::CacheStats;
use light_images::config::{self, CONFIG_FILENAME, EngineConfig};
use light_images::html::{self, Page};
use light_images::imaging::RustBackend;
use light_images::output;
use light_images::process::ImageOptimizer;
use light_images::types::{Browser, ImageNode, PreloadHint, RequestContext};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request facts the host application would normally supply.
#[derive(clap::Args, Clone)]
struct RequestArgs {
    /// Browser family of the simulated request
    #[arg(long, value_enum, default_value = "other")]
    browser: Browser,

    /// Treat the request as coming from a crawler
    #[arg(long)]
    bot: bool,

    /// URL of the page being rendered (defaults to the file's site path)
    #[arg(long)]
    page_url: Option<String>,
}

impl RequestArgs {
    fn context(&self, page_url: Option<String>) -> RequestContext {
        RequestContext {
            browser: self.browser,
            is_bot: self.bot,
            page_url: self.page_url.clone().or(page_url),
        }
    }
}

#[derive(Parser)]
#[command(name = "light-images")]
#[command(about = "Rewrite page images to optimized, cached artifacts")]
#[command(long_about = "\
Rewrite page images to optimized, cached artifacts

Every <img> reference (and, optionally, every CSS url() background) that
points at a local JPEG, PNG or GIF is replaced by a re-encoded artifact in
the cache directory. Artifacts are reused while they are newer than their
source, and a source that cannot be made smaller is remembered with an
empty marker file so it is never reprocessed until it changes.

Cache layout:

  cache/light-images/
  ├── 3f0c…e1.webp           # artifact (name = cache key)
  ├── 9a41…07.jpg            # zero bytes: source cannot be improved
  └── hero_4x.webp           # responsive variant (naming = \"none\")

Run 'light-images gen-config' to generate a documented light-images.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (stock defaults apply when it does not exist)
    #[arg(long, short, default_value = CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize the images of HTML files or directories of HTML files
    Rewrite {
        /// Files or directories (searched for .html and .htm)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Overwrite each file instead of printing the result
        #[arg(long)]
        in_place: bool,

        /// Write every transport hint as JSON to this file
        #[arg(long)]
        hints: Option<PathBuf>,

        #[command(flatten)]
        request: RequestArgs,
    },
    /// Optimize the url() backgrounds of a stylesheet
    Css {
        file: PathBuf,

        /// Overwrite the file instead of printing the result
        #[arg(long)]
        in_place: bool,

        #[command(flatten)]
        request: RequestArgs,
    },
    /// Show what would happen to image references, without producing anything
    Check {
        #[arg(required = true)]
        sources: Vec<String>,

        #[command(flatten)]
        request: RequestArgs,
    },
    /// Print a stock light-images.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("light_images=warn"),
        1 => EnvFilter::new("light_images=info"),
        _ => EnvFilter::new("light_images=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Rewrite {
            paths,
            in_place,
            hints,
            request,
        } => {
            let config = load(&cli.config)?;
            rewrite(&config, &paths, in_place, hints.as_deref(), &request)?;
        }
        Command::Css {
            file,
            in_place,
            request,
        } => {
            let config = load(&cli.config)?;
            let backend = RustBackend::new();
            let optimizer = ImageOptimizer::new(&config, &backend);
            let css = std::fs::read_to_string(&file)?;
            let (rewritten, reports) =
                match html::optimize_css_urls(&optimizer, &css, &request.context(None)) {
                    Ok(done) => done,
                    Err(e) => {
                        error!(file = %file.display(), "{e}");
                        (css.clone(), Vec::new())
                    }
                };
            let lines = output::format_css_report(&file.display().to_string(), &reports);
            if in_place {
                std::fs::write(&file, rewritten)?;
                lines.iter().for_each(|l| println!("{l}"));
            } else {
                lines.iter().for_each(|l| eprintln!("{l}"));
                print!("{rewritten}");
            }
        }
        Command::Check { sources, request } => {
            let config = load(&cli.config)?;
            let backend = RustBackend::new();
            let optimizer = ImageOptimizer::new(&config, &backend);
            let ctx = request.context(None);
            for src in &sources {
                let result = optimizer.check(&ImageNode::with_src(src.as_str()), &ctx);
                output::print_check(src, &result);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<EngineConfig, config::ConfigError> {
    let config = config::load_config(path)?;
    debug!(path = %path.display(), exists = path.exists(), "configuration loaded");
    Ok(config)
}

/// Optimize a set of pages in parallel. Reports go to stdout when files are
/// rewritten in place; otherwise the page itself takes stdout.
fn rewrite(
    config: &EngineConfig,
    paths: &[PathBuf],
    in_place: bool,
    hints: Option<&Path>,
    request: &RequestArgs,
) -> Result<(), BoxError> {
    let files = collect_html_files(paths)?;
    if files.len() > 1 && !in_place {
        return Err("several files given; use --in-place to rewrite them".into());
    }
    init_thread_pool(&config.processing);
    info!(files = files.len(), "rewriting pages");

    let backend = RustBackend::new();
    let optimizer = ImageOptimizer::new(config, &backend);
    let results: Vec<(PathBuf, Result<Page, BoxError>)> = files
        .into_par_iter()
        .map(|file| {
            let ctx = request.context(site_path(config, &file));
            let result = rewrite_file(&optimizer, &file, &ctx, in_place);
            (file, result)
        })
        .collect();

    let mut stats = CacheStats::default();
    let mut all_hints: Vec<&PreloadHint> = Vec::new();
    let mut pages = 0;
    for (file, result) in &results {
        let page = match result {
            Ok(page) => page,
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                continue;
            }
        };
        pages += 1;
        let lines = output::format_page_report(&file.display().to_string(), &page.report);
        if in_place {
            lines.iter().for_each(|l| println!("{l}"));
        } else {
            lines.iter().for_each(|l| eprintln!("{l}"));
            print!("{}", page.html);
        }
        stats.merge(&page.report.stats());
        all_hints.extend(page.report.hints());
    }

    if let Some(path) = hints {
        std::fs::write(path, serde_json::to_string_pretty(&all_hints)?)?;
    }
    let summary = output::format_summary(pages, &stats);
    if in_place {
        println!("{summary}");
    } else {
        eprintln!("{summary}");
    }
    Ok(())
}

/// Read, optimize and (optionally) write back one page.
fn rewrite_file(
    optimizer: &ImageOptimizer<'_, RustBackend>,
    file: &Path,
    ctx: &RequestContext,
    in_place: bool,
) -> Result<Page, BoxError> {
    let source = std::fs::read_to_string(file)?;
    let page = html::optimize_or_passthrough(optimizer, &source, ctx);
    if in_place && page.html != source {
        std::fs::write(file, &page.html)?;
    }
    Ok(page)
}

/// Expand directories into their HTML files, sorted for stable output.
fn collect_html_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, BoxError> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_html(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false)
}

/// The URL path a page file is served under, relative to the site root.
fn site_path(config: &EngineConfig, file: &Path) -> Option<String> {
    let root = config.site.root_dir.canonicalize().ok()?;
    let file = file.canonicalize().ok()?;
    let rel = file.strip_prefix(&root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("{}/{}", config.site.base_path.trim_end_matches('/'), parts.join("/")))
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
