//! Page-level optimization.
//!
//! [`optimize_html`] finds every `<img>` tag in a rendered page, runs the
//! per-node pipeline on it and writes the tag back with its attributes in
//! their original order. Tags the pipeline leaves alone are copied through
//! byte for byte. With `css.enabled`, `url(...)` references in the page
//! (inline styles and `<style>` blocks) are rewritten as well; see
//! [`optimize_css_urls`] for stylesheets.
//!
//! Tags are matched with a regex rather than a DOM parser. The engine only
//! ever touches `<img>` attributes, so the rest of the document never has
//! to be understood.

use crate::cache::{CacheError, CacheStats};
use crate::config::EngineConfig;
use crate::imaging::ImageBackend;
use crate::process::{ImageOptimizer, NodeOutcome, NodeReport};
use crate::remote::{Fetcher, absolute_source_url};
use crate::resolve::{SUPPORTED_EXTENSIONS, extension_of, strip_query};
use crate::types::{ImageNode, PreloadHint, RequestContext};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

/// Attribute marking an image managed by a lazy loader.
pub const LAZY_MARKER_ATTR: &str = "data-lazyload";

fn regex(pattern: &'static str, desc: &'static str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid {desc} regex: {err}"))
}

/// Quoted attribute values are consumed whole, so a `>` inside one does not
/// end the tag.
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r#"(?is)<img\b((?:=\s*"[^"]*"|=\s*'[^']*'|[^>])*?)(/?)>"#,
        "img tag",
    )
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r#"([^\s"'=<>/]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#,
        "attribute",
    )
});

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    regex(
        r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^"')]*?))\s*\)"#,
        "css url",
    )
});

#[derive(Error, Debug)]
pub enum PageError {
    #[error("cache unavailable, page left untouched: {0}")]
    Cache(#[from] CacheError),
}

/// Why a whole page was passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSkip {
    Disabled,
    /// Bot-only mode and the request is not from a crawler.
    NotBot,
    ExcludedPage(String),
    /// The cache directory could not be created.
    CacheUnavailable(String),
}

#[derive(Debug, Default)]
pub struct PageReport {
    pub skipped: Option<PageSkip>,
    pub images: Vec<NodeReport>,
    pub backgrounds: Vec<NodeReport>,
}

impl PageReport {
    /// All transport hints, in document order.
    pub fn hints(&self) -> impl Iterator<Item = &PreloadHint> {
        self.images
            .iter()
            .chain(&self.backgrounds)
            .flat_map(|r| r.hints.iter())
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for report in self.images.iter().chain(&self.backgrounds) {
            report.record(&mut stats);
        }
        stats
    }
}

/// A rewritten document plus what happened to it.
#[derive(Debug)]
pub struct Page {
    pub html: String,
    pub report: PageReport,
}

/// One `<img>` tag, attributes in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImgTag {
    attrs: Vec<(String, Option<String>)>,
    self_closing: bool,
}

impl ImgTag {
    fn parse(attrs: &str, self_closing: bool) -> Self {
        let attrs = ATTRIBUTE
            .captures_iter(attrs)
            .map(|c| {
                let name = c[1].to_string();
                let value = c
                    .get(2)
                    .or_else(|| c.get(3))
                    .or_else(|| c.get(4))
                    .map(|m| m.as_str().to_string());
                (name, value)
            })
            .collect();
        Self {
            attrs,
            self_closing,
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    fn has(&self, name: &str) -> bool {
        self.attrs.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Replace in place, append when new, remove when `None`.
    fn set(&mut self, name: &str, value: Option<&str>) {
        let position = self
            .attrs
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name));
        match (position, value) {
            (Some(i), Some(v)) => self.attrs[i].1 = Some(v.to_string()),
            (None, Some(v)) => self.attrs.push((name.to_string(), Some(v.to_string()))),
            (Some(i), None) => {
                self.attrs.remove(i);
            }
            (None, None) => {}
        }
    }

    fn node(&self) -> ImageNode {
        let attr = |name: &str| self.get(name).map(str::to_string);
        ImageNode {
            src: attr("src"),
            alt_src: attr("data-src"),
            candidates: attr("srcset"),
            alt_candidates: attr("data-srcset"),
            sizes: attr("sizes"),
            width: attr("width"),
            height: attr("height"),
            class: attr("class"),
            lazy_marker: self.has(LAZY_MARKER_ATTR),
        }
    }

    /// Write back the attributes the pipeline may have changed.
    fn apply(&mut self, node: &ImageNode) {
        self.set("src", node.src.as_deref());
        self.set("data-src", node.alt_src.as_deref());
        self.set("srcset", node.candidates.as_deref());
        self.set("data-srcset", node.alt_candidates.as_deref());
        self.set("sizes", node.sizes.as_deref());
    }

    fn render(&self) -> String {
        let mut out = String::from("<img");
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            if let Some(value) = value {
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
        }
        out.push_str(if self.self_closing { " />" } else { ">" });
        out
    }
}

fn page_skip(config: &EngineConfig, ctx: &RequestContext) -> Option<PageSkip> {
    if !config.enabled {
        return Some(PageSkip::Disabled);
    }
    if config.bots.only_bots && !ctx.is_bot {
        return Some(PageSkip::NotBot);
    }
    let page = ctx.page_url.as_deref()?.to_lowercase();
    config
        .exclude
        .pages
        .iter()
        .find(|p| !p.is_empty() && page.contains(&p.to_lowercase()))
        .map(|p| PageSkip::ExcludedPage(p.clone()))
}

/// Optimize every image of one rendered page.
///
/// Fails only when the cache directory cannot be created; the caller then
/// serves the page unchanged.
pub fn optimize_html<B: ImageBackend, F: Fetcher>(
    optimizer: &ImageOptimizer<'_, B, F>,
    html: &str,
    ctx: &RequestContext,
) -> Result<Page, PageError> {
    let config = optimizer.config();
    if let Some(skip) = page_skip(config, ctx) {
        debug!(page = ?ctx.page_url, ?skip, "page skipped");
        return Ok(Page {
            html: html.to_string(),
            report: PageReport {
                skipped: Some(skip),
                ..PageReport::default()
            },
        });
    }
    optimizer.prepare()?;

    let mut report = PageReport::default();
    let rewritten = IMG_TAG.replace_all(html, |caps: &Captures| {
        let mut tag = ImgTag::parse(&caps[1], !caps[2].is_empty());
        let original = tag.node();
        let mut node = original.clone();
        let node_report = optimizer.process_node(&mut node, ctx);
        report.images.push(node_report);

        if node == original {
            return caps[0].to_string();
        }
        tag.apply(&node);
        tag.render()
    });

    let html = if config.css.enabled {
        let (css, backgrounds) = rewrite_css_urls(optimizer, &rewritten, ctx);
        report.backgrounds = backgrounds;
        css
    } else {
        rewritten.into_owned()
    };

    Ok(Page { html, report })
}

/// [`optimize_html`], degrading to the unchanged page when the cache is
/// unavailable. The failure is logged and recorded as the page skip.
pub fn optimize_or_passthrough<B: ImageBackend, F: Fetcher>(
    optimizer: &ImageOptimizer<'_, B, F>,
    html: &str,
    ctx: &RequestContext,
) -> Page {
    optimize_html(optimizer, html, ctx).unwrap_or_else(|e| {
        error!(page = ?ctx.page_url, "{e}");
        Page {
            html: html.to_string(),
            report: PageReport {
                skipped: Some(PageSkip::CacheUnavailable(e.to_string())),
                ..PageReport::default()
            },
        }
    })
}

/// Rewrite image `url(...)` references of a stylesheet.
///
/// Each eligible reference is processed as a single image without variants
/// and replaced by the absolute URL of its artifact. Anything that does not
/// produce an artifact is left exactly as written.
pub fn optimize_css_urls<B: ImageBackend, F: Fetcher>(
    optimizer: &ImageOptimizer<'_, B, F>,
    css: &str,
    ctx: &RequestContext,
) -> Result<(String, Vec<NodeReport>), PageError> {
    if let Some(skip) = page_skip(optimizer.config(), ctx) {
        debug!(?skip, "stylesheet skipped");
        return Ok((css.to_string(), Vec::new()));
    }
    optimizer.prepare()?;
    Ok(rewrite_css_urls(optimizer, css, ctx))
}

fn rewrite_css_urls<B: ImageBackend, F: Fetcher>(
    optimizer: &ImageOptimizer<'_, B, F>,
    css: &str,
    ctx: &RequestContext,
) -> (String, Vec<NodeReport>) {
    let config = optimizer.config();
    let mut reports = Vec::new();

    let rewritten = CSS_URL.replace_all(css, |caps: &Captures| {
        let (raw, quote) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(m), _, _) => (m.as_str(), '"'),
            (_, Some(m), _) => (m.as_str(), '\''),
            (_, _, Some(m)) => (m.as_str(), '\''),
            _ => return caps[0].to_string(),
        };
        let Some(src) = css_reference(raw.trim(), config) else {
            return caps[0].to_string();
        };

        let mut node = ImageNode::with_src(src.as_str());
        let report = optimizer.process_single(&mut node, ctx);
        let artifact = match &report.outcome {
            NodeOutcome::Rewritten { url, .. } => Some(url.clone()),
            _ => None,
        };
        reports.push(report);

        match artifact {
            Some(url) => {
                let absolute = absolute_source_url(&url, &config.site);
                format!("url({quote}{absolute}{quote})")
            }
            None => caps[0].to_string(),
        }
    });

    (rewritten.into_owned(), reports)
}

/// Normalize a CSS reference to a root-relative path, or `None` when it is
/// not an eligible local raster image.
fn css_reference(raw: &str, config: &EngineConfig) -> Option<String> {
    if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
        return None;
    }

    let path = if raw.starts_with("//") || raw.contains("://") {
        let root = Url::parse(&config.site.root_url).ok()?;
        let absolute = if raw.starts_with("//") {
            format!("{}:{raw}", root.scheme())
        } else {
            raw.to_string()
        };
        let url = Url::parse(&absolute).ok()?;
        let local = url
            .host_str()
            .zip(root.host_str())
            .is_some_and(|(a, b)| a.eq_ignore_ascii_case(b))
            && url.port_or_known_default() == root.port_or_known_default();
        if !local {
            return None;
        }
        url.path().to_string()
    } else {
        raw.to_string()
    };

    let extension = extension_of(strip_query(&path))?;
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str())
        || (extension == "gif" && !config.formats.gif)
    {
        return None;
    }

    let trimmed = path.trim_matches(|c| c == '/' || c == '\\').replace("../", "");
    Some(format!("/{trimmed}"))
}
