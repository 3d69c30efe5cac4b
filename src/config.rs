//! Engine configuration.
//!
//! Handles loading, validating, and merging `light-images.toml`. User files
//! are sparse: they are merged on top of the stock defaults, so a file only
//! needs the keys it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! enabled = true
//! quality = 70              # Encoding quality (0-100)
//!
//! [site]
//! root_dir = "."            # Document root on disk
//! root_url = "http://localhost/"
//! base_path = ""            # URL path the site is mounted under
//!
//! [cache]
//! dir = "cache/light-images"   # Relative paths resolve against site.root_dir
//! url = "/cache/light-images"
//! naming = "full"              # full | partial | none
//!
//! [processing]
//! min_width = 50            # Skip primary images narrower than this
//! max_processes = 4         # CLI workers (omit for auto = CPU cores)
//!
//! [resize]
//! enabled = false
//! factor = 60               # Percent of the working dimensions
//! min_width = 50
//!
//! [formats]
//! gif = false               # Animation is not preserved
//! webp = false
//! avif = false
//! exclude_safari = true
//!
//! [exclude]
//! paths = []                # Substrings of the decoded image path
//! classes = []              # Substrings of the class attribute
//! extensions = []
//! pages = []                # Substrings of the page URL
//!
//! [variants]
//! enabled = false
//! start_quality = 90
//! quality_step = 15
//! start_resize = 100
//! resize_step = 20
//! primary_label = "4x"      # 4x | 3x | 2x | 1x | none
//!
//! [lazy_load]
//! detect_placeholder = true
//! process_data_src = false
//!
//! [remote]
//! enabled = false
//! endpoint = "http://api.resmush.it/ws.php"
//! timeout_secs = 5
//!
//! [bots]
//! only_bots = false
//!
//! [css]
//! enabled = false
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::naming::NamingPolicy;
use crate::types::VariantLabel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name looked up by [`load_config`].
pub const CONFIG_FILENAME: &str = "light-images.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `light-images.toml`.
///
/// All fields have defaults. The value is immutable once built and is
/// passed by reference into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Master switch.
    pub enabled: bool,
    /// Encoding quality for primary images (0-100).
    pub quality: u32,
    pub site: SiteConfig,
    pub cache: CacheConfig,
    pub processing: ProcessingConfig,
    pub resize: ResizeConfig,
    pub formats: FormatsConfig,
    pub exclude: ExcludeConfig,
    pub variants: VariantsConfig,
    pub lazy_load: LazyLoadConfig,
    pub remote: RemoteConfig,
    pub bots: BotsConfig,
    pub css: CssConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quality: 70,
            site: SiteConfig::default(),
            cache: CacheConfig::default(),
            processing: ProcessingConfig::default(),
            resize: ResizeConfig::default(),
            formats: FormatsConfig::default(),
            exclude: ExcludeConfig::default(),
            variants: VariantsConfig::default(),
            lazy_load: LazyLoadConfig::default(),
            remote: RemoteConfig::default(),
            bots: BotsConfig::default(),
            css: CssConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality > 100 {
            return Err(ConfigError::Validation("quality must be 0-100".into()));
        }
        if !(1..=100).contains(&self.resize.factor) {
            return Err(ConfigError::Validation(
                "resize.factor must be 1-100".into(),
            ));
        }
        if self.variants.start_quality > 100 {
            return Err(ConfigError::Validation(
                "variants.start_quality must be 0-100".into(),
            ));
        }
        if !(1..=100).contains(&self.variants.start_resize) {
            return Err(ConfigError::Validation(
                "variants.start_resize must be 1-100".into(),
            ));
        }
        if self.variants.quality_step == 0 || self.variants.resize_step == 0 {
            return Err(ConfigError::Validation(
                "variants.quality_step and variants.resize_step must be non-zero".into(),
            ));
        }
        if self.variants.primary_label != "none"
            && VariantLabel::parse(&self.variants.primary_label).is_none()
        {
            return Err(ConfigError::Validation(format!(
                "variants.primary_label must be one of 4x, 3x, 2x, 1x, none (got {:?})",
                self.variants.primary_label
            )));
        }
        if url::Url::parse(&self.site.root_url).is_err() {
            return Err(ConfigError::Validation(format!(
                "site.root_url is not an absolute URL: {}",
                self.site.root_url
            )));
        }
        if self.remote.enabled && url::Url::parse(&self.remote.endpoint).is_err() {
            return Err(ConfigError::Validation(format!(
                "remote.endpoint is not an absolute URL: {}",
                self.remote.endpoint
            )));
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Cache directory on disk; relative paths hang off the site root.
    pub fn cache_dir(&self) -> PathBuf {
        if self.cache.dir.is_absolute() {
            self.cache.dir.clone()
        } else {
            self.site.root_dir.join(&self.cache.dir)
        }
    }

    /// Public URL prefix of the cache directory, without trailing slash.
    pub fn cache_url(&self) -> &str {
        self.cache.url.trim_end_matches('/')
    }

    /// Whether a resize factor applies at all. Variant sets always resize.
    pub fn resize_active(&self) -> bool {
        self.resize.enabled || self.variants.enabled
    }
}

/// Where the site lives on disk and on the web.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Document root on disk.
    pub root_dir: PathBuf,
    /// Absolute URL of the site root, e.g. `https://example.com/`.
    pub root_url: String,
    /// URL path prefix the site is mounted under, e.g. `/blog`.
    pub base_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            root_url: "http://localhost/".to_string(),
            base_path: String::new(),
        }
    }
}

impl SiteConfig {
    /// `scheme://host[:port]` of the root URL, without trailing slash.
    pub fn origin(&self) -> String {
        match url::Url::parse(&self.root_url) {
            Ok(u) => u.origin().ascii_serialization(),
            Err(_) => self.root_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub url: String,
    pub naming: NamingPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache/light-images"),
            url: "/cache/light-images".to_string(),
            naming: NamingPolicy::Full,
        }
    }
}

/// Processing thresholds and CLI parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Primary images narrower than this are left alone.
    pub min_width: u32,
    /// Maximum number of files the CLI processes in parallel.
    /// When absent, defaults to the number of CPU cores.
    pub max_processes: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_width: 50,
            max_processes: None,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Resize-by-factor policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResizeConfig {
    pub enabled: bool,
    /// Percent of the working dimensions.
    pub factor: u32,
    /// Images narrower than this are not resized (variants excepted).
    pub min_width: u32,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            factor: 60,
            min_width: 50,
        }
    }
}

/// Output format switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FormatsConfig {
    /// Accept GIF sources (re-encoded as PNG; animation is lost).
    pub gif: bool,
    pub webp: bool,
    pub avif: bool,
    /// Keep Safari on the default formats.
    pub exclude_safari: bool,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            gif: false,
            webp: false,
            avif: false,
            exclude_safari: true,
        }
    }
}

/// Exclusion lists. All matches are plain substring matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExcludeConfig {
    pub paths: Vec<String>,
    pub classes: Vec<String>,
    pub extensions: Vec<String>,
    pub pages: Vec<String>,
}

/// Responsive variant cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VariantsConfig {
    pub enabled: bool,
    pub start_quality: u32,
    pub quality_step: u32,
    pub start_resize: u32,
    pub resize_step: u32,
    /// Variant label written to `src`, or `"none"` to keep the original.
    pub primary_label: String,
}

impl Default for VariantsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_quality: 90,
            quality_step: 15,
            start_resize: 100,
            resize_step: 20,
            primary_label: "4x".to_string(),
        }
    }
}

impl VariantsConfig {
    /// `None` when the original reference stays as `src`.
    pub fn primary_label(&self) -> Option<VariantLabel> {
        VariantLabel::parse(&self.primary_label)
    }
}

/// Lazy-load placeholder handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LazyLoadConfig {
    /// Treat inline SVG `src` plus a `data-src` as a lazy placeholder.
    pub detect_placeholder: bool,
    /// Also rewrite `data-src`, and accept `src="#"` placeholders.
    pub process_data_src: bool,
}

impl Default for LazyLoadConfig {
    fn default() -> Self {
        Self {
            detect_placeholder: true,
            process_data_src: false,
        }
    }
}

/// Remote compression service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Use the service instead of local transcoding.
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://api.resmush.it/ws.php".to_string(),
            timeout_secs: 5,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Crawler gating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotsConfig {
    /// Only optimize pages served to crawlers.
    pub only_bots: bool,
}

/// CSS `url()` background rewriting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CssConfig {
    pub enabled: bool,
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(EngineConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EngineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file, falling back to stock defaults when the
/// file is absent.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Parse a config from a TOML string, merged over the stock defaults.
pub fn parse_config(content: &str) -> Result<EngineConfig, ConfigError> {
    let overlay: toml::Value = toml::from_str(content)?;
    resolve_config(stock_defaults_value()?, Some(overlay))
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# light-images configuration
# ==========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Master switch.
enabled = true

# Encoding quality for primary images (0 = worst, 100 = best).
quality = 70

# ---------------------------------------------------------------------------
# Site layout
# ---------------------------------------------------------------------------
[site]
# Document root on disk. Image references resolve against it.
root_dir = "."
# Absolute URL of the site root. Images on other hosts are never touched.
root_url = "http://localhost/"
# URL path the site is mounted under (e.g. "/blog").
base_path = ""

# ---------------------------------------------------------------------------
# Artifact cache
# ---------------------------------------------------------------------------
[cache]
# Directory holding generated artifacts (relative to site.root_dir).
dir = "cache/light-images"
# Public URL of that directory.
url = "/cache/light-images"
# Artifact file names:
#   full    - SHA-1 of the reference
#   partial - original name + SHA-1
#   none    - original name only (last writer wins)
naming = "full"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Primary images narrower than this (in pixels) are left alone.
min_width = 50
# Maximum files processed in parallel by the CLI.
# Omit to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Resizing
# ---------------------------------------------------------------------------
[resize]
enabled = false
# Percent of the working dimensions.
factor = 60
# Images narrower than this are not resized.
min_width = 50

# ---------------------------------------------------------------------------
# Output formats
# ---------------------------------------------------------------------------
[formats]
# Accept GIF sources. They are re-encoded as PNG; animation is lost.
gif = false
# Convert everything to WebP / AVIF where the client supports it.
# AVIF wins when both are enabled.
webp = false
avif = false
# Keep Safari on JPEG/PNG.
exclude_safari = true

# ---------------------------------------------------------------------------
# Exclusions (substring matches)
# ---------------------------------------------------------------------------
[exclude]
paths = []
classes = []
extensions = []
# Pages whose URL contains any of these are left untouched.
pages = []

# ---------------------------------------------------------------------------
# Responsive variants (srcset 4x, 3x, 2x, 1x)
# ---------------------------------------------------------------------------
[variants]
enabled = false
start_quality = 90
quality_step = 15
start_resize = 100
resize_step = 20
# Variant written to src, or "none" to keep the original image as src.
primary_label = "4x"

# ---------------------------------------------------------------------------
# Lazy loading
# ---------------------------------------------------------------------------
[lazy_load]
# Inline SVG src + data-src is treated as a lazy placeholder.
detect_placeholder = true
# Also rewrite data-src, and accept src="#" placeholders.
process_data_src = false

# ---------------------------------------------------------------------------
# Remote compression service
# ---------------------------------------------------------------------------
[remote]
enabled = false
endpoint = "http://api.resmush.it/ws.php"
timeout_secs = 5

# ---------------------------------------------------------------------------
# Crawlers
# ---------------------------------------------------------------------------
[bots]
# Only optimize pages served to crawlers.
only_bots = false

# ---------------------------------------------------------------------------
# CSS backgrounds
# ---------------------------------------------------------------------------
[css]
# Rewrite url(...) image references found in pages and stylesheets.
enabled = false
"##
}
