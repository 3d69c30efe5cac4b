//! Image reference resolution.
//!
//! Turns the `src` of an image node into a canonical file inside the site
//! root, or explains why the node is not eligible. Every rejection is a
//! [`SkipReason`]: the node is left alone and processing moves on.
//!
//! Resolution order:
//!
//! 1. Lazy placeholder substitution (`data-src` replaces an inline SVG `src`)
//! 2. Query string stripped, percent-encoding decoded
//! 3. Excluded path and class substrings
//! 4. Absolute URLs must point at the site's own host
//! 5. Path joined onto the site root and canonicalized (must exist)
//! 6. Extension must be a supported raster type and not excluded

use crate::config::{EngineConfig, LazyLoadConfig, SiteConfig};
use crate::types::{ImageReference, ResolvedImage};
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Source extensions the decoder handles.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff"];

const SVG_PLACEHOLDER_PREFIX: &str = "data:image/svg+xml;base64";

/// Why a node was not processed. None of these are errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("no source attribute")]
    NoSource,
    #[error("inline data URI")]
    InlineData,
    #[error("path matches excluded pattern {0:?}")]
    ExcludedPath(String),
    #[error("class matches excluded pattern {0:?}")]
    ExcludedClass(String),
    #[error("hosted on another site ({0})")]
    ForeignHost(String),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("outside the site root: {}", .0.display())]
    OutsideRoot(PathBuf),
    #[error("unsupported extension {0:?}")]
    UnsupportedExtension(String),
    #[error("GIF support is disabled")]
    GifDisabled,
    #[error("extension {0:?} is excluded")]
    ExcludedExtension(String),
    #[error("{width}px wide, below the {min}px processing minimum")]
    BelowMinWidth { width: u32, min: u32 },
}

/// Resolve a captured reference against the site layout and exclusion policy.
pub fn resolve(
    reference: &ImageReference,
    config: &EngineConfig,
) -> Result<ResolvedImage, SkipReason> {
    let (raw, already_lazy) = select_source(reference, &config.lazy_load)?;
    let public_src = strip_query(&raw).to_string();
    let decoded = percent_decode_str(&public_src)
        .decode_utf8_lossy()
        .into_owned();

    if let Some(pattern) = config
        .exclude
        .paths
        .iter()
        .find(|p| !p.is_empty() && decoded.contains(p.as_str()))
    {
        return Err(SkipReason::ExcludedPath(pattern.clone()));
    }
    if let Some(pattern) = config
        .exclude
        .classes
        .iter()
        .find(|c| !c.is_empty() && reference.classes.contains(c.as_str()))
    {
        return Err(SkipReason::ExcludedClass(pattern.clone()));
    }

    let site_path = site_relative(&decoded, &config.site)?;
    let candidate = config.site.root_dir.join(site_path.trim_start_matches('/'));
    let path = candidate
        .canonicalize()
        .map_err(|_| SkipReason::NotFound(candidate.clone()))?;
    let root = config
        .site
        .root_dir
        .canonicalize()
        .map_err(|_| SkipReason::NotFound(config.site.root_dir.clone()))?;
    if !path.starts_with(&root) {
        return Err(SkipReason::OutsideRoot(path));
    }
    if !path.is_file() {
        return Err(SkipReason::NotFound(path));
    }

    let extension = extension_of(&public_src)
        .ok_or_else(|| SkipReason::UnsupportedExtension(String::new()))?;
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(SkipReason::UnsupportedExtension(extension));
    }
    if extension == "gif" && !config.formats.gif {
        return Err(SkipReason::GifDisabled);
    }
    if config
        .exclude
        .extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&extension))
    {
        return Err(SkipReason::ExcludedExtension(extension));
    }

    Ok(ResolvedImage {
        path,
        reference: raw,
        public_src,
        extension,
        already_lazy,
    })
}

/// Pick the source to work from, substituting `data-src` for lazy
/// placeholders. The flag is true when a substitution happened.
fn select_source(
    reference: &ImageReference,
    lazy: &LazyLoadConfig,
) -> Result<(String, bool), SkipReason> {
    let src = reference.src.trim();
    if src.is_empty() {
        return Err(SkipReason::NoSource);
    }

    let alt = reference
        .alt_src
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());
    if let Some(alt) = alt {
        if lazy.detect_placeholder && reference.lazy_marker && src.starts_with(SVG_PLACEHOLDER_PREFIX)
        {
            return Ok((alt.to_string(), true));
        }
        if lazy.process_data_src && src == "#" {
            return Ok((alt.to_string(), true));
        }
    }

    if src.starts_with("data:") {
        return Err(SkipReason::InlineData);
    }
    Ok((src.to_string(), false))
}

/// Drop everything from the first `?`.
pub fn strip_query(src: &str) -> &str {
    src.split_once('?').map_or(src, |(path, _)| path)
}

/// Lower-case extension of the last path segment.
pub fn extension_of(src: &str) -> Option<String> {
    let name = src.rsplit('/').next()?;
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Reduce a decoded reference to a path relative to the site root.
///
/// Absolute and protocol-relative URLs must name the site's own host.
/// Root-relative paths lose the site's base path.
fn site_relative(decoded: &str, site: &SiteConfig) -> Result<String, SkipReason> {
    let root = Url::parse(&site.root_url).map_err(|_| SkipReason::ForeignHost(site.root_url.clone()))?;

    let absolute = if decoded.starts_with("//") {
        Some(format!("{}:{}", root.scheme(), decoded))
    } else if has_scheme(decoded) {
        Some(decoded.to_string())
    } else {
        None
    };

    let path = match absolute {
        Some(abs) => {
            let url = Url::parse(&abs).map_err(|_| SkipReason::ForeignHost(abs.clone()))?;
            let host = url.host_str().unwrap_or_default();
            if !host.eq_ignore_ascii_case(root.host_str().unwrap_or_default())
                || url.port_or_known_default() != root.port_or_known_default()
            {
                return Err(SkipReason::ForeignHost(host.to_string()));
            }
            percent_decode_str(url.path())
                .decode_utf8_lossy()
                .into_owned()
        }
        None => decoded.to_string(),
    };

    let base = site.base_path.trim_end_matches('/');
    if !base.is_empty() && path.starts_with('/') {
        if let Some(rest) = path.strip_prefix(base) {
            if rest.is_empty() || rest.starts_with('/') {
                return Ok(rest.to_string());
            }
        }
    }
    Ok(path)
}

fn has_scheme(src: &str) -> bool {
    match src.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageNode;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> (TempDir, EngineConfig) {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("img");
        fs::create_dir_all(&img).unwrap();
        for name in ["photo.jpg", "icon.png", "anim.gif", "my photo.jpg", "scan.tiff", "doc.pdf"] {
            fs::write(img.join(name), b"not really an image").unwrap();
        }
        let mut config = EngineConfig::default();
        config.site.root_dir = tmp.path().to_path_buf();
        config.site.root_url = "https://example.com/".into();
        (tmp, config)
    }

    fn resolve_src(src: &str, config: &EngineConfig) -> Result<ResolvedImage, SkipReason> {
        resolve(&ImageNode::with_src(src).reference(), config)
    }

    #[test]
    fn root_relative_path() {
        let (tmp, config) = site();
        let resolved = resolve_src("/img/photo.jpg", &config).unwrap();
        assert_eq!(resolved.path, tmp.path().join("img/photo.jpg").canonicalize().unwrap());
        assert_eq!(resolved.public_src, "/img/photo.jpg");
        assert_eq!(resolved.extension, "jpg");
        assert!(!resolved.already_lazy);
    }

    #[test]
    fn relative_path() {
        let (_tmp, config) = site();
        assert!(resolve_src("img/icon.png", &config).is_ok());
    }

    #[test]
    fn query_string_stripped_for_path_kept_for_reference() {
        let (_tmp, config) = site();
        let resolved = resolve_src("/img/photo.jpg?ver=3", &config).unwrap();
        assert_eq!(resolved.public_src, "/img/photo.jpg");
        assert_eq!(resolved.reference, "/img/photo.jpg?ver=3");
    }

    #[test]
    fn percent_encoded_path() {
        let (_tmp, config) = site();
        let resolved = resolve_src("/img/my%20photo.jpg", &config).unwrap();
        assert!(resolved.path.ends_with("my photo.jpg"));
        assert_eq!(resolved.stem(), "my%20photo");
    }

    #[test]
    fn local_absolute_url() {
        let (_tmp, config) = site();
        assert!(resolve_src("https://example.com/img/photo.jpg", &config).is_ok());
        assert!(resolve_src("//example.com/img/photo.jpg", &config).is_ok());
    }

    #[test]
    fn foreign_host_rejected() {
        let (_tmp, config) = site();
        assert_eq!(
            resolve_src("https://cdn.other.net/img/photo.jpg", &config),
            Err(SkipReason::ForeignHost("cdn.other.net".into()))
        );
        assert!(matches!(
            resolve_src("//cdn.other.net/img/photo.jpg", &config),
            Err(SkipReason::ForeignHost(_))
        ));
    }

    #[test]
    fn base_path_stripped() {
        let (_tmp, mut config) = site();
        config.site.base_path = "/blog".into();
        config.site.root_url = "https://example.com/blog/".into();
        assert!(resolve_src("/blog/img/photo.jpg", &config).is_ok());
        assert!(resolve_src("https://example.com/blog/img/photo.jpg", &config).is_ok());
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_tmp, config) = site();
        assert!(matches!(
            resolve_src("/img/missing.jpg", &config),
            Err(SkipReason::NotFound(_))
        ));
    }

    #[test]
    fn traversal_outside_root_rejected() {
        let (tmp, config) = site();
        let outside = tmp.path().parent().unwrap().join("outside-light-images-test.jpg");
        fs::write(&outside, b"x").unwrap();
        let result = resolve_src("/../outside-light-images-test.jpg", &config);
        fs::remove_file(&outside).unwrap();
        assert!(matches!(result, Err(SkipReason::OutsideRoot(_))));
    }

    #[test]
    fn excluded_path_substring() {
        let (_tmp, mut config) = site();
        config.exclude.paths = vec!["my photo".into()];
        assert_eq!(
            resolve_src("/img/my%20photo.jpg", &config),
            Err(SkipReason::ExcludedPath("my photo".into()))
        );
    }

    #[test]
    fn excluded_class_substring() {
        let (_tmp, mut config) = site();
        config.exclude.classes = vec!["no-opt".into()];
        let mut node = ImageNode::with_src("/img/photo.jpg");
        node.class = Some("hero no-optimize".into());
        assert_eq!(
            resolve(&node.reference(), &config),
            Err(SkipReason::ExcludedClass("no-opt".into()))
        );
    }

    #[test]
    fn unsupported_and_excluded_extensions() {
        let (_tmp, mut config) = site();
        assert_eq!(
            resolve_src("/img/doc.pdf", &config),
            Err(SkipReason::UnsupportedExtension("pdf".into()))
        );
        config.exclude.extensions = vec![".tiff".into()];
        assert_eq!(
            resolve_src("/img/scan.tiff", &config),
            Err(SkipReason::ExcludedExtension("tiff".into()))
        );
    }

    #[test]
    fn gif_requires_flag() {
        let (_tmp, mut config) = site();
        assert_eq!(resolve_src("/img/anim.gif", &config), Err(SkipReason::GifDisabled));
        config.formats.gif = true;
        assert!(resolve_src("/img/anim.gif", &config).is_ok());
    }

    #[test]
    fn lazy_placeholder_substitutes_data_src() {
        let (_tmp, config) = site();
        let mut node = ImageNode::with_src("data:image/svg+xml;base64,PHN2Zy8+");
        node.alt_src = Some("/img/photo.jpg".into());
        node.lazy_marker = true;
        let resolved = resolve(&node.reference(), &config).unwrap();
        assert!(resolved.already_lazy);
        assert_eq!(resolved.public_src, "/img/photo.jpg");
    }

    #[test]
    fn svg_without_marker_is_inline_data() {
        let (_tmp, config) = site();
        let mut node = ImageNode::with_src("data:image/svg+xml;base64,PHN2Zy8+");
        node.alt_src = Some("/img/photo.jpg".into());
        assert_eq!(resolve(&node.reference(), &config), Err(SkipReason::InlineData));
    }

    #[test]
    fn hash_src_placeholder_needs_process_data_src() {
        let (_tmp, mut config) = site();
        let mut node = ImageNode::with_src("#");
        node.alt_src = Some("/img/photo.jpg".into());
        assert!(resolve(&node.reference(), &config).is_err());
        config.lazy_load.process_data_src = true;
        assert!(resolve(&node.reference(), &config).unwrap().already_lazy);
    }

    #[test]
    fn empty_src_has_no_source() {
        let (_tmp, config) = site();
        assert_eq!(resolve_src("  ", &config), Err(SkipReason::NoSource));
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(extension_of("/a/b.JPG"), Some("jpg".into()));
        assert_eq!(extension_of("/a.dir/b"), None);
        assert_eq!(extension_of("/a/b."), None);
        assert_eq!(strip_query("/a.jpg?x=1?y"), "/a.jpg");
    }
}
