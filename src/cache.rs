//! Artifact cache on disk.
//!
//! Every generated artifact lives in a single flat directory and is served
//! from a parallel public URL prefix. There is no manifest: the file name
//! is the [`CacheKey`] and the filesystem is the index.
//!
//! ## Freshness
//!
//! An artifact is fresh when it exists and either the source is gone or the
//! artifact is strictly newer than the source. Variant artifacts are fresh
//! by existence alone. Touching the source therefore invalidates its
//! primary artifact on the next render.
//!
//! ## Negative markers
//!
//! A zero-length artifact records "this source cannot be improved". It is
//! subject to the same freshness rule, so the marker sticks until the
//! source changes, and the pipeline never re-runs the transcoder for it.
//!
//! ## Concurrency
//!
//! Concurrent renders may generate the same key. [`CacheStore::persist`]
//! writes to a temporary file in the cache directory and renames it into
//! place, so readers see either the old artifact or the new one.

use crate::config::EngineConfig;
use crate::naming::CacheKey;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot create cache directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write artifact {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub url: String,
    /// Zero for a negative marker.
    pub size: u64,
    /// Modification time of the source, if the source exists.
    pub source_mtime: Option<SystemTime>,
    pub artifact_mtime: Option<SystemTime>,
}

impl CacheEntry {
    pub fn is_negative(&self) -> bool {
        self.size == 0
    }
}

/// Result of a freshness lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Usable artifact; rewrite without generating.
    Fresh(CacheEntry),
    /// Artifact exists but is older than its source; regenerate.
    Stale(CacheEntry),
    /// Fresh zero-length marker; leave the node alone.
    Negative(CacheEntry),
    Absent,
}

/// Flat artifact directory plus its public URL prefix.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    url_prefix: String,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix: String = url_prefix.into();
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.cache_dir(), config.cache_url())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    pub fn url_for(&self, key: &CacheKey) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    /// Create the cache directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }

    /// Classify the artifact for `key` against its `source`.
    pub fn lookup(&self, key: &CacheKey, source: &Path, is_variant: bool) -> Lookup {
        let Some(entry) = self.entry(key, source) else {
            return Lookup::Absent;
        };

        let fresh = is_variant
            || match (entry.source_mtime, entry.artifact_mtime) {
                (None, _) => true,
                (Some(src), Some(art)) => art > src,
                (Some(_), None) => false,
            };

        match (fresh, entry.is_negative()) {
            (true, true) => Lookup::Negative(entry),
            (true, false) => Lookup::Fresh(entry),
            (false, _) => Lookup::Stale(entry),
        }
    }

    /// Write `bytes` as the artifact for `key`, replacing any previous one.
    pub fn persist(&self, key: &CacheKey, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        self.ensure_dir()?;
        let path = self.path_for(key);
        let write_err = |source| CacheError::Write {
            path: path.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp.write_all(bytes).map_err(write_err)?;
        temp.flush().map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(write_err)?;
        }
        temp.persist(&path).map_err(|e| write_err(e.error))?;

        let artifact_mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        Ok(CacheEntry {
            url: self.url_for(key),
            path,
            size: bytes.len() as u64,
            source_mtime: None,
            artifact_mtime,
        })
    }

    /// Record that the source behind `key` cannot be improved.
    pub fn mark_negative(&self, key: &CacheKey) -> Result<CacheEntry, CacheError> {
        self.persist(key, &[])
    }

    fn entry(&self, key: &CacheKey, source: &Path) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let meta = fs::metadata(&path).ok().filter(|m| m.is_file())?;
        let source_mtime = fs::metadata(source).and_then(|m| m.modified()).ok();
        Some(CacheEntry {
            url: self.url_for(key),
            size: meta.len(),
            artifact_mtime: meta.modified().ok(),
            source_mtime,
            path,
        })
    }
}

/// Per-run tally of node outcomes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub negative: u32,
    pub generated: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn negative(&mut self) {
        self.negative += 1;
    }

    pub fn generated(&mut self) {
        self.generated += 1;
    }

    pub fn skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn failed(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.negative + self.generated + self.skipped + self.failed
    }

    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.negative += other.negative;
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.generated, "generated"),
            (self.hits, "cached"),
            (self.negative, "negative"),
            (self.skipped, "skipped"),
            (self.failed, "failed"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();

        if parts.is_empty() {
            return write!(f, "no images");
        }
        if parts.len() == 1 {
            return write!(f, "{}", parts[0]);
        }
        write!(f, "{} ({} total)", parts.join(", "), self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name)
    }

    fn setup() -> (TempDir, CacheStore, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"), "/cache/");
        let source = tmp.path().join("photo.jpg");
        fs::write(&source, b"source bytes").unwrap();
        (tmp, store, source)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn age(path: &Path, secs: u64) {
        set_mtime(path, SystemTime::now() - Duration::from_secs(secs));
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    #[test]
    fn absent_when_no_artifact() {
        let (_tmp, store, source) = setup();
        assert_eq!(store.lookup(&key("a.jpg"), &source, false), Lookup::Absent);
    }

    #[test]
    fn fresh_when_artifact_newer_than_source() {
        let (_tmp, store, source) = setup();
        age(&source, 3600);
        store.persist(&key("a.jpg"), b"artifact").unwrap();

        match store.lookup(&key("a.jpg"), &source, false) {
            Lookup::Fresh(entry) => {
                assert_eq!(entry.url, "/cache/a.jpg");
                assert_eq!(entry.size, 8);
                assert!(entry.source_mtime.is_some());
            }
            other => panic!("expected fresh, got {other:?}"),
        }
    }

    #[test]
    fn touching_source_makes_artifact_stale() {
        let (_tmp, store, source) = setup();
        let entry = store.persist(&key("a.jpg"), b"artifact").unwrap();
        age(&entry.path, 3600);

        assert!(matches!(
            store.lookup(&key("a.jpg"), &source, false),
            Lookup::Stale(_)
        ));
    }

    #[test]
    fn equal_mtimes_are_stale() {
        let (_tmp, store, source) = setup();
        let entry = store.persist(&key("a.jpg"), b"artifact").unwrap();
        let t = SystemTime::now() - Duration::from_secs(60);
        set_mtime(&source, t);
        set_mtime(&entry.path, t);

        assert!(matches!(
            store.lookup(&key("a.jpg"), &source, false),
            Lookup::Stale(_)
        ));
    }

    #[test]
    fn fresh_when_source_missing() {
        let (tmp, store, _source) = setup();
        store.persist(&key("a.jpg"), b"artifact").unwrap();
        let gone = tmp.path().join("gone.jpg");
        assert!(matches!(
            store.lookup(&key("a.jpg"), &gone, false),
            Lookup::Fresh(_)
        ));
    }

    #[test]
    fn variants_are_fresh_by_existence() {
        let (_tmp, store, source) = setup();
        let entry = store.persist(&key("a_2x.jpg"), b"artifact").unwrap();
        age(&entry.path, 3600);

        assert!(matches!(
            store.lookup(&key("a_2x.jpg"), &source, true),
            Lookup::Fresh(_)
        ));
        assert!(matches!(
            store.lookup(&key("a_2x.jpg"), &source, false),
            Lookup::Stale(_)
        ));
    }

    // =========================================================================
    // Negative markers
    // =========================================================================

    #[test]
    fn negative_marker_is_sticky_until_source_changes() {
        let (_tmp, store, source) = setup();
        age(&source, 3600);
        let marker = store.mark_negative(&key("a.jpg")).unwrap();
        assert!(marker.is_negative());
        assert!(matches!(
            store.lookup(&key("a.jpg"), &source, false),
            Lookup::Negative(_)
        ));

        set_mtime(&source, SystemTime::now() + Duration::from_secs(60));
        assert!(matches!(
            store.lookup(&key("a.jpg"), &source, false),
            Lookup::Stale(_)
        ));
    }

    #[test]
    fn negative_variant_marker() {
        let (_tmp, store, source) = setup();
        store.mark_negative(&key("a_1x.jpg")).unwrap();
        assert!(matches!(
            store.lookup(&key("a_1x.jpg"), &source, true),
            Lookup::Negative(_)
        ));
    }

    // =========================================================================
    // Persist
    // =========================================================================

    #[test]
    fn persist_creates_dir_and_overwrites() {
        let (_tmp, store, _source) = setup();
        assert!(!store.dir().exists());
        store.persist(&key("a.webp"), b"first").unwrap();
        let entry = store.persist(&key("a.webp"), b"second!").unwrap();
        assert_eq!(fs::read(&entry.path).unwrap(), b"second!");
        assert_eq!(entry.size, 7);
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let (_tmp, store, _source) = setup();
        store.persist(&key("a.webp"), b"data").unwrap();
        store.persist(&key("b.webp"), b"data").unwrap();
        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "{names:?}");
    }

    #[test]
    fn ensure_dir_fails_under_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let store = CacheStore::new(blocker.join("cache"), "/cache");
        assert!(matches!(
            store.ensure_dir(),
            Err(CacheError::CreateDir { .. })
        ));
    }

    #[test]
    fn url_prefix_joined_once() {
        let store = CacheStore::new("/tmp/x", "https://cdn.example.com/c/");
        assert_eq!(
            store.url_for(&key("abc.avif")),
            "https://cdn.example.com/c/abc.avif"
        );
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display_mixed() {
        let s = CacheStats {
            hits: 5,
            generated: 2,
            negative: 1,
            ..CacheStats::default()
        };
        assert_eq!(s.to_string(), "2 generated, 5 cached, 1 negative (8 total)");
    }

    #[test]
    fn cache_stats_display_single() {
        let s = CacheStats {
            generated: 3,
            ..CacheStats::default()
        };
        assert_eq!(s.to_string(), "3 generated");
        assert_eq!(CacheStats::default().to_string(), "no images");
    }

    #[test]
    fn cache_stats_merge() {
        let mut a = CacheStats {
            hits: 1,
            failed: 1,
            ..CacheStats::default()
        };
        let mut b = CacheStats::default();
        b.skipped();
        b.hit();
        a.merge(&b);
        assert_eq!(a.hits, 2);
        assert_eq!(a.skipped, 1);
        assert_eq!(a.total(), 4);
    }
}
