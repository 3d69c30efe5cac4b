//! Artifact file naming.
//!
//! Every generated artifact lives in one flat cache directory, so its file
//! name is its cache key. Three policies decide how the name is derived:
//!
//! | Policy | Primary | Variant |
//! |---|---|---|
//! | `full` | `{sha1}.{ext}` | `{sha1}_{n}x.{ext}` |
//! | `partial` | `{stem}_{sha1}.{ext}` | `{stem}_{sha1}_{n}x.{ext}` |
//! | `none` | `{stem}.{ext}` | `{stem}_{n}x.{ext}` |
//!
//! The hash is SHA-1 of the *reference string* as written in the markup,
//! not of the file contents. Renaming a file yields a new key; so does a
//! different query string on the same file. Under `none`, two sources with
//! the same stem share one artifact and the last writer wins.

use crate::types::{ResolvedImage, TransformRequest};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// How artifact names are derived from the source reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    #[default]
    Full,
    Partial,
    None,
}

/// File name of an artifact inside the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-1 of a string, as lower-case hex.
pub fn sha1_hex(input: &str) -> String {
    format!("{:x}", Sha1::digest(input.as_bytes()))
}

/// Build the cache key for one artifact. Pure: no I/O, no randomness.
pub fn build_key(
    image: &ResolvedImage,
    request: &TransformRequest,
    policy: NamingPolicy,
) -> CacheKey {
    let label = request
        .variant
        .map(|l| format!("_{l}"))
        .unwrap_or_default();
    let ext = request.format.extension();

    let name = match policy {
        NamingPolicy::Full => format!("{}{label}.{ext}", sha1_hex(&image.reference)),
        NamingPolicy::Partial => format!(
            "{}_{}{label}.{ext}",
            image.stem(),
            sha1_hex(&image.reference)
        ),
        NamingPolicy::None => format!("{}{label}.{ext}", image.stem()),
    };
    CacheKey(name)
}
