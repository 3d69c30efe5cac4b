//! # Light Images
//!
//! An image transform cache engine. It sits inside a page-rendering
//! pipeline and rewrites `<img>` references (and CSS `url()` backgrounds)
//! so browsers fetch pre-generated, re-encoded, right-sized artifacts
//! instead of the original files.
//!
//! For each image reference the engine decides whether a derived artifact
//! already exists and is fresh, and if not, how to produce one. The
//! rewritten markup never points at a broken or larger artifact, and a
//! source known not to improve is never reprocessed until it changes.
//!
//! # Per-Node Pipeline
//!
//! ```text
//! resolve → negotiate → key → lookup → (remote | transcode) → persist → rewrite
//!                                                                       ↓
//!                                              [responsive: 4 cascaded variants]
//! ```
//!
//! Every stage failure is local to one node: that node keeps its original
//! markup and the rest of the page carries on.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`html`] | Page optimizer: finds `<img>` tags and CSS `url()` references, drives the pipeline |
//! | [`process`] | Per-node state machine wiring every stage together |
//! | [`resolve`] | Reference → canonical file inside the site root, or a skip reason |
//! | [`format`] | Output format negotiation (AVIF > WebP > source family) |
//! | [`naming`] | Deterministic cache keys under the `full`, `partial` and `none` policies |
//! | [`cache`] | Flat artifact directory: freshness, atomic persist, negative markers |
//! | [`imaging`] | Decode, resample, encode; the "strictly smaller" guarantee |
//! | [`remote`] | Delegation to an external compression service |
//! | [`variants`] | The `4x`…`1x` responsive cascade |
//! | [`rewrite`] | Node mutation and transport hints |
//! | [`config`] | `light-images.toml` loading, merging and validation |
//! | [`types`] | Values passed between stages |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## The Filesystem Is the Index
//!
//! There is no manifest or database. An artifact's file name is its cache
//! key, its modification time against the source's decides freshness, and
//! a zero-length file marks a source that cannot be improved. Anything that
//! can list a directory can inspect or prune the cache.
//!
//! ## Never Larger
//!
//! An artifact that is not strictly smaller than its source is discarded,
//! whether it came from the local encoder or the remote service. The
//! primary image records a negative marker; a responsive variant points at
//! the original file instead.
//!
//! ## Explicit Configuration
//!
//! One immutable [`config::EngineConfig`] is built up front and passed by
//! reference into every component. Nothing reads global state.

pub mod cache;
pub mod config;
pub mod format;
pub mod html;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod process;
pub mod remote;
pub mod resolve;
pub mod rewrite;
pub mod types;
pub mod variants;

#[cfg(test)]
pub(crate) mod test_helpers;
