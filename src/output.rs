//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every image leads with its positional index and the reference as it
//! appeared in the markup. What happened to it follows on indented context
//! lines, so a report reads as an inventory of the page.
//!
//! ## Rewrite
//!
//! ```text
//! blog/index.html (3 images)
//!     001 /img/hero.jpg
//!         → /cache/light-images/3f…e1.webp (generated)
//!     002 /img/logo.png
//!         negative: cannot be made smaller
//!     003 https://cdn.example.net/a.jpg
//!         skipped: hosted on another site (cdn.example.net)
//!     Hints: 1
//! ```
//!
//! ## Check
//!
//! ```text
//! /img/hero.jpg
//!     Source: /srv/www/img/hero.jpg
//!     Format: webp
//!     Artifact: /cache/light-images/3f…e1.webp (absent)
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::{CacheStats, Lookup};
use crate::html::{PageReport, PageSkip};
use crate::process::{CheckReport, NodeError, NodeOutcome, NodeReport};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn cache_state(lookup: &Lookup) -> &'static str {
    match lookup {
        Lookup::Fresh(_) => "fresh",
        Lookup::Stale(_) => "stale",
        Lookup::Negative(_) => "negative",
        Lookup::Absent => "absent",
    }
}

fn page_skip_reason(skip: &PageSkip) -> String {
    match skip {
        PageSkip::Disabled => "engine disabled".to_string(),
        PageSkip::NotBot => "bot-only mode, not a crawler".to_string(),
        PageSkip::ExcludedPage(pattern) => format!("page matches excluded pattern {pattern:?}"),
        PageSkip::CacheUnavailable(reason) => reason.clone(),
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Context lines describing one node's outcome.
fn outcome_lines(outcome: &NodeOutcome) -> Vec<String> {
    match outcome {
        NodeOutcome::Rewritten { url, cached } => {
            let status = if *cached { "cached" } else { "generated" };
            vec![format!("\u{2192} {url} ({status})")]
        }
        NodeOutcome::Responsive {
            src,
            candidates,
            failed,
            cached,
        } => {
            let status = if *cached { "cached" } else { "generated" };
            let mut lines = Vec::new();
            if let Some(src) = src {
                lines.push(format!("\u{2192} {src} ({status})"));
            }
            let mut set = format!("srcset: {}", plural(*candidates, "candidate"));
            if *failed > 0 {
                set.push_str(&format!(", {failed} failed"));
            }
            lines.push(set);
            lines
        }
        NodeOutcome::Negative => vec!["negative: cannot be made smaller".to_string()],
        NodeOutcome::NotProcessed(NodeError::Skipped(reason)) => {
            vec![format!("skipped: {reason}")]
        }
        NodeOutcome::NotProcessed(err) => vec![format!("failed: {err}")],
    }
}

/// Format one node: index and reference, then indented outcome lines.
pub fn format_node(index: usize, report: &NodeReport, depth: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "{}{} {}",
        indent(depth),
        format_index(index),
        report.src
    )];
    lines.extend(
        outcome_lines(&report.outcome)
            .into_iter()
            .map(|l| format!("{}{l}", indent(depth + 1))),
    );
    lines
}

// ============================================================================
// Pages and stylesheets
// ============================================================================

/// Format the report of one page.
///
/// ```text
/// index.html (2 images)
///     001 /img/a.jpg
///         → /cache/light-images/….jpg (generated)
///     Hints: 1
/// ```
pub fn format_page_report(label: &str, report: &PageReport) -> Vec<String> {
    if let Some(skip) = &report.skipped {
        return vec![format!("{label}: skipped ({})", page_skip_reason(skip))];
    }

    let mut lines = vec![format!(
        "{label} ({})",
        plural(report.images.len(), "image")
    )];
    for (i, node) in report.images.iter().enumerate() {
        lines.extend(format_node(i + 1, node, 1));
    }
    if !report.backgrounds.is_empty() {
        lines.push(format!(
            "{}Backgrounds ({})",
            indent(1),
            report.backgrounds.len()
        ));
        for (i, node) in report.backgrounds.iter().enumerate() {
            lines.extend(format_node(i + 1, node, 2));
        }
    }
    let hints = report.hints().count();
    if hints > 0 {
        lines.push(format!("{}Hints: {hints}", indent(1)));
    }
    lines
}

pub fn print_page_report(label: &str, report: &PageReport) {
    for line in format_page_report(label, report) {
        println!("{}", line);
    }
}

/// Format the report of one stylesheet.
pub fn format_css_report(label: &str, reports: &[NodeReport]) -> Vec<String> {
    let mut lines = vec![format!("{label} ({})", plural(reports.len(), "background"))];
    for (i, node) in reports.iter().enumerate() {
        lines.extend(format_node(i + 1, node, 1));
    }
    lines
}

pub fn print_css_report(label: &str, reports: &[NodeReport]) {
    for line in format_css_report(label, reports) {
        println!("{}", line);
    }
}

/// One-line run summary.
pub fn format_summary(files: usize, stats: &CacheStats) -> String {
    format!("{}: {stats}", plural(files, "file"))
}

// ============================================================================
// Check
// ============================================================================

/// Format the decision for one reference.
pub fn format_check(src: &str, result: &Result<CheckReport, NodeError>) -> Vec<String> {
    let mut lines = vec![src.to_string()];
    match result {
        Ok(report) => {
            lines.push(format!("    Source: {}", report.image.path.display()));
            lines.push(format!("    Format: {}", report.format));
            lines.push(format!(
                "    Artifact: {} ({})",
                report.url,
                cache_state(&report.lookup)
            ));
        }
        Err(NodeError::Skipped(reason)) => lines.push(format!("    skipped: {reason}")),
        Err(err) => lines.push(format!("    failed: {err}")),
    }
    lines
}

pub fn print_check(src: &str, result: &Result<CheckReport, NodeError>) {
    for line in format_check(src, result) {
        println!("{}", line);
    }
}
