//! Report sentinel detection and content cleaning.
//!
//! The assistant's raw output for the final turn begins (not necessarily
//! at byte 0) with the literal `[Report]` marker, optionally followed by
//! a markdown `# Heading` line used as the report subtitle. Detection
//! and cleaning are separate pure functions: the detector runs on every
//! reveal tick, the transforms run when persisting report content.

use std::sync::LazyLock;

use regex::Regex;

pub const REPORT_MARKER: &str = "[Report]";

static LEADING_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\[report\]\s*").expect("static regex"));
static FIRST_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("static regex"));
static FIRST_HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+.+\n?").expect("static regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_`]").expect("static regex"));

/// Has the text (so far) contained the report sentinel anywhere?
/// Case-insensitive substring check.
pub fn contains_report_marker(text: &str) -> bool {
    text.to_lowercase().contains(&REPORT_MARKER.to_lowercase())
}

/// Strip the leading marker and the first `# heading` line.
pub fn clean_report_content(content: &str) -> String {
    let without_marker = LEADING_MARKER.replace(content, "");
    FIRST_HEADING_LINE.replace(&without_marker, "").trim().to_string()
}

/// Extract the first `# heading` (after the marker) as the report
/// subtitle, with markdown emphasis characters removed.
pub fn extract_report_sub_title(content: &str) -> String {
    let without_marker = LEADING_MARKER.replace(content, "");
    match FIRST_HEADING.captures(&without_marker) {
        Some(captures) => EMPHASIS.replace_all(&captures[1], "").trim().to_string(),
        None => String::new(),
    }
}
