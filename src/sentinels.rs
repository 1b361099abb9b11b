use once_cell::sync::Lazy;
use regex::Regex;

/// Returned by the model instead of a partial answer when the output would not fit.
pub const TRUNCATED: &str = "TRUNCATED";

/// Canonical empty QA report.
pub const NO_ISSUES: &str = "No issues found.";

pub const CODE_FENCE: &str = "```";

static CONVERT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[/?convert\b[^\]]*\]").expect("convert tag regex"));

#[inline]
pub fn is_truncation_marker(text: &str) -> bool {
    text.trim() == TRUNCATED
}

pub fn is_no_issues(report: &str) -> bool {
    let r = report.trim();
    r.is_empty() || r.eq_ignore_ascii_case(NO_ISSUES) || r.eq_ignore_ascii_case("No issues found")
}

/// Removes exactly one wrapping fence: the first line when it opens with ``` and the last
/// line when it is a closing ```. Inner fences are left alone.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with(CODE_FENCE) || trimmed.len() < CODE_FENCE.len() * 2 {
        return text.to_string();
    }
    let Some(first_nl) = trimmed.find('\n') else {
        return text.to_string();
    };
    let body = &trimmed[first_nl + 1..];
    let body = body.trim_end();
    let Some(last_nl) = body.rfind('\n') else {
        if body.trim() == CODE_FENCE {
            return String::new();
        }
        return text.to_string();
    };
    let last_line = body[last_nl + 1..].trim();
    if last_line != CODE_FENCE {
        return text.to_string();
    }
    body[..last_nl].to_string()
}

/// Drops any `[convert ...]` / `[/convert]` tag left in the text.
pub fn strip_convert_tags(text: &str) -> String {
    CONVERT_TAG_RE.replace_all(text, "").into_owned()
}

pub fn contains_convert_tag(text: &str) -> bool {
    CONVERT_TAG_RE.is_match(text)
}
