use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

#[inline]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Literal domain substitution. No-op when either side is blank or both are equal.
pub fn swap_domain(html: &str, old_domain: &str, new_domain: &str) -> String {
    let old = old_domain.trim();
    let new = new_domain.trim();
    if old.is_empty() || new.is_empty() || old == new {
        return html.to_string();
    }
    html.replace(old, new)
}

pub fn is_english(lang: &str) -> bool {
    let l = lang.trim().to_ascii_lowercase();
    matches!(l.as_str(), "en" | "eng" | "english") || l.starts_with("en-") || l.starts_with("english")
}

pub fn same_language(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// First `max_chars` chars of `text`, never cutting inside a UTF-8 sequence.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Byte index of the char midpoint; `0` for texts shorter than two chars.
pub fn char_midpoint(text: &str) -> usize {
    let n = char_len(text);
    if n < 2 {
        return 0;
    }
    text.char_indices().nth(n / 2).map(|(i, _)| i).unwrap_or(text.len())
}

/// Collapses whitespace, strips wrapping quotes and keeps at most `max_words` words and
/// `max_chars` chars.
pub fn clean_title(raw: &str, max_words: usize, max_chars: usize) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .unwrap_or("");
    let line = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '«' || c == '»' || c == '“' || c == '”')
        .trim();
    let words: Vec<&str> = WS_RE.split(line).filter(|w| !w.is_empty()).take(max_words).collect();
    let joined = words.join(" ");
    take_chars(&joined, max_chars).trim_end().to_string()
}
