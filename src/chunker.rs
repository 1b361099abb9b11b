use once_cell::sync::Lazy;
use regex::Regex;

use crate::textutil::char_len;

/// Closing tags of block elements, plus trailing spaces and at most one line break.
static BLOCK_CLOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</(?:p|div|section|article|blockquote|figure|ul|ol|li|table|thead|tbody|tfoot|tr|td|th|h[1-6])\s*>[ \t]*(?:\r?\n)?",
    )
    .expect("block close regex")
});

/// Chunks over this factor of the safe budget are re-split by lines.
const OVERSIZE_FACTOR: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkBudget {
    pub size_limit: usize,
    pub margin: f64,
    pub min_floor: usize,
}

impl ChunkBudget {
    pub const fn new(size_limit: usize, margin: f64, min_floor: usize) -> Self {
        Self {
            size_limit,
            margin,
            min_floor,
        }
    }

    /// `max(min_floor, floor(size_limit * margin))`, never zero.
    pub fn safe_chars(&self) -> usize {
        let scaled = (self.size_limit as f64 * self.margin.max(0.0)).floor() as usize;
        scaled.max(self.min_floor).max(1)
    }
}

/// Line-based split: never cuts inside a line.
pub fn split_by_lines(text: &str, budget: &ChunkBudget) -> Vec<String> {
    let safe = budget.safe_chars();
    let mut chunks: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut used = 0usize;

    for line in text.split_inclusive('\n') {
        let add = char_len(line);
        if !cur.is_empty() && used + add > safe {
            chunks.push(std::mem::take(&mut cur));
            used = 0;
        }
        if add > safe {
            tracing::warn!(chars = add, safe, "single line exceeds chunk budget");
        }
        cur.push_str(line);
        used += add;
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }
    chunks
}

/// Splits after block-level closing tags, packing segments up to the budget. Falls back to
/// [`split_by_lines`] when no block boundary exists and for chunks that stay oversized.
pub fn split_html(html: &str, budget: &ChunkBudget) -> Vec<String> {
    let segments = block_segments(html);
    if segments.len() <= 1 {
        return split_by_lines(html, budget);
    }

    let safe = budget.safe_chars();
    let mut packed: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut used = 0usize;
    for seg in segments {
        let add = char_len(seg);
        if !buf.is_empty() && used + add > safe {
            packed.push(std::mem::take(&mut buf));
            used = 0;
        }
        buf.push_str(seg);
        used += add;
    }
    if !buf.is_empty() {
        packed.push(buf);
    }

    let hard_cap = (safe as f64 * OVERSIZE_FACTOR).floor() as usize;
    let mut out: Vec<String> = Vec::with_capacity(packed.len());
    for chunk in packed {
        if char_len(&chunk) > hard_cap {
            out.extend(split_by_lines(&chunk, budget));
        } else {
            out.push(chunk);
        }
    }
    out
}

fn block_segments(html: &str) -> Vec<&str> {
    let mut segs: Vec<&str> = Vec::new();
    let mut pos = 0usize;
    for m in BLOCK_CLOSE_RE.find_iter(html) {
        if m.end() > pos {
            segs.push(&html[pos..m.end()]);
            pos = m.end();
        }
    }
    if pos < html.len() {
        segs.push(&html[pos..]);
    }
    segs
}
