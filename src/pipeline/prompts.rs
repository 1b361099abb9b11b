use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ir::{ChunkRequest, TranslationRequest};
use crate::sentinels::{NO_ISSUES, TRUNCATED};
use crate::textutil::is_english;

/// Inputs of the translation instruction. Borrowed from the request.
#[derive(Clone, Copy, Debug)]
pub struct PromptParams<'a> {
    pub source_lang: &'a str,
    pub target_lang: &'a str,
    pub old_domain: &'a str,
    pub new_domain: &'a str,
    pub currency_from: &'a str,
    pub currency_to: &'a str,
    pub currency_label: &'a str,
    pub remove_shortcodes: bool,
}

impl<'a> From<&'a TranslationRequest> for PromptParams<'a> {
    fn from(r: &'a TranslationRequest) -> Self {
        Self {
            source_lang: &r.source_lang,
            target_lang: &r.target_lang,
            old_domain: &r.old_domain,
            new_domain: &r.new_domain,
            currency_from: &r.currency_from,
            currency_to: &r.currency_to,
            currency_label: &r.currency_label,
            remove_shortcodes: r.remove_shortcodes,
        }
    }
}

impl<'a> From<&'a ChunkRequest> for PromptParams<'a> {
    fn from(r: &'a ChunkRequest) -> Self {
        Self {
            source_lang: &r.source_lang,
            target_lang: &r.target_lang,
            old_domain: &r.old_domain,
            new_domain: &r.new_domain,
            currency_from: &r.currency_from,
            currency_to: &r.currency_to,
            currency_label: &r.currency_label,
            remove_shortcodes: r.remove_shortcodes,
        }
    }
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex"));

/// Single pass over `{{name}}` placeholders, so substituted values are never expanded
/// again. Unknown names are left as written.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

const TRANSLATE_HEAD: &str = r#"You are a professional native-level translator.

TASK:
Translate every {{source_lang}} text node in the USER-supplied HTML into natural, idiomatic {{target_lang}}.
Never shorten, summarise, or change meaning.

STRUCTURAL RULES:
- Preserve ALL HTML tags, attributes, inline styles, comments, IDs, classes, widths, heights, anchor names and shortcodes exactly as written.
- Translate only human-readable text nodes (and alt/title text); never translate URLs, file names or code.
- Keep indentation and line breaks exactly as in the input."#;

const DOMAIN_RULE: &str = r#"
DOMAIN RULE:
- Replace every occurrence of '{{old_domain}}' with '{{new_domain}}' (plain text substitution, nothing else in the URL changes)."#;

const CURRENCY_REMOVE_RULE: &str = r#"
CURRENCY RULE:
- Remove every [convert {{currency_from}} ...]...[/convert] shortcode wrapper, keeping only the amount inside it.
- Also remove the currency word that follows or precedes the amount (рублей, руб., RUB, roubles, etc.).
- Never output the [convert] or [/convert] tokens."#;

const CURRENCY_SWAP_RULE: &str = r#"
CURRENCY RULE:
- In [convert ...] shortcodes replace the currency code "{{currency_from}}" (in the opening tag and in any to="{{currency_from}}" / from="{{currency_from}}" attribute) with "{{currency_to}}".
- Replace the trailing currency word (рублей, руб., RUR, etc.) with '{{currency_label}}'."#;

const TO_ENGLISH_RULE: &str = r#"
STYLE AND UNITS (target is English):
- Use plain, clear, friendly English; short sentences; no bureaucratic phrasing.
- After every metric measurement add the imperial equivalent in parentheses, keeping the metric value first:
  - distance: km -> miles (1 decimal below 10, whole numbers above); m -> ft (whole numbers); cm -> in (1 decimal)
  - area: m² -> sq ft (whole numbers); ha -> acres (1 decimal)
  - speed: km/h -> mph (whole numbers)
  - weight: kg -> lb (1 decimal below 10, whole numbers above); g -> oz (1 decimal)
  - temperature: °C -> °F (whole numbers)
- Example: 5 km (3.1 miles), 20 °C (68 °F)."#;

const FROM_ENGLISH_RULE: &str = r#"
UNITS (source is English):
- Convert any imperial measurement (miles, ft, in, sq ft, acres, mph, lb, oz, °F) to metric only, using the conventions of {{target_lang}}.
- Do not keep the imperial value and do not add dual annotations."#;

const OUTPUT_RULES: &str = r#"
OUTPUT:
- Output raw HTML only: no markdown, no code fences, no explanations.
- If the complete output would not fit in your response, respond ONLY with the word {{truncated}} and nothing else. Never return partial HTML."#;

/// System instruction for chunk translation. Pure: same params, same text.
pub fn build_translate_prompt(p: &PromptParams<'_>) -> String {
    let mut tmpl = String::from(TRANSLATE_HEAD);
    let old = p.old_domain.trim();
    let new = p.new_domain.trim();
    if !old.is_empty() && !new.is_empty() && old != new {
        tmpl.push('\n');
        tmpl.push_str(DOMAIN_RULE);
    }
    if p.remove_shortcodes {
        tmpl.push('\n');
        tmpl.push_str(CURRENCY_REMOVE_RULE);
    } else if !p.currency_from.trim().is_empty() && !p.currency_to.trim().is_empty() {
        tmpl.push('\n');
        tmpl.push_str(CURRENCY_SWAP_RULE);
    }
    if is_english(p.target_lang) {
        tmpl.push('\n');
        tmpl.push_str(TO_ENGLISH_RULE);
    } else if is_english(p.source_lang) {
        tmpl.push('\n');
        tmpl.push_str(FROM_ENGLISH_RULE);
    }
    tmpl.push('\n');
    tmpl.push_str(OUTPUT_RULES);

    let currency_from = non_blank_or(p.currency_from, "rub");
    let currency_label = non_blank_or(p.currency_label, p.currency_to);
    render_template(
        &tmpl,
        &[
            ("source_lang", p.source_lang.trim()),
            ("target_lang", p.target_lang.trim()),
            ("old_domain", old),
            ("new_domain", new),
            ("currency_from", currency_from),
            ("currency_to", p.currency_to.trim()),
            ("currency_label", currency_label),
            ("truncated", TRUNCATED),
        ],
    )
}

fn non_blank_or<'a>(v: &'a str, fallback: &'a str) -> &'a str {
    let v = v.trim();
    if v.is_empty() {
        fallback.trim()
    } else {
        v
    }
}

const QA_TEMPLATE: &str = r#"You are a bilingual proof-reader.
Compare the {{source_lang}} original and its {{target_lang}} translation (both are HTML; ignore markup differences).
Spot mistranslations, omissions or meaning shifts.
Output a numbered list: original sentence -> suggested correction.
If there are none, reply exactly '{{no_issues}}'"#;

pub fn build_qa_prompt(source_lang: &str, target_lang: &str) -> String {
    render_template(
        QA_TEMPLATE,
        &[
            ("source_lang", source_lang.trim()),
            ("target_lang", target_lang.trim()),
            ("no_issues", NO_ISSUES),
        ],
    )
}

pub fn qa_user_text(original: &str, translation: &str) -> String {
    format!("ORIGINAL:\n{original}\n\nTRANSLATION:\n{translation}")
}

const TITLE_TEMPLATE: &str = r#"Write a short human title for the article in the USER-supplied HTML.
- Language: {{target_lang}}.
- At most {{max_words}} words.
- Plain text only: no quotes, no markdown, no trailing period."#;

pub fn build_title_prompt(target_lang: &str, max_words: usize) -> String {
    let max_words = max_words.to_string();
    render_template(
        TITLE_TEMPLATE,
        &[("target_lang", target_lang.trim()), ("max_words", &max_words)],
    )
}
