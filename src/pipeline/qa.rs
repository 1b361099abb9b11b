use futures::future::join_all;

use crate::chunker::{split_html, ChunkBudget};
use crate::error::{PipelineError, Stage};
use crate::pipeline::prompts::{build_qa_prompt, qa_user_text};
use crate::pipeline::translator::Translator;
use crate::sentinels::{is_no_issues, NO_ISSUES};
use crate::textutil::{char_len, take_chars};

/// A slice of the source paired with the matching slice of the translation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QaSection {
    pub label: &'static str,
    pub source: String,
    pub output: String,
}

/// First, middle and last sections of both texts under a coarse chunking. The output side
/// is picked by the same relative position, so the two lists may differ in length.
pub fn sample_sections(source: &str, output: &str, budget: &ChunkBudget) -> Vec<QaSection> {
    let src = split_html(source, budget);
    let out = split_html(output, budget);
    if src.is_empty() {
        return vec![];
    }

    let n = src.len();
    let mut picks: Vec<(&'static str, usize)> = Vec::with_capacity(3);
    for (label, idx) in [("first", 0), ("last", n - 1), ("middle", n / 2)] {
        if !picks.iter().any(|(_, i)| *i == idx) {
            picks.push((label, idx));
        }
    }
    picks.sort_by_key(|(_, i)| *i);

    picks
        .into_iter()
        .map(|(label, i)| {
            let output = match label {
                _ if out.is_empty() => String::new(),
                "first" => out[0].clone(),
                "last" => out[out.len() - 1].clone(),
                _ => out[out.len() / 2].clone(),
            };
            QaSection {
                label,
                source: src[i].clone(),
                output,
            }
        })
        .collect()
}

/// First, middle and last thirds of both texts split at char positions, each capped at
/// `cap` chars. Used when markup offers no usable block boundaries.
pub fn third_sections(source: &str, output: &str, cap: usize) -> Vec<QaSection> {
    let src = char_thirds(source);
    let out = char_thirds(output);
    ["first", "middle", "last"]
        .into_iter()
        .zip(src.into_iter().zip(out))
        .filter(|(_, (s, _))| !s.trim().is_empty())
        .map(|(label, (s, o))| QaSection {
            label,
            source: take_chars(s, cap).to_string(),
            output: take_chars(o, cap).to_string(),
        })
        .collect()
}

fn char_thirds(text: &str) -> [&str; 3] {
    let n = char_len(text);
    let byte_at = |c: usize| text.char_indices().nth(c).map(|(i, _)| i).unwrap_or(text.len());
    let (a, b) = (byte_at(n / 3), byte_at(2 * n / 3));
    [&text[..a], &text[a..b], &text[b..]]
}

/// Merges per-section reports. Sections without findings are dropped; when none remain the
/// result is the canonical no-issues line.
pub fn aggregate_reports(reports: &[(&str, String)]) -> String {
    let findings: Vec<String> = reports
        .iter()
        .filter(|(_, r)| !is_no_issues(r))
        .map(|(label, r)| format!("[{label} section]\n{}", r.trim()))
        .collect();
    if findings.is_empty() {
        NO_ISSUES.to_string()
    } else {
        findings.join("\n\n")
    }
}

fn normalize_report(report: &str) -> String {
    if is_no_issues(report) {
        NO_ISSUES.to_string()
    } else {
        report.trim().to_string()
    }
}

/// Proof-reads a translation: one call for short pairs, at most three sampled calls when
/// the combined length is over `threshold` chars.
pub(crate) async fn review(
    translator: &Translator<'_>,
    source: &str,
    output: &str,
    source_lang: &str,
    target_lang: &str,
    threshold: usize,
    budget: &ChunkBudget,
) -> Result<String, PipelineError> {
    let system = build_qa_prompt(source_lang, target_lang);

    if char_len(source) + char_len(output) <= threshold {
        let report = translator
            .complete(Stage::Qa, &system, &qa_user_text(source, output))
            .await?;
        return Ok(normalize_report(&report));
    }

    let mut sections = sample_sections(source, output, budget);
    if sections.len() < 3 {
        // coarse chunking found too few boundaries; never send the whole pair
        sections = third_sections(source, output, budget.safe_chars());
    }
    tracing::info!(sections = sections.len(), "sampling QA sections");
    let calls = sections.iter().map(|s| {
        let system = system.as_str();
        async move {
            let user = qa_user_text(&s.source, &s.output);
            translator.complete(Stage::Qa, system, &user).await
        }
    });
    let mut reports = Vec::with_capacity(sections.len());
    for (section, result) in sections.iter().zip(join_all(calls).await) {
        reports.push((section.label, result?));
    }
    Ok(aggregate_reports(&reports))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{MockModel, MockReply};
    use crate::pipeline::config::RetryPolicy;

    fn para_doc(paragraphs: usize, width: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("<p>{}{}</p>\n", i % 10, "x".repeat(width)))
            .collect()
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    #[test]
    fn picks_first_middle_last() {
        let budget = ChunkBudget::new(100, 1.0, 1);
        let src = para_doc(10, 90);
        let out = para_doc(12, 90);
        let sections = sample_sections(&src, &out, &budget);
        let labels: Vec<&str> = sections.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["first", "middle", "last"]);
        assert!(sections[0].source.starts_with("<p>0"));
        assert!(sections[2].source.starts_with("<p>9"));
        assert!(sections[2].output.starts_with("<p>1"));
    }

    #[test]
    fn short_texts_give_fewer_sections() {
        let budget = ChunkBudget::new(100, 1.0, 1);
        let one = sample_sections("<p>a</p>", "<p>b</p>", &budget);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].label, "first");

        let src = para_doc(2, 90);
        let two = sample_sections(&src, &src, &budget);
        let labels: Vec<&str> = two.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["first", "last"]);
    }

    #[test]
    fn clean_sections_collapse_to_no_issues() {
        let reports = vec![
            ("first", "No issues found.".to_string()),
            ("middle", "".to_string()),
            ("last", "no issues found".to_string()),
        ];
        assert_eq!(aggregate_reports(&reports), NO_ISSUES);

        let reports = vec![
            ("first", "No issues found.".to_string()),
            ("last", "1. Привет -> Hallo".to_string()),
        ];
        assert_eq!(aggregate_reports(&reports), "[last section]\n1. Привет -> Hallo");
    }

    #[tokio::test]
    async fn short_pairs_use_one_call() {
        let model = MockModel::new(|_, _| MockReply::ok("No issues found"));
        let t = Translator::new(&model, "qa", retry());
        let budget = ChunkBudget::new(24_000, 0.25, 1_000);
        let report = review(&t, "<p>a</p>", "<p>b</p>", "Russian", "German", 20_000, &budget)
            .await
            .expect("qa");
        assert_eq!(report, NO_ISSUES);
        assert_eq!(model.calls(), 1);
        assert!(model.user_texts()[0].starts_with("ORIGINAL:\n<p>a</p>"));
    }

    #[tokio::test]
    async fn large_pairs_are_sampled_with_at_most_three_calls() {
        let model = MockModel::new(|_, _| MockReply::ok("No issues found."));
        let t = Translator::new(&model, "qa", retry());
        let budget = ChunkBudget::new(24_000, 0.25, 1_000);
        // 25 000 chars combined
        let src = para_doc(125, 91);
        let out = para_doc(125, 91);
        assert_eq!(char_len(&src) + char_len(&out), 25_000);
        let report = review(&t, &src, &out, "Russian", "German", 20_000, &budget)
            .await
            .expect("qa");
        assert_eq!(report, NO_ISSUES);
        assert!(model.calls() >= 1 && model.calls() <= 3);
        for user in model.user_texts() {
            assert!(char_len(&user) < char_len(&src));
        }
    }

    #[test]
    fn thirds_split_on_char_boundaries_and_respect_the_cap() {
        let src = "абвгдеёжз";
        let sections = third_sections(src, "abcdefghi", 2);
        let got: Vec<(&str, &str, &str)> = sections
            .iter()
            .map(|s| (s.label, s.source.as_str(), s.output.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![("first", "аб", "ab"), ("middle", "гд", "de"), ("last", "ёж", "gh")]
        );
    }

    #[tokio::test]
    async fn single_line_markup_is_still_sampled() {
        let model = MockModel::new(|_, _| MockReply::ok("No issues found."));
        let t = Translator::new(&model, "qa", retry());
        let budget = ChunkBudget::new(24_000, 0.25, 1_000);
        // no block tags and no newlines: coarse chunking yields one section
        let src = "<span>абв</span><br>".repeat(950);
        let out = "<span>abc</span><br>".repeat(950);
        assert_eq!(char_len(&src), 19_000);
        assert_eq!(split_html(&src, &budget).len(), 1);

        let report = review(&t, &src, &out, "Russian", "German", 20_000, &budget)
            .await
            .expect("qa");
        assert_eq!(report, NO_ISSUES);
        assert_eq!(model.calls(), 3);
        for user in model.user_texts() {
            assert!(!user.contains(&src));
            assert!(!user.contains(&out));
            assert!(char_len(&user) <= 2 * budget.safe_chars() + 100);
        }
    }

    #[tokio::test]
    async fn failed_section_fails_the_review() {
        let model = MockModel::new(|_, n| {
            if n == 1 {
                MockReply::err(crate::models::ModelError::Http {
                    status: 400,
                    body: "bad".into(),
                })
            } else {
                MockReply::ok("No issues found.")
            }
        });
        let t = Translator::new(&model, "qa", retry());
        let budget = ChunkBudget::new(100, 1.0, 1);
        let src = para_doc(10, 90);
        let err = review(&t, &src, &src, "Russian", "German", 10, &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { stage: Stage::Qa, .. }));
    }
}
