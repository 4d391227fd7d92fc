use pm_core::types::evaluation::clamp_score;
use pm_core::types::{Assessment, Extraction, Verdict};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{error, warn};

pub const FALLBACK_SCORE: u8 = 50;
pub const FALLBACK_SUMMARY: &str = "Could not parse the AI evaluation. Please try again.";
const DEFAULT_SCORE: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub assessment: Assessment,
    pub extraction: Extraction,
}

struct Patterns {
    structure: [Regex; 2],
    score: Regex,
    summary: Regex,
    verdict: Regex,
    legacy: Regex,
    percent: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            structure: [
                Regex::new(r"(?i)Score:[ \t]*-?\d+%")?,
                Regex::new(r"(?i)Verdict:[ \t]*(pass|conditional|borderline|fail)")?,
            ],
            score: Regex::new(r"(?i)Score:[ \t]*(-?\d+)%")?,
            summary: Regex::new(r"(?i)Summary:[ \t]*([^\n]*?)[ \t]*(?:Verdict:|\n|$)")?,
            verdict: Regex::new(r"(?i)Verdict:[ \t]*(pass|conditional|borderline|fail)")?,
            legacy: Regex::new(r"(-?\d+)%\s*\|\s*(.+)")?,
            percent: Regex::new(r"(-?\d+)%")?,
        })
    }
}

static PATTERNS: LazyLock<Option<Patterns>> = LazyLock::new(|| match Patterns::compile() {
    Ok(patterns) => Some(patterns),
    Err(err) => {
        error!("response patterns failed to compile: {err}");
        None
    }
});

type Strategy = fn(&Patterns, &str) -> Option<Assessment>;

/// Tried in order; the first strategy that yields an assessment wins.
const LADDER: [(Extraction, Strategy); 3] = [
    (Extraction::Template, template),
    (Extraction::Legacy, legacy),
    (Extraction::LastResort, last_resort),
];

/// True iff the text carries a score line, a non-empty summary line and a verdict line.
pub fn validate_structure(text: &str) -> bool {
    PATTERNS.as_ref().is_some_and(|patterns| {
        patterns.structure.iter().all(|re| re.is_match(text))
            && summary_line(patterns, text).is_some()
    })
}

/// Extracts an assessment from model output. Never fails: when no rung of the
/// ladder matches, the fixed fallback assessment is returned.
pub fn parse(text: &str) -> ParsedResponse {
    let Some(patterns) = PATTERNS.as_ref() else {
        return fallback();
    };
    for (extraction, strategy) in LADDER {
        if let Some(assessment) = strategy(patterns, text) {
            if extraction.is_degraded() {
                warn!(
                    extraction = ?extraction,
                    score = assessment.score_percent,
                    "AI response did not follow the template; used degraded extraction"
                );
            }
            return ParsedResponse {
                assessment,
                extraction,
            };
        }
    }
    warn!("AI response was empty; using fallback assessment");
    fallback()
}

pub fn fallback() -> ParsedResponse {
    ParsedResponse {
        assessment: Assessment {
            score_percent: FALLBACK_SCORE,
            summary: FALLBACK_SUMMARY.to_string(),
            verdict: Verdict::Borderline,
        },
        extraction: Extraction::Fallback,
    }
}

fn template(patterns: &Patterns, text: &str) -> Option<Assessment> {
    let score = capture(&patterns.score, text, 1).map(parse_score)?;
    let summary = summary_line(patterns, text)?;
    let verdict = capture(&patterns.verdict, text, 1).and_then(Verdict::from_token)?;
    Some(Assessment {
        score_percent: clamp_score(score),
        summary: summary.to_string(),
        verdict,
    })
}

/// The summary must sit on the `Summary:` line itself.
fn summary_line<'t>(patterns: &Patterns, text: &'t str) -> Option<&'t str> {
    capture(&patterns.summary, text, 1)
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
}

fn legacy(patterns: &Patterns, text: &str) -> Option<Assessment> {
    let captures = patterns.legacy.captures(text)?;
    let score = parse_score(captures.get(1)?.as_str());
    let summary = captures.get(2)?.as_str().trim();
    if summary.is_empty() {
        return None;
    }
    Some(Assessment::from_score(score, summary))
}

fn last_resort(patterns: &Patterns, text: &str) -> Option<Assessment> {
    let summary = text.trim();
    if summary.is_empty() {
        return None;
    }
    let score = capture(&patterns.percent, text, 1).map_or(DEFAULT_SCORE, parse_score);
    Some(Assessment::from_score(score, summary))
}

fn capture<'t>(re: &Regex, text: &'t str, group: usize) -> Option<&'t str> {
    re.captures(text)
        .and_then(|captures| captures.get(group))
        .map(|m| m.as_str())
}

/// Digit runs too long for `i64` saturate; clamping takes care of the rest.
fn parse_score(digits: &str) -> i64 {
    digits.parse::<i64>().unwrap_or(if digits.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_template() {
        let parsed = parse("Score: 72%\nSummary: Did X\nVerdict: borderline");
        assert_eq!(parsed.extraction, Extraction::Template);
        assert_eq!(parsed.assessment.score_percent, 72);
        assert_eq!(parsed.assessment.summary, "Did X");
        assert_eq!(parsed.assessment.verdict, Verdict::Borderline);
    }

    #[test]
    fn template_accepts_conditional_and_any_case() {
        let parsed = parse("score: 45%\nSUMMARY: Half done\nverdict: Conditional");
        assert_eq!(parsed.extraction, Extraction::Template);
        assert_eq!(parsed.assessment.score_percent, 45);
        assert_eq!(parsed.assessment.summary, "Half done");
        assert_eq!(parsed.assessment.verdict, Verdict::Borderline);
    }

    #[test]
    fn template_summary_stops_at_inline_verdict() {
        let parsed = parse("Score: 90% Summary: All shipped Verdict: pass");
        assert_eq!(parsed.extraction, Extraction::Template);
        assert_eq!(parsed.assessment.summary, "All shipped");
        assert_eq!(parsed.assessment.verdict, Verdict::Pass);
    }

    #[test]
    fn legacy_format_derives_verdict_from_score() {
        let parsed = parse("65% | Partial completion");
        assert_eq!(parsed.extraction, Extraction::Legacy);
        assert_eq!(parsed.assessment.score_percent, 65);
        assert_eq!(parsed.assessment.summary, "Partial completion");
        assert_eq!(parsed.assessment.verdict, Verdict::Borderline);
    }

    #[test]
    fn last_resort_uses_first_percentage_and_whole_text() {
        let parsed = parse("  around 40% done, maybe 60% by friday ");
        assert_eq!(parsed.extraction, Extraction::LastResort);
        assert_eq!(parsed.assessment.score_percent, 40);
        assert_eq!(parsed.assessment.summary, "around 40% done, maybe 60% by friday");
        assert_eq!(parsed.assessment.verdict, Verdict::Fail);
    }

    #[test]
    fn last_resort_defaults_to_fifty_without_a_percentage() {
        let parsed = parse("The task looks roughly on track.");
        assert_eq!(parsed.extraction, Extraction::LastResort);
        assert_eq!(parsed.assessment.score_percent, 50);
        assert_eq!(parsed.assessment.verdict, Verdict::Fail);
    }

    #[test]
    fn blank_text_yields_the_fixed_fallback() {
        let parsed = parse("   \n ");
        assert_eq!(parsed, fallback());
        assert_eq!(parsed.assessment.summary, FALLBACK_SUMMARY);
        assert_eq!(parsed.assessment.verdict, Verdict::Borderline);
    }

    #[test]
    fn scores_are_clamped() {
        let high = parse("Score: 150%\nSummary: Overachieved\nVerdict: pass");
        assert_eq!(high.assessment.score_percent, 100);
        let low = parse("Score: -20%\nSummary: Went backwards\nVerdict: fail");
        assert_eq!(low.assessment.score_percent, 0);
        let huge = parse("99999999999999999999999% | Off the charts");
        assert_eq!(huge.assessment.score_percent, 100);
        assert_eq!(huge.assessment.verdict, Verdict::Pass);
    }

    #[test]
    fn structure_gate() {
        assert!(validate_structure("Score: 80%\nSummary: Good\nVerdict: pass"));
        assert!(validate_structure("Score: 80%\nSummary: Good\nVerdict: CONDITIONAL"));
        assert!(!validate_structure("Score: 80%\nVerdict: pass"));
        assert!(!validate_structure("Score: eighty\nSummary: Good\nVerdict: pass"));
        assert!(!validate_structure("Score: 80%\nSummary: Good\nVerdict: maybe"));
        assert!(!validate_structure("65% | Partial completion"));
        assert!(!validate_structure("Score: 80%\nSummary:\nVerdict: pass"));
        assert!(!validate_structure("Score: 80%\nSummary:   \nVerdict: pass"));
        assert!(!validate_structure("Score:\n80%\nSummary: Good\nVerdict: pass"));
    }

    #[test]
    fn empty_summary_line_is_not_filled_from_the_next_line() {
        let parsed = parse("Score: 80%\nSummary:\nVerdict: pass");
        assert_ne!(parsed.extraction, Extraction::Template);
        assert_ne!(parsed.assessment.summary, "Verdict: pass");
        assert_eq!(parsed.extraction, Extraction::LastResort);
        assert_eq!(parsed.assessment.score_percent, 80);
    }
}
