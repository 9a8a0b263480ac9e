//! ============================================================================
//! Outcome Classifier - Dialer signals → CRM disposition
//! ============================================================================
//! Maps talk time and free-text dialer status (term reason, status name,
//! disposition, call result) to a fixed disposition code and result label.
//!
//! Rules are an ordered table evaluated top to bottom, first match wins.
//! Positive talk time is checked before any text rule, so it always wins
//! over textual status.
//! ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{DispositionCode, Outcome, OutcomeSource};

static NO_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"no answer|noanswer|\bna\b").expect("valid no-answer pattern"));
static BUSY: Lazy<Regex> = Lazy::new(|| Regex::new(r"busy").expect("valid busy pattern"));
static LEFT_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"left|vm|voicemail|message").expect("valid message pattern"));

/// Raw outcome signals from the webhook and/or the dialer log
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals<'a> {
    pub talk_seconds: u64,
    pub term_reason: Option<&'a str>,
    pub status_name: Option<&'a str>,
    pub disposition: Option<&'a str>,
    pub call_result: Option<&'a str>,
}

/// Signals reduced to what the rules look at
#[derive(Debug, Clone)]
pub struct Evidence {
    pub talk_seconds: u64,
    /// Lowercased text fields joined by spaces
    pub text: String,
}

impl Evidence {
    pub fn from_signals(signals: &Signals<'_>) -> Self {
        let text = [
            signals.term_reason,
            signals.status_name,
            signals.disposition,
            signals.call_result,
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

        Self {
            talk_seconds: signals.talk_seconds,
            text,
        }
    }
}

/// One row of the classification table
pub struct Rule {
    pub name: &'static str,
    pub predicate: fn(&Evidence) -> bool,
    pub code: DispositionCode,
    pub label: &'static str,
    pub source: OutcomeSource,
}

impl Rule {
    fn outcome(&self) -> Outcome {
        Outcome::new(self.code, self.label, self.source)
    }
}

/// Classification table, in precedence order. The last rule always matches.
pub const RULES: &[Rule] = &[
    Rule {
        name: "no_signal",
        predicate: |e| e.talk_seconds == 0 && e.text.is_empty(),
        code: DispositionCode::Connected,
        label: "Logged",
        source: OutcomeSource::Default,
    },
    Rule {
        name: "talk_time",
        predicate: |e| e.talk_seconds > 0,
        code: DispositionCode::Connected,
        label: "Connected",
        source: OutcomeSource::Convoso,
    },
    Rule {
        name: "no_answer",
        predicate: |e| NO_ANSWER.is_match(&e.text),
        code: DispositionCode::NoAnswer,
        label: "No Answer",
        source: OutcomeSource::Convoso,
    },
    Rule {
        name: "busy",
        predicate: |e| BUSY.is_match(&e.text),
        code: DispositionCode::Busy,
        label: "Busy",
        source: OutcomeSource::Convoso,
    },
    Rule {
        name: "left_message",
        predicate: |e| LEFT_MESSAGE.is_match(&e.text),
        code: DispositionCode::LeftMessage,
        label: "Left Message",
        source: OutcomeSource::Convoso,
    },
    Rule {
        name: "other_signal",
        predicate: |_| true,
        code: DispositionCode::Connected,
        label: "Connected",
        source: OutcomeSource::Convoso,
    },
];

/// First rule in [`RULES`] that matches the signals
pub fn matching_rule(signals: &Signals<'_>) -> &'static Rule {
    let evidence = Evidence::from_signals(signals);
    RULES
        .iter()
        .find(|rule| (rule.predicate)(&evidence))
        .unwrap_or(&RULES[RULES.len() - 1])
}

pub fn classify(signals: &Signals<'_>) -> Outcome {
    matching_rule(signals).outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(talk_seconds: u64, status: &str) -> Signals<'_> {
        Signals {
            talk_seconds,
            status_name: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn test_talk_time_without_text() {
        let outcome = classify(&Signals {
            talk_seconds: 120,
            ..Default::default()
        });
        assert_eq!(
            outcome,
            Outcome::new(DispositionCode::Connected, "Connected", OutcomeSource::Convoso)
        );
    }

    #[test]
    fn test_no_answer_text() {
        let outcome = classify(&text(0, "No Answer - NA"));
        assert_eq!(
            outcome,
            Outcome::new(DispositionCode::NoAnswer, "No Answer", OutcomeSource::Convoso)
        );
    }

    #[test]
    fn test_no_signal_fallback() {
        let outcome = classify(&Signals::default());
        assert_eq!(
            outcome,
            Outcome::new(DispositionCode::Connected, "Logged", OutcomeSource::Default)
        );

        // whitespace-only text is still no signal
        assert_eq!(matching_rule(&text(0, "  ")).name, "no_signal");
    }

    #[test]
    fn test_left_voicemail() {
        let outcome = classify(&text(0, "Left VM"));
        assert_eq!(
            outcome,
            Outcome::new(DispositionCode::LeftMessage, "Left Message", OutcomeSource::Convoso)
        );
    }

    #[test]
    fn test_talk_time_beats_text() {
        assert_eq!(matching_rule(&text(35, "Left VM")).name, "talk_time");
        assert_eq!(matching_rule(&text(1, "No Answer")).name, "talk_time");
    }

    #[test]
    fn test_text_rule_order() {
        assert_eq!(matching_rule(&text(0, "BUSY")).name, "busy");
        assert_eq!(matching_rule(&text(0, "noanswer")).name, "no_answer");
        // no-answer outranks message wording
        assert_eq!(matching_rule(&text(0, "No answer, left message")).name, "no_answer");
        assert_eq!(matching_rule(&text(0, "Answering machine voicemail")).name, "left_message");
        assert_eq!(matching_rule(&text(0, "Sale")).name, "other_signal");
    }

    #[test]
    fn test_na_needs_word_boundary() {
        // "na" inside a word must not read as no-answer
        assert_eq!(matching_rule(&text(0, "Final sale")).name, "other_signal");
        assert_eq!(matching_rule(&text(0, "NA")).name, "no_answer");
    }

    #[test]
    fn test_signals_combine_all_text_fields() {
        let signals = Signals {
            talk_seconds: 0,
            term_reason: Some("AGENT"),
            status_name: None,
            disposition: Some("Busy Signal"),
            call_result: None,
        };
        assert_eq!(classify(&signals).disposition_code, DispositionCode::Busy);
    }
}
