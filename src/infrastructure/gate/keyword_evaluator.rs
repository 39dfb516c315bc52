//! Keyword-overlap criterion evaluator

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::gate::{CriterionEvidence, GateEvaluator};

pub const DEFAULT_KEYWORD_THRESHOLD: f64 = 0.5;

const MIN_WORD_LENGTH: usize = 4;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "because", "been", "before", "being", "both",
    "does", "doing", "each", "every", "from", "have", "having", "into", "just", "least", "more",
    "most", "must", "only", "other", "over", "same", "should", "some", "such", "than", "that",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "under",
    "very", "were", "what", "when", "where", "which", "while", "will", "with", "without",
    "would", "your",
];

/// Satisfies a criterion when the output mentions enough of its significant words
#[derive(Debug, Clone)]
pub struct KeywordEvaluator {
    threshold: f64,
}

impl Default for KeywordEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD_THRESHOLD)
    }
}

impl KeywordEvaluator {
    /// Threshold is the fraction of significant words that must appear, clamped to 0..=1
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_KEYWORD_THRESHOLD
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn judge(&self, criterion: &str, output_words: &BTreeSet<String>, output_blank: bool) -> CriterionEvidence {
        let terms = significant_words(criterion);

        if terms.is_empty() {
            let evidence = if output_blank {
                "no significant terms and the output is empty"
            } else {
                "no significant terms to match"
            };
            return CriterionEvidence::new(criterion, !output_blank, evidence);
        }

        let (matched, missing): (Vec<&String>, Vec<&String>) =
            terms.iter().partition(|t| output_words.contains(*t));

        let ratio = matched.len() as f64 / terms.len() as f64;
        let satisfied = ratio >= self.threshold;

        let mut evidence = format!("matched {}/{} terms", matched.len(), terms.len());
        if !matched.is_empty() {
            evidence.push_str(&format!(": {}", join(&matched)));
        }
        if !missing.is_empty() {
            evidence.push_str(&format!("; missing: {}", join(&missing)));
        }

        CriterionEvidence::new(criterion, satisfied, evidence)
    }
}

#[async_trait]
impl GateEvaluator for KeywordEvaluator {
    async fn evaluate(
        &self,
        criteria: &[String],
        output: &str,
    ) -> Result<Vec<CriterionEvidence>, DomainError> {
        let output_words = words(output).collect::<BTreeSet<_>>();
        let output_blank = output.trim().is_empty();

        Ok(criteria
            .iter()
            .map(|c| self.judge(c, &output_words, output_blank))
            .collect())
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Distinct lowercase words of at least four characters that are not stop-words
fn significant_words(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();

    words(text)
        .filter(|w| w.chars().count() >= MIN_WORD_LENGTH && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

fn join(words: &[&String]) -> String {
    words
        .iter()
        .map(|w| w.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
