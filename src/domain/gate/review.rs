//! Parsing of caller self-review lines: `GATE_REVIEW: PASS|FAIL - reason`

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

static REVIEW_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)GATE_REVIEW\s*:\s*(PASS|FAIL)\b\s*(?:[-:\x{2013}\x{2014}]\s*)?(.*)").unwrap()
});

/// A caller's verdict on its own step output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReview {
    pub passed: bool,
    pub reason: String,
}

impl GateReview {
    /// Find the first `GATE_REVIEW` line in free text
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let caps = REVIEW_PATTERN.captures(text).ok_or_else(|| {
            DomainError::validation(
                "gate_verdict must contain 'GATE_REVIEW: PASS - reason' or 'GATE_REVIEW: FAIL - reason'",
            )
        })?;

        let passed = caps[1].eq_ignore_ascii_case("pass");
        let reason = caps
            .get(2)
            .map(|m| m.as_str().lines().next().unwrap_or_default().trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| {
                if passed {
                    "caller review passed".to_string()
                } else {
                    "caller review failed".to_string()
                }
            });

        Ok(Self { passed, reason })
    }
}
