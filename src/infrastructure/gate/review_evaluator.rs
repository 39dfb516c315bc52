//! Evaluator backed by a caller's `GATE_REVIEW` line

use async_trait::async_trait;

use crate::domain::DomainError;
use crate::domain::gate::{CriterionEvidence, GateEvaluator, GateReview};

/// Applies one caller review to every criterion
#[derive(Debug, Clone)]
pub struct ReviewEvaluator {
    review: GateReview,
}

impl ReviewEvaluator {
    pub fn new(review: GateReview) -> Self {
        Self { review }
    }

    pub fn parse(text: &str) -> Result<Self, DomainError> {
        GateReview::parse(text).map(Self::new)
    }
}

#[async_trait]
impl GateEvaluator for ReviewEvaluator {
    async fn evaluate(
        &self,
        criteria: &[String],
        _output: &str,
    ) -> Result<Vec<CriterionEvidence>, DomainError> {
        Ok(criteria
            .iter()
            .map(|c| CriterionEvidence::new(c, self.review.passed, &self.review.reason))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_review_applies_to_all() {
        let evaluator = ReviewEvaluator::parse("GATE_REVIEW: FAIL - no benchmarks").unwrap();
        let result = evaluator
            .evaluate(&["a".to_string(), "b".to_string()], "output")
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|e| !e.satisfied));
        assert_eq!(result[1].evidence, "no benchmarks");
    }

    #[test]
    fn test_invalid_review() {
        assert!(ReviewEvaluator::parse("fine").is_err());
    }
}
