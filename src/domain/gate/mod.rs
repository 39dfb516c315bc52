//! Gate validator domain - quality gates, verdicts and evaluation seams

mod entity;
mod evaluator;
mod repository;
mod review;
mod suggestion;
mod verdict;

pub use entity::{Gate, GateId, PassCriteria, Severity};
pub use evaluator::{GateEvaluator, GateValidator};
pub use repository::GateRepository;
pub use review::GateReview;
pub use suggestion::{GateSuggestion, MAX_SUGGESTIONS, suggest_gates};
pub use verdict::{CriterionEvidence, GateVerdict, VerdictSource};

#[cfg(test)]
pub use evaluator::MockGateEvaluator;
#[cfg(test)]
pub use repository::MockGateRepository;
