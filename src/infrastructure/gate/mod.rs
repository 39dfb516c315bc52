//! Gate infrastructure - persistence and built-in evaluators

mod keyword_evaluator;
mod review_evaluator;
mod storage_repository;

pub use keyword_evaluator::{DEFAULT_KEYWORD_THRESHOLD, KeywordEvaluator};
pub use review_evaluator::ReviewEvaluator;
pub use storage_repository::StorageGateRepository;
