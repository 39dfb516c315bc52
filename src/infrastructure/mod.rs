//! Infrastructure layer - Storage, evaluators, services and the chain executor

pub mod chain;
pub mod gate;
pub mod library;
pub mod logging;
pub mod observability;
pub mod prompt;
pub mod services;
pub mod storage;
