//! Chain execution infrastructure

mod deferred_runner;
mod executor_impl;

pub use deferred_runner::DeferredStepRunner;
pub use executor_impl::{ChainExecutorConfig, ChainExecutorImpl};
