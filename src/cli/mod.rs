//! CLI module for the prompt engine
//!
//! Subcommands:
//! - `serve`: run the HTTP tool server (default deployment)
//! - `validate`: check the prompt and gate library without starting anything
//! - `parse`: show how a chain expression is understood

pub mod parse;
pub mod serve;
pub mod validate;

use clap::{Parser, Subcommand};

/// Prompt Engine - prompt registry, chain execution and quality gates
#[derive(Parser)]
#[command(name = "prompt-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP tool server
    Serve,

    /// Validate the prompt and gate library files
    Validate,

    /// Parse a chain expression and print its steps
    Parse(parse::ParseArgs),
}
