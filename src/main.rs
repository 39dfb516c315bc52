use clap::Parser;
use prompt_engine::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cli::serve::run().await,
        Command::Validate => cli::validate::run().await,
        Command::Parse(args) => cli::parse::run(args),
    }
}
