//! Validate command - checks library definition files

use tracing::info;

use crate::config::AppConfig;
use crate::infrastructure::library::LibraryLoader;
use crate::infrastructure::logging::init_logging;

/// Load every prompt and gate file and report problems; exits non-zero on any issue
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_logging(&config.logging);

    let loader = LibraryLoader::new(&config.library);
    info!(
        prompts_dir = %loader.prompts_dir().display(),
        gates_dir = %loader.gates_dir().display(),
        "Validating library"
    );

    let library = loader.load().await?;

    if library.is_empty() {
        println!("No definitions found");
        return Ok(());
    }

    for gate in &library.gates {
        println!("gate   {:<24} {}", gate.id(), gate.severity());
    }
    for prompt in &library.prompts {
        let gates: Vec<String> = prompt.gates().iter().map(ToString::to_string).collect();
        println!("prompt {:<24} gates: [{}]", prompt.id(), gates.join(", "));
    }
    println!(
        "{} prompts, {} gates OK",
        library.prompts.len(),
        library.gates.len()
    );

    Ok(())
}
