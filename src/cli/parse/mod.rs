//! Parse command - prints the steps of a chain expression

use clap::Args;

use crate::config::AppConfig;
use crate::domain::chain::{ChainExpression, ChainStepSpec, InlineGateSpec, looks_like_invocation};

#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Chain expression, e.g. ">>analyze --> >>implement :: 'has tests'"
    pub expression: String,

    /// Print the parsed chain as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse with the configured step limit
pub fn run(args: ParseArgs) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let chain = ChainExpression::parse_with_limit(&args.expression, config.engine.max_chain_steps)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&chain)?);
        return Ok(());
    }

    if !looks_like_invocation(&args.expression) {
        eprintln!("note: no '>>' or '-->' found, running as a single inline step");
    }

    for line in describe(&chain) {
        println!("{}", line);
    }

    Ok(())
}

fn describe(chain: &ChainExpression) -> Vec<String> {
    chain
        .steps()
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let (label, gates) = match step {
                ChainStepSpec::Prompt(p) => {
                    let mut args: Vec<String> = p.positional.iter().map(|a| format!("{:?}", a)).collect();
                    args.extend(p.named.iter().map(|(k, v)| format!("{}={:?}", k, v)));
                    let label = if args.is_empty() {
                        format!(">>{}", p.prompt_id)
                    } else {
                        format!(">>{} {}", p.prompt_id, args.join(" "))
                    };
                    (label, &p.gates)
                }
                ChainStepSpec::Inline(i) => (format!("inline {:?}", i.directive), &i.gates),
            };

            let gates: Vec<String> = gates
                .iter()
                .map(|g| match g {
                    InlineGateSpec::Criteria { text } => format!("{:?}", text),
                    InlineGateSpec::Reference { id } => id.to_string(),
                })
                .collect();

            if gates.is_empty() {
                format!("{}. {}", index + 1, label)
            } else {
                format!("{}. {}  gates: {}", index + 1, label, gates.join(", "))
            }
        })
        .collect()
}
