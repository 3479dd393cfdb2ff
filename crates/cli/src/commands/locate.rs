// `pagepatch locate`: show the locator an edit on each matching node would store.

use std::path::PathBuf;

use clap::Args;
use pagepatch_engine::config::EngineConfig;
use pagepatch_engine::locator::LocatorSynthesizer;
use serde::{Deserialize, Serialize};

use super::{describe_node, load_snapshot, select_nodes};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct LocateArgs {
    /// HTML snapshot to read.
    pub snapshot: PathBuf,

    /// CSS selector picking the nodes to locate (pierces open shadow roots).
    #[arg(long)]
    select: String,

    /// Page address, used to resolve relative links.
    #[arg(long, default_value = "https://localhost/")]
    address: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateResult {
    pub nodes: Vec<LocatedNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatedNode {
    pub node: String,
    pub locator: String,
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(args: LocateArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match locate(&args) {
        Ok(result) => {
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn locate(args: &LocateArgs) -> anyhow::Result<LocateResult> {
    let config = EngineConfig::load();
    let doc = load_snapshot(&args.snapshot, &args.address)?;
    let mut synthesizer =
        LocatorSynthesizer::with_limits(config.locator.max_climb_depth, config.traversal.max_shadow_depth);

    let nodes = select_nodes(&doc, &args.select)?
        .into_iter()
        .map(|node| match synthesizer.synthesize_detailed(&doc, node) {
            Ok(found) => LocatedNode {
                node: describe_node(&doc, node),
                locator: found.locator.to_string(),
                strategy: Some(found.strategy.as_str().to_string()),
                error: None,
            },
            Err(e) => LocatedNode {
                node: describe_node(&doc, node),
                locator: String::new(),
                strategy: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Ok(LocateResult { nodes })
}

fn format_human(result: &LocateResult) -> String {
    let mut lines = Vec::new();
    for entry in &result.nodes {
        match (&entry.error, &entry.strategy) {
            (Some(error), _) => lines.push(format!("{}\n  cannot address: {error}", entry.node)),
            (None, Some(strategy)) => {
                lines.push(format!("{}\n  {} ({strategy})", entry.node, entry.locator))
            }
            (None, None) => lines.push(format!("{}\n  {}", entry.node, entry.locator)),
        }
    }
    lines.join("\n")
}
