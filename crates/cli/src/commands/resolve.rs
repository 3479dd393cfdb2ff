// `pagepatch resolve`: show what a locator finds in a snapshot.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use pagepatch_common::locator::Locator;
use pagepatch_engine::config::EngineConfig;
use pagepatch_engine::locator::LocatorResolver;
use serde::{Deserialize, Serialize};

use super::{describe_node, load_snapshot};
use crate::exit_code::NoMatch;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// HTML snapshot to read.
    pub snapshot: PathBuf,

    /// Locator in display form: a CSS selector, an XPath starting with `/`,
    /// or `host >>> inner` for shadow content.
    pub locator: String,

    /// Page address, used to resolve relative links.
    #[arg(long, default_value = "https://localhost/")]
    address: String,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveResult {
    pub locator: Locator,
    pub matches: Vec<String>,
}

pub fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match resolve(&args) {
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

fn resolve(args: &ResolveArgs) -> anyhow::Result<ResolveResult> {
    let locator: Locator =
        args.locator.parse().with_context(|| format!("invalid locator `{}`", args.locator))?;
    let doc = load_snapshot(&args.snapshot, &args.address)?;
    let config = EngineConfig::load();

    let matches: Vec<String> = LocatorResolver::new(&doc)
        .with_max_depth(config.traversal.max_shadow_depth)
        .resolve_all(&locator)
        .into_iter()
        .map(|node| describe_node(&doc, node))
        .collect();
    if matches.is_empty() {
        return Err(NoMatch { query: args.locator.clone() }.into());
    }
    Ok(ResolveResult { locator, matches })
}

fn format_human(result: &ResolveResult) -> String {
    let mut lines = vec![format!("{} match(es) for {}", result.matches.len(), result.locator)];
    if result.matches.len() > 1 {
        lines.push("  warning: ambiguous, patches with this locator are skipped".into());
    }
    lines.extend(result.matches.iter().map(|m| format!("  {m}")));
    lines.join("\n")
}
