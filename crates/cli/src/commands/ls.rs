// `pagepatch ls`: list the patches stored for a page.

use clap::Args;
use pagepatch_common::types::Patch;
use serde::{Deserialize, Serialize};

use super::{close_session, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct LsArgs {
    #[command(flatten)]
    scope: ScopeArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsResult {
    pub scope_key: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

pub fn run(args: LsArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match list(&args.scope) {
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

fn list(scope: &ScopeArgs) -> anyhow::Result<LsResult> {
    let session = scope.open_session()?;
    let result =
        LsResult { scope_key: session.scope().key.clone(), patches: session.patches().to_vec() };
    close_session(session)?;
    Ok(result)
}

fn format_human(result: &LsResult) -> String {
    if result.patches.is_empty() {
        return format!("No patches stored for {}.", result.scope_key);
    }

    let mut lines = vec![format!("{} patch(es) for {}", result.patches.len(), result.scope_key)];
    for p in &result.patches {
        let kind = match &p.attribute_name {
            Some(name) => format!("{}[{name}]", p.kind),
            None => p.kind.to_string(),
        };
        let value = if p.value.is_empty() { String::new() } else { format!(" = {:?}", p.value) };
        lines.push(format!("  {}  {kind}  {}{value}", p.id, p.locator));
    }
    lines.join("\n")
}
