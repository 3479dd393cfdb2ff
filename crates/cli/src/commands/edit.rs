// `pagepatch edit`: edit nodes in a snapshot and store the edit for the page.

use std::path::PathBuf;

use clap::Args;
use pagepatch_common::types::PatchKind;
use pagepatch_engine::session::EditCommand;
use serde::{Deserialize, Serialize};

use super::{close_session, load_snapshot, select_nodes, write_snapshot, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct EditArgs {
    /// HTML snapshot of the page.
    pub snapshot: PathBuf,

    #[command(flatten)]
    scope: ScopeArgs,

    /// CSS selector picking the nodes to edit (pierces open shadow roots).
    #[arg(long)]
    select: String,

    /// Edit kind: set_text, set_html, set_attribute, append_style,
    /// replace_style, hide or remove.
    #[arg(long)]
    kind: String,

    /// Attribute name, for set_attribute.
    #[arg(long)]
    attr: Option<String>,

    /// New text, markup, attribute value or style declarations.
    #[arg(long, default_value = "")]
    value: String,

    /// Write the edited snapshot here.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub scope_key: String,
    pub committed: Vec<CommittedPatch>,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedPatch {
    pub id: String,
    pub locator: String,
}

pub fn run(args: EditArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match edit(&args) {
        Ok(result) => {
            if result.failed > 0 {
                output::print_warning(
                    format,
                    "EDIT_PARTIAL",
                    &format!("{} node(s) could not be edited", result.failed),
                );
            }
            output::print_output(format, &result, format_human)?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn edit(args: &EditArgs) -> anyhow::Result<EditResult> {
    let kind: PatchKind = args.kind.parse().map_err(anyhow::Error::msg)?;
    let command = EditCommand {
        kind,
        attribute_name: args.attr.clone(),
        value: args.value.clone(),
    };

    let mut doc = load_snapshot(&args.snapshot, &args.scope.address)?;
    let nodes = select_nodes(&doc, &args.select)?;
    let mut session = args.scope.open_session()?;
    let report = session.commit_edit(&mut doc, &nodes, &command)?;
    let scope_key = session.scope().key.clone();
    close_session(session)?;

    if let Some(out) = &args.out {
        write_snapshot(&doc, out)?;
    }
    Ok(EditResult {
        scope_key,
        committed: report
            .committed
            .iter()
            .map(|p| CommittedPatch { id: p.id.clone(), locator: p.locator.to_string() })
            .collect(),
        skipped: report.skipped,
        failed: report.failed,
    })
}

fn format_human(result: &EditResult) -> String {
    let mut lines = vec![format!("{} patch(es) stored for {}", result.committed.len(), result.scope_key)];
    for patch in &result.committed {
        lines.push(format!("  {}  {}", patch.id, patch.locator));
    }
    if result.skipped > 0 {
        lines.push(format!("  {} node(s) skipped", result.skipped));
    }
    lines.join("\n")
}
