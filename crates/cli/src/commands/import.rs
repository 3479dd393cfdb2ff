// `pagepatch import`: replace the page's patch set from an export document.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{close_session, load_snapshot, write_snapshot, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Export document to read.
    pub file: PathBuf,

    #[command(flatten)]
    scope: ScopeArgs,

    /// Snapshot to apply the imported set to.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write the patched snapshot here (needs --snapshot).
    #[arg(long, requires = "snapshot")]
    out: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub scope_key: String,
    pub imported: usize,
    pub applied: usize,
}

pub fn run(args: ImportArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match import(&args) {
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

fn import(args: &ImportArgs) -> anyhow::Result<ImportResult> {
    let payload = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read import file `{}`", args.file.display()))?;
    let mut doc = match &args.snapshot {
        Some(path) => load_snapshot(path, &args.scope.address)?,
        None => pagepatch_engine::Document::new(),
    };

    let mut session = args.scope.open_session()?;
    let report = session.import(&mut doc, &payload)?;
    let scope_key = session.scope().key.clone();
    close_session(session)?;

    if let Some(out) = &args.out {
        write_snapshot(&doc, out)?;
    }
    Ok(ImportResult { scope_key, imported: report.imported, applied: report.applied.applied })
}

fn format_human(result: &ImportResult) -> String {
    format!(
        "Imported {} patch(es) into {} ({} applied).",
        result.imported, result.scope_key, result.applied
    )
}
