// `pagepatch export`: write the page's patch set as an export document.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::{close_session, ScopeArgs};

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    scope: ScopeArgs,

    /// Write to this file instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

pub fn run(args: ExportArgs) -> anyhow::Result<()> {
    let json = export(&args.scope)?;
    match &args.out {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write export `{}`", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn export(scope: &ScopeArgs) -> anyhow::Result<String> {
    let session = scope.open_session()?;
    let json = session.export_json()?;
    close_session(session)?;
    Ok(json)
}
