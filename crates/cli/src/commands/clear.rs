// `pagepatch clear`: delete every patch stored for a page.

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{close_session, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ClearArgs {
    #[command(flatten)]
    scope: ScopeArgs,

    /// Required; clearing cannot be undone.
    #[arg(long)]
    yes: bool,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResult {
    pub scope_key: String,
    pub removed: usize,
}

pub fn run(args: ClearArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match clear(&args) {
        Ok(result) => {
            output::print_output(format, &result, |r| {
                format!("Removed {} patch(es) from {}.", r.removed, r.scope_key)
            })?;
            Ok(())
        }
        Err(e) => {
            output::print_anyhow_error(format, &e);
            Err(e)
        }
    }
}

fn clear(args: &ClearArgs) -> anyhow::Result<ClearResult> {
    if !args.yes {
        anyhow::bail!("refusing to clear {} without --yes", args.scope.address);
    }
    let mut session = args.scope.open_session()?;
    let removed = session.clear_all()?;
    let scope_key = session.scope().key.clone();
    close_session(session)?;
    Ok(ClearResult { scope_key, removed })
}
