// `pagepatch rm`: delete one stored patch by id.

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{close_session, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RmArgs {
    /// Id of the patch to delete (see `pagepatch ls`).
    pub id: String,

    #[command(flatten)]
    scope: ScopeArgs,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmResult {
    pub id: String,
    pub locator: String,
    pub remaining: usize,
}

pub fn run(args: RmArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match remove(&args) {
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

fn remove(args: &RmArgs) -> anyhow::Result<RmResult> {
    let mut session = args.scope.open_session()?;
    let Some(removed) = session.forget_patch(&args.id) else {
        anyhow::bail!("no patch with id `{}` in {}", args.id, session.scope().key);
    };
    let result = RmResult {
        id: removed.id,
        locator: removed.locator.to_string(),
        remaining: session.patches().len(),
    };
    close_session(session)?;
    Ok(result)
}

fn format_human(result: &RmResult) -> String {
    format!("Deleted {} ({}); {} patch(es) left.", result.id, result.locator, result.remaining)
}
