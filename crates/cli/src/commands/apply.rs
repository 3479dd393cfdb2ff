// `pagepatch apply`: reconcile a snapshot against the page's stored patches.

use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{close_session, load_snapshot, write_snapshot, ScopeArgs};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// HTML snapshot of the page.
    pub snapshot: PathBuf,

    #[command(flatten)]
    scope: ScopeArgs,

    /// Write the patched snapshot here.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub scope_key: String,
    pub patches: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn run(args: ApplyArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match apply(&args) {
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

fn apply(args: &ApplyArgs) -> anyhow::Result<ApplyResult> {
    let mut doc = load_snapshot(&args.snapshot, &args.scope.address)?;
    let mut session = args.scope.open_session()?;
    let summary = session.apply_all(&mut doc);
    let result = ApplyResult {
        scope_key: session.scope().key.clone(),
        patches: session.patches().len(),
        applied: summary.applied,
        skipped: summary.skipped,
        failed: summary.failed,
    };
    close_session(session)?;

    if let Some(out) = &args.out {
        write_snapshot(&doc, out)?;
    }
    Ok(result)
}

fn format_human(result: &ApplyResult) -> String {
    if result.patches == 0 {
        return format!("No patches stored for {}.", result.scope_key);
    }
    let mut line = format!(
        "{}: {} applied, {} skipped of {} patch(es)",
        result.scope_key, result.applied, result.skipped, result.patches
    );
    if result.failed > 0 {
        line.push_str(&format!(", {} failed", result.failed));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::select_nodes;
    use pagepatch_engine::session::{EditCommand, Session};
    use pagepatch_engine::store::SqliteKv;
    use tempfile::TempDir;

    const PAGE: &str = "<main><h1>Widget</h1><span id=price>$10</span></main>";

    fn scope(dir: &TempDir) -> ScopeArgs {
        ScopeArgs {
            address: "https://shop.test/item".into(),
            scope: None,
            store: Some(dir.path().join("store.db")),
            config: None,
        }
    }

    #[test]
    fn apply_to_fresh_snapshot_replays_stored_edits() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("page.html");
        std::fs::write(&original, PAGE).unwrap();

        // Edit a scratch copy; the stored patch is all that carries over.
        let kv = SqliteKv::open(dir.path().join("store.db")).unwrap();
        let mut session =
            Session::activate(kv, Default::default(), "https://shop.test/item", None).unwrap();
        let mut scratch = load_snapshot(&original, "https://shop.test/item").unwrap();
        let price = select_nodes(&scratch, "#price").unwrap();
        session.commit_edit(&mut scratch, &price, &EditCommand::set_text("$12")).unwrap();
        close_session(session).unwrap();

        let out = dir.path().join("patched.html");
        let args = ApplyArgs { snapshot: original, scope: scope(&dir), out: Some(out.clone()), json: true };
        let result = apply(&args).unwrap();
        assert_eq!(result.patches, 1);
        assert_eq!(result.applied, 1);
        assert!(std::fs::read_to_string(out).unwrap().contains(">$12</span>"));
    }

    #[test]
    fn human_format_summarizes() {
        let result = ApplyResult {
            scope_key: "https://shop.test/item".into(),
            patches: 3,
            applied: 1,
            skipped: 2,
            failed: 0,
        };
        assert_eq!(format_human(&result), "https://shop.test/item: 1 applied, 2 skipped of 3 patch(es)");

        let empty = ApplyResult { patches: 0, applied: 0, skipped: 0, ..result };
        assert!(format_human(&empty).starts_with("No patches stored"));
    }
}
