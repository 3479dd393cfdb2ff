// `pagepatch scopes`: list every scope with stored patches.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use pagepatch_common::types::{StoredPatchSet, PATCH_STORE_PREFIX};
use pagepatch_engine::config;
use pagepatch_engine::store::{KeyValueStore, SqliteKv};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ScopesArgs {
    /// Patch store database (default: ~/.pagepatch/store.db).
    #[arg(long)]
    store: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopesResult {
    pub scopes: Vec<ScopeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub scope_key: String,
    pub granularity: String,
    pub patches: usize,
}

pub fn run(args: ScopesArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    match open_store(&args).and_then(|kv| list_scopes(&kv)) {
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

fn open_store(args: &ScopesArgs) -> anyhow::Result<SqliteKv> {
    let path = match &args.store {
        Some(path) => path.clone(),
        None => config::store_path().context("cannot locate home directory; pass --store")?,
    };
    SqliteKv::open(path)
}

fn list_scopes(kv: &dyn KeyValueStore) -> anyhow::Result<ScopesResult> {
    let mut scopes = Vec::new();
    for key in kv.keys_with_prefix(PATCH_STORE_PREFIX)? {
        let Some(raw) = kv.get(&key)? else { continue };
        match serde_json::from_str::<StoredPatchSet>(&raw) {
            Ok(set) => scopes.push(ScopeEntry {
                scope_key: set.scope_key,
                granularity: set.scope.to_string(),
                patches: set.patches.len(),
            }),
            Err(e) => warn!(key = %key, error = %e, "skipping unreadable patch set"),
        }
    }
    Ok(ScopesResult { scopes })
}

fn format_human(result: &ScopesResult) -> String {
    if result.scopes.is_empty() {
        return "No stored patches.".into();
    }
    let mut lines = vec![format!("{} scope(s)", result.scopes.len())];
    for s in &result.scopes {
        lines.push(format!("  {} [{}] {} patch(es)", s.scope_key, s.granularity, s.patches));
    }
    lines.join("\n")
}
