// CLI subcommand dispatch, plus the page and store arguments most commands share.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use pagepatch_common::types::ScopeGranularity;
use pagepatch_engine::config::{self, EngineConfig};
use pagepatch_engine::session::Session;
use pagepatch_engine::store::SqliteKv;
use pagepatch_engine::tree::query::TreeQuery;
use pagepatch_engine::tree::{Document, NodeId};
use tracing::debug;
use url::Url;

use crate::exit_code::NoMatch;

pub mod apply;
pub mod clear;
pub mod edit;
pub mod export;
pub mod import;
pub mod locate;
pub mod ls;
pub mod resolve;
pub mod rm;
pub mod scopes;

#[derive(Subcommand)]
pub enum Command {
    /// Print the locator each matching node would be stored under
    Locate(locate::LocateArgs),
    /// Show which nodes a stored-form locator finds in a snapshot
    Resolve(resolve::ResolveArgs),
    /// Edit matching nodes in a snapshot and store the edit as a patch
    Edit(edit::EditArgs),
    /// Apply every stored patch for the page to a snapshot
    Apply(apply::ApplyArgs),
    /// List stored patches for a page
    Ls(ls::LsArgs),
    /// Delete one stored patch
    Rm(rm::RmArgs),
    /// Write the page's patch set as JSON
    Export(export::ExportArgs),
    /// Replace the page's patch set from an export file
    Import(import::ImportArgs),
    /// Delete every patch stored for the page
    Clear(clear::ClearArgs),
    /// List every scope with stored patches
    Scopes(scopes::ScopesArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Locate(args) => locate::run(args),
        Command::Resolve(args) => resolve::run(args),
        Command::Edit(args) => edit::run(args),
        Command::Apply(args) => apply::run(args),
        Command::Ls(args) => ls::run(args),
        Command::Rm(args) => rm::run(args),
        Command::Export(args) => export::run(args),
        Command::Import(args) => import::run(args),
        Command::Clear(args) => clear::run(args),
        Command::Scopes(args) => scopes::run(args),
    }
}

// ── Shared arguments ───────────────────────────────────────────────

/// Which page's patch set to work on, and where it lives.
#[derive(Debug, Clone, Args)]
pub struct ScopeArgs {
    /// Page address the patches belong to.
    #[arg(long)]
    pub address: String,

    /// Scope granularity: origin, path or full.
    #[arg(long)]
    pub scope: Option<String>,

    /// Patch store database (default: ~/.pagepatch/store.db).
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Config file (default: ~/.pagepatch/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ScopeArgs {
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load_from(path)
                .with_context(|| format!("failed to load config `{}`", path.display())),
            None => Ok(EngineConfig::load()),
        }
    }

    pub fn granularity(&self) -> anyhow::Result<Option<ScopeGranularity>> {
        self.scope.as_deref().map(str::parse::<ScopeGranularity>).transpose().map_err(anyhow::Error::msg)
    }

    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store {
            Some(path) => Ok(path.clone()),
            None => config::store_path().context("cannot locate home directory; pass --store"),
        }
    }

    /// Open the store and activate a session for `--address`.
    pub fn open_session(&self) -> anyhow::Result<Session<SqliteKv>> {
        let config = self.engine_config()?;
        let path = self.store_path()?;
        debug!(store = %path.display(), address = %self.address, "opening patch store");
        let kv = SqliteKv::open(&path)?;
        Ok(Session::activate(kv, config, &self.address, self.granularity()?)?)
    }
}

/// Save any pending changes and release the store.
pub fn close_session(session: Session<SqliteKv>) -> anyhow::Result<()> {
    session.deactivate().context("failed to save patch set")?;
    Ok(())
}

// ── Snapshots ──────────────────────────────────────────────────────

/// Parse an HTML snapshot, resolving relative links against `address`.
pub fn load_snapshot(path: &Path, address: &str) -> anyhow::Result<Document> {
    let markup = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot `{}`", path.display()))?;
    let doc = Document::parse(&markup);
    Ok(match Url::parse(address) {
        Ok(base) => doc.with_base_url(base),
        Err(_) => doc,
    })
}

pub fn write_snapshot(doc: &Document, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, doc.inner_html(doc.root()))
        .with_context(|| format!("failed to write snapshot `{}`", path.display()))
}

/// Every node matching `selector`, shadow roots included.
pub fn select_nodes(doc: &Document, selector: &str) -> anyhow::Result<Vec<NodeId>> {
    let nodes = TreeQuery::new(doc).deep_query_all(doc.root(), selector)?;
    if nodes.is_empty() {
        return Err(NoMatch { query: selector.to_string() }.into());
    }
    Ok(nodes)
}

/// Short one-line description of an element, for listings.
pub fn describe_node(doc: &Document, node: NodeId) -> String {
    let Some(el) = doc.element(node) else {
        return node.to_string();
    };
    let mut out = el.tag().to_string();
    if let Some(id) = el.id() {
        out.push('#');
        out.push_str(id);
    }
    for class in el.classes().take(3) {
        out.push('.');
        out.push_str(class);
    }
    let text = doc.text_content(node);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        let preview: String = text.chars().take(40).collect();
        let ellipsis = if text.chars().count() > 40 { "…" } else { "" };
        out.push_str(&format!(" \"{preview}{ellipsis}\""));
    }
    out
}
