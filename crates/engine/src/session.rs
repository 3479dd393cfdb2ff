// Session: the explicit context for one active scope.
//
// Owns the patch store, locator/applier caches, undo history and the
// debounced persistence state. Created on scope activation, dropped (after a
// flush) on deactivation.

use std::collections::HashSet;

use pagepatch_common::locator::Locator;
use pagepatch_common::scope::{PageScope, ScopeError};
use pagepatch_common::transfer::{build_export, parse_import, ImportError};
use pagepatch_common::types::{Patch, PatchError, PatchExport, PatchKind, ScopeGranularity};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::apply::{mark_pending, ApplyMode, ApplyOutcome, ApplySummary, Applier, SkipReason};
use crate::config::EngineConfig;
use crate::locator::{LocatorResolver, LocatorSynthesizer, SynthesisError};
use crate::store::{KeyValueStore, PatchStore, PersistScheduler, UpsertOutcome};
use crate::tree::query::{is_addressable, is_self_originated};
use crate::tree::{Document, MutationRecord, NodeId};
use crate::undo::{revert_entry, PatchGroup, PreImage, RevertOutcome, UndoEntry, UndoManager};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("invalid edit: {0}")]
    InvalidEdit(#[from] PatchError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("failed to encode export: {0}")]
    Export(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// An operator edit, before it is bound to any node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCommand {
    pub kind: PatchKind,
    pub attribute_name: Option<String>,
    pub value: String,
}

impl EditCommand {
    fn new(kind: PatchKind, value: impl Into<String>) -> Self {
        Self { kind, attribute_name: None, value: value.into() }
    }

    pub fn set_text(text: impl Into<String>) -> Self {
        Self::new(PatchKind::SetText, text)
    }

    pub fn set_html(markup: impl Into<String>) -> Self {
        Self::new(PatchKind::SetHtml, markup)
    }

    pub fn set_attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { attribute_name: Some(name.into()), ..Self::new(PatchKind::SetAttribute, value) }
    }

    pub fn append_style(declarations: impl Into<String>) -> Self {
        Self::new(PatchKind::AppendStyle, declarations)
    }

    pub fn replace_style(declarations: impl Into<String>) -> Self {
        Self::new(PatchKind::ReplaceStyle, declarations)
    }

    pub fn hide() -> Self {
        Self::new(PatchKind::Hide, "")
    }

    pub fn remove() -> Self {
        Self::new(PatchKind::Remove, "")
    }

    /// Bind the command to a located node.
    pub fn to_patch(&self, locator: Locator) -> Patch {
        let patch = Patch::new(locator, self.kind, self.value.clone());
        match &self.attribute_name {
            Some(name) => patch.with_attribute(name.clone()),
            None => patch,
        }
    }

    /// Check the command's own fields, independent of any target.
    pub fn validate(&self) -> Result<(), PatchError> {
        self.to_patch(Locator::css("*")).validate()
    }
}

/// Result of one committed edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Stored patches the edit produced, in node order.
    pub committed: Vec<Patch>,
    /// Nodes that were detached, not addressable, or not elements.
    pub skipped: usize,
    /// Nodes whose mutation failed; they keep the pending marker.
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UndoReport {
    pub outcomes: Vec<RevertOutcome>,
    /// Entries whose tree restore raised an error.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub imported: usize,
    pub applied: ApplySummary,
}

pub struct Session<S: KeyValueStore> {
    config: EngineConfig,
    kv: S,
    store: PatchStore,
    synthesizer: LocatorSynthesizer,
    applier: Applier,
    undo: UndoManager,
    persist: PersistScheduler,
}

impl<S: KeyValueStore> Session<S> {
    /// Derive the scope for `address` and load its stored set. The caller
    /// runs a full apply (or the boot sequence) next.
    pub fn activate(
        kv: S,
        config: EngineConfig,
        address: &str,
        granularity: Option<ScopeGranularity>,
    ) -> Result<Self, SessionError> {
        let scope = PageScope::from_address(address, granularity.unwrap_or(config.scope.granularity))?;
        let store = PatchStore::load(&kv, scope)?;
        info!(scope = %store.scope().key, patches = store.len(), "session activated");
        Ok(Self {
            synthesizer: LocatorSynthesizer::with_limits(
                config.locator.max_climb_depth,
                config.traversal.max_shadow_depth,
            ),
            applier: Applier::new(config.traversal.max_shadow_depth),
            undo: UndoManager::new(config.undo.capacity),
            persist: PersistScheduler::new(config.persist_debounce()),
            config,
            kv,
            store,
        })
    }

    /// Flush pending saves and hand the backend back.
    pub fn deactivate(mut self) -> Result<S, SessionError> {
        self.flush_persistence()?;
        info!(scope = %self.store.scope().key, "session deactivated");
        Ok(self.kv)
    }

    /// Swap to another scope: save the current one, load the new set and
    /// re-apply it from scratch.
    pub fn switch_scope(
        &mut self,
        doc: &mut Document,
        address: &str,
        granularity: Option<ScopeGranularity>,
    ) -> Result<ApplySummary, SessionError> {
        let scope =
            PageScope::from_address(address, granularity.unwrap_or(self.config.scope.granularity))?;
        self.flush_persistence()?;
        if &scope != self.store.scope() {
            self.store = PatchStore::load(&self.kv, scope)?;
            self.undo.clear();
            info!(scope = %self.store.scope().key, patches = self.store.len(), "scope switched");
        }
        self.synthesizer.clear_cache();
        self.applier.clear_cache();
        Ok(self.apply_all(doc))
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scope(&self) -> &PageScope {
        self.store.scope()
    }

    pub fn patches(&self) -> &[Patch] {
        self.store.patches()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    // ── Locators ───────────────────────────────────────────────────

    pub fn synthesize(&mut self, doc: &Document, node: NodeId) -> Result<Locator, SynthesisError> {
        self.synthesizer.synthesize(doc, node)
    }

    pub fn resolve_all(&self, doc: &Document, locator: &Locator) -> Vec<NodeId> {
        LocatorResolver::new(doc)
            .with_max_depth(self.config.traversal.max_shadow_depth)
            .resolve_all(locator)
    }

    // ── Edits ──────────────────────────────────────────────────────

    /// Commit `edit` against every node in `nodes` as one undo group.
    ///
    /// All locators and pre-images are taken before the first mutation, so
    /// an edit that reshapes the tree cannot disturb its later targets'
    /// addresses.
    pub fn commit_edit(
        &mut self,
        doc: &mut Document,
        nodes: &[NodeId],
        edit: &EditCommand,
    ) -> Result<CommitReport, SessionError> {
        edit.validate()?;
        let mut report = CommitReport::default();

        let mut seen = HashSet::new();
        let mut prepared = Vec::new();
        for &node in nodes {
            if !seen.insert(node) {
                continue;
            }
            if !doc.is_attached(node) || !is_addressable(doc, node) {
                report.skipped += 1;
                continue;
            }
            let locator = match self.synthesizer.synthesize(doc, node) {
                Ok(locator) => locator,
                Err(e) => {
                    debug!(node = %node, error = %e, "cannot address edit target");
                    report.skipped += 1;
                    continue;
                }
            };
            let patch = edit.to_patch(locator);
            let pre_image = PreImage::capture(doc, node, edit.kind, edit.attribute_name.as_deref());
            prepared.push((node, patch, pre_image));
        }

        let mut entries = Vec::new();
        for (node, patch, pre_image) in prepared {
            if !doc.is_attached(node) {
                report.skipped += 1;
                continue;
            }
            if let Err(e) = mark_pending(doc, node) {
                warn!(node = %node, error = %e, "failed to mark edit target");
                report.failed += 1;
                continue;
            }
            match self.applier.apply_to_node(doc, node, &patch, ApplyMode::Direct) {
                ApplyOutcome::Applied | ApplyOutcome::Skipped(SkipReason::AlreadyApplied) => {}
                ApplyOutcome::Skipped(reason) => {
                    debug!(node = %node, reason = reason.as_str(), "edit target skipped");
                    report.skipped += 1;
                    continue;
                }
                ApplyOutcome::Failed(e) => {
                    warn!(node = %node, error = %e, "edit failed to apply");
                    report.failed += 1;
                    continue;
                }
            }
            if patch.kind != PatchKind::Remove {
                self.applier.remember(&patch, node);
            }

            let superseded = match self.store.upsert(patch.clone()) {
                UpsertOutcome::Inserted => None,
                UpsertOutcome::Replaced { previous } => Some(previous),
            };
            if let Some(stored) = self.store.find_by_key(&patch.key()) {
                report.committed.push(stored.clone());
            }
            entries.push(UndoEntry { patch, pre_image, node: Some(node), superseded });
        }

        if !entries.is_empty() {
            self.undo.push(PatchGroup::new(entries));
            self.persist.request_at(Instant::now());
        }
        self.synthesizer.clear_cache();
        debug!(
            kind = %edit.kind,
            committed = report.committed.len(),
            skipped = report.skipped,
            failed = report.failed,
            "edit committed"
        );
        Ok(report)
    }

    /// Revert the most recent edit group. `None` when history is empty.
    pub fn undo_last(&mut self, doc: &mut Document) -> Option<UndoReport> {
        let group = self.undo.pop()?;
        let mut report = UndoReport::default();
        let max_depth = self.config.traversal.max_shadow_depth;

        for entry in group.entries.iter().rev() {
            match revert_entry(doc, entry, max_depth) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    warn!(locator = %entry.patch.locator, error = %e, "undo could not restore node");
                    report.failed += 1;
                }
            }
            self.store.remove_key(&entry.patch.key());
            if let Some(previous) = &entry.superseded {
                self.store.restore(previous.clone());
            }
        }

        self.synthesizer.clear_cache();
        self.applier.clear_cache();
        self.persist.request_at(Instant::now());
        debug!(entries = group.entries.len(), remaining = self.undo.len(), "undid edit group");
        Some(report)
    }

    /// Delete one stored patch and re-apply the rest.
    pub fn delete_patch(&mut self, doc: &mut Document, id: &str) -> Option<Patch> {
        let removed = self.forget_patch(id)?;
        self.apply_all(doc);
        Some(removed)
    }

    /// Delete one stored patch without touching any tree.
    pub fn forget_patch(&mut self, id: &str) -> Option<Patch> {
        let removed = self.store.remove(id)?;
        self.persist.request_at(Instant::now());
        self.applier.clear_cache();
        debug!(id, kind = %removed.kind, "deleted patch");
        Some(removed)
    }

    /// Drop every patch in the scope, in memory and in storage.
    pub fn clear_all(&mut self) -> Result<usize, SessionError> {
        let count = self.store.len();
        self.persist.cancel();
        self.store.clear_persisted(&mut self.kv)?;
        self.undo.clear();
        self.applier.clear_cache();
        info!(scope = %self.store.scope().key, removed = count, "cleared all patches");
        Ok(count)
    }

    // ── Import / export ────────────────────────────────────────────

    pub fn export(&self) -> PatchExport {
        let scope = self.store.scope();
        build_export(scope.granularity, &scope.key, self.store.patches())
    }

    pub fn export_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Replace the scope's patch set with an imported one. Nothing changes
    /// unless the whole payload validates.
    pub fn import(&mut self, doc: &mut Document, payload: &str) -> Result<ImportReport, SessionError> {
        let imported = parse_import(payload)?;
        if let Some(source) = imported.scope_key.as_deref().filter(|k| *k != self.store.scope().key) {
            debug!(source, target = %self.store.scope().key, "importing patches from another scope");
        }

        self.store.replace_all(imported.patches);
        self.persist.cancel();
        self.store.persist(&mut self.kv)?;
        self.undo.clear();
        self.synthesizer.clear_cache();
        self.applier.clear_cache();

        let applied = self.apply_all(doc);
        info!(imported = self.store.len(), applied = applied.applied, "imported patch set");
        Ok(ImportReport { imported: self.store.len(), applied })
    }

    // ── Reconciliation ─────────────────────────────────────────────

    pub fn apply_all(&mut self, doc: &mut Document) -> ApplySummary {
        self.applier.apply_all(doc, self.store.patches())
    }

    /// Whether a mutation batch warrants a reconciliation pass. Batches
    /// that only touch the tool's own subtree are ignored.
    pub fn on_mutations(&self, doc: &Document, batch: &[MutationRecord]) -> bool {
        if self.store.is_empty() {
            return false;
        }
        batch.iter().any(|m| doc.contains(m.target) && !is_self_originated(doc, m.target))
    }

    // ── Persistence ────────────────────────────────────────────────

    pub fn persist_deadline(&self) -> Option<Instant> {
        self.persist.deadline()
    }

    pub fn persist_pending(&self) -> bool {
        self.persist.is_pending()
    }

    /// Run a scheduled save if its quiet window has passed.
    pub fn poll_persistence(&mut self, now: Instant) -> Result<bool, SessionError> {
        if !self.persist.begin_due_at(now) {
            return Ok(false);
        }
        if let Err(e) = self.store.persist(&mut self.kv) {
            self.persist.fail_at(now);
            return Err(e.into());
        }
        self.persist.complete_at(now);
        Ok(true)
    }

    /// Save now if anything is scheduled.
    pub fn flush_persistence(&mut self) -> Result<bool, SessionError> {
        if !self.persist.is_pending() || !self.persist.begin_now() {
            return Ok(false);
        }
        if let Err(e) = self.store.persist(&mut self.kv) {
            self.persist.fail_at(Instant::now());
            return Err(e.into());
        }
        self.persist.complete_at(Instant::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::store::MemoryKv;
    use crate::tree::query::TreeQuery;

    const ADDRESS: &str = "https://shop.test/item?id=7#reviews";

    fn session() -> Session<MemoryKv> {
        Session::activate(MemoryKv::new(), EngineConfig::default(), ADDRESS, None).unwrap()
    }

    fn find(doc: &Document, selector: &str) -> NodeId {
        TreeQuery::new(doc).deep_query_first(doc.root(), selector).unwrap().unwrap()
    }

    #[test]
    fn activate_derives_scope_without_fragment() {
        let s = session();
        assert_eq!(s.scope().key, "https://shop.test/item?id=7");
        let origin =
            Session::activate(MemoryKv::new(), EngineConfig::default(), ADDRESS, Some(ScopeGranularity::Origin))
                .unwrap();
        assert_eq!(origin.scope().key, "https://shop.test");
        assert!(matches!(
            Session::activate(MemoryKv::new(), EngineConfig::default(), "not a url", None),
            Err(SessionError::Scope(_))
        ));
    }

    #[test]
    fn commit_applies_stores_and_schedules_save() {
        let mut doc = Document::parse("<body><span id=price>$10</span></body>");
        let mut s = session();
        let price = find(&doc, "#price");

        let report = s.commit_edit(&mut doc, &[price], &EditCommand::set_text("$12")).unwrap();
        assert_eq!(report.committed.len(), 1);
        assert_eq!(report.committed[0].locator, Locator::css("#price"));
        assert_eq!(doc.text_content(price), "$12");
        assert_eq!(doc.attr(price, "data-pagepatch-pending"), None);
        assert_eq!(s.undo_depth(), 1);
        assert!(s.persist_deadline().is_some());
        assert_eq!(s.kv().writes(), 0);

        assert!(s.flush_persistence().unwrap());
        assert_eq!(s.kv().writes(), 1);
    }

    #[test]
    fn invalid_edit_is_rejected_before_touching_the_tree() {
        let mut doc = Document::parse("<p id=t>x</p>");
        let mut s = session();
        let p = find(&doc, "#t");
        let err = s.commit_edit(&mut doc, &[p], &EditCommand::set_attribute(" ", "v")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidEdit(PatchError::MissingAttributeName)));
        assert_eq!(doc.attr(p, "data-pagepatch-pending"), None);
        assert!(s.patches().is_empty());
    }

    #[test]
    fn multi_node_edit_is_one_undo_group() {
        let mut doc = Document::parse("<ul><li class=a>1</li><li class=b>2</li><style>li{}</style></ul>");
        let mut s = session();
        let nodes = [find(&doc, ".a"), find(&doc, ".b"), find(&doc, "style"), find(&doc, ".a")];

        let report = s.commit_edit(&mut doc, &nodes, &EditCommand::hide()).unwrap();
        assert_eq!(report.committed.len(), 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(s.undo_depth(), 1);

        let undo = s.undo_last(&mut doc).unwrap();
        assert_eq!(undo.outcomes, vec![RevertOutcome::Restored, RevertOutcome::Restored]);
        assert_eq!(doc.attr(nodes[0], "style"), None);
        assert!(s.patches().is_empty());
        assert!(s.undo_last(&mut doc).is_none());
    }

    #[test]
    fn undo_reinstates_superseded_patch() {
        let mut doc = Document::parse("<span id=price>$10</span>");
        let mut s = session();
        let price = find(&doc, "#price");
        s.commit_edit(&mut doc, &[price], &EditCommand::set_text("$12")).unwrap();
        s.commit_edit(&mut doc, &[price], &EditCommand::set_text("$15")).unwrap();
        assert_eq!(s.patches().len(), 1);

        s.undo_last(&mut doc).unwrap();
        assert_eq!(doc.text_content(price), "$12");
        assert_eq!(s.patches().len(), 1);
        assert_eq!(s.patches()[0].value, "$12");
    }

    #[test]
    fn delete_and_clear() {
        let mut doc = Document::parse("<p id=a>a</p><p id=b>b</p>");
        let mut s = session();
        let a = find(&doc, "#a");
        let b = find(&doc, "#b");
        s.commit_edit(&mut doc, &[a], &EditCommand::set_text("A")).unwrap();
        s.commit_edit(&mut doc, &[b], &EditCommand::set_text("B")).unwrap();
        s.flush_persistence().unwrap();

        let id = s.patches()[0].id.clone();
        assert_eq!(s.delete_patch(&mut doc, &id).map(|p| p.value), Some("A".to_string()));
        assert!(s.delete_patch(&mut doc, "nope").is_none());
        assert_eq!(s.patches().len(), 1);

        assert_eq!(s.clear_all().unwrap(), 1);
        assert!(s.patches().is_empty());
        assert!(s.kv().is_empty());
        assert_eq!(s.undo_depth(), 0);
    }

    #[test]
    fn import_validates_before_replacing() {
        let mut doc = Document::parse("<span id=price>$10</span>");
        let mut s = session();
        let price = find(&doc, "#price");
        s.commit_edit(&mut doc, &[price], &EditCommand::set_text("$12")).unwrap();

        let err = s.import(&mut doc, r#"{"patches":"not-a-list"}"#).unwrap_err();
        assert!(matches!(err, SessionError::Import(ImportError::PatchesNotAList)));
        assert_eq!(s.patches().len(), 1);

        let mut other = Session::activate(MemoryKv::new(), EngineConfig::default(), ADDRESS, None).unwrap();
        let mut fresh_doc = Document::parse("<span id=price>$10</span>");
        let json = s.export_json().unwrap();
        let report = other.import(&mut fresh_doc, &json).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.applied.applied, 1);
        assert_eq!(fresh_doc.text_content(find(&fresh_doc, "#price")), "$12");
        assert_eq!(other.kv().writes(), 1);
    }

    #[test]
    fn self_originated_mutations_are_ignored() {
        let mut doc = Document::parse(
            "<body><p id=t>x</p><div id=__pagepatch_root__><span>ui</span></div></body>",
        );
        let mut s = session();
        let t = find(&doc, "#t");
        s.commit_edit(&mut doc, &[t], &EditCommand::set_text("y")).unwrap();
        doc.take_mutations();

        let ui = find(&doc, "#__pagepatch_root__");
        assert!(!s.on_mutations(&doc, &[]));
        assert!(!s.on_mutations(&doc, &[MutationRecord { target: ui }]));
        assert!(s.on_mutations(&doc, &[MutationRecord { target: ui }, MutationRecord { target: t }]));
    }

    #[test]
    fn switch_scope_loads_a_disjoint_set() {
        let mut doc = Document::parse("<h1 id=title>Old</h1>");
        let mut s = session();
        let title = find(&doc, "#title");
        s.commit_edit(&mut doc, &[title], &EditCommand::set_text("New")).unwrap();

        s.switch_scope(&mut doc, "https://shop.test/other", None).unwrap();
        assert!(s.patches().is_empty());
        assert_eq!(s.undo_depth(), 0);

        let summary = s.switch_scope(&mut doc, ADDRESS, None).unwrap();
        assert_eq!(s.patches().len(), 1);
        assert_eq!(summary.skipped, 1, "already applied to the unchanged node");
    }

    #[test]
    fn poll_persistence_waits_for_the_quiet_window() {
        let mut doc = Document::parse("<p id=t>x</p>");
        let mut s = session();
        let t = find(&doc, "#t");
        s.commit_edit(&mut doc, &[t], &EditCommand::set_text("y")).unwrap();

        let deadline = s.persist_deadline().unwrap();
        assert!(!s.poll_persistence(deadline - std::time::Duration::from_millis(1)).unwrap());
        assert!(s.poll_persistence(deadline).unwrap());
        assert!(!s.persist_pending());
        assert_eq!(s.kv().writes(), 1);
    }

    /// Memory store whose writes can be made to fail.
    struct FlakyKv {
        inner: MemoryKv,
        failing: Rc<Cell<bool>>,
    }

    impl KeyValueStore for FlakyKv {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.failing.get() {
                anyhow::bail!("disk full");
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> anyhow::Result<()> {
            self.inner.remove(key)
        }

        fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
            self.inner.keys_with_prefix(prefix)
        }
    }

    #[test]
    fn failed_scheduled_save_is_retried() {
        let failing = Rc::new(Cell::new(true));
        let kv = FlakyKv { inner: MemoryKv::new(), failing: failing.clone() };
        let mut s = Session::activate(kv, EngineConfig::default(), ADDRESS, None).unwrap();
        let mut doc = Document::parse("<p id=t>x</p>");
        let t = find(&doc, "#t");
        s.commit_edit(&mut doc, &[t], &EditCommand::set_text("y")).unwrap();

        let deadline = s.persist_deadline().unwrap();
        assert!(matches!(s.poll_persistence(deadline), Err(SessionError::Storage(_))));
        assert!(s.persist_pending());
        let retry = s.persist_deadline().unwrap();
        assert!(retry > deadline);

        failing.set(false);
        assert!(s.poll_persistence(retry).unwrap());
        assert!(!s.persist_pending());
        assert_eq!(s.kv().inner.writes(), 1);
    }
}
