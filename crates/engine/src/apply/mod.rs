// Patch applier: idempotent application of stored patches to a document.

pub mod driver;
pub mod marker;
pub mod throttle;

use std::collections::HashMap;

use pagepatch_common::style::{parse_declarations, InlineStyle};
use pagepatch_common::types::{Patch, PatchKind};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::locator::{LocatorResolver, ResolveError};
use crate::tree::query::{is_addressable, DEFAULT_MAX_SHADOW_DEPTH};
use crate::tree::{Document, NodeId, TreeError};

use marker::{fingerprint, patch_marker_name, PENDING_MARKER};

/// How a patch reaches the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Right after an operator edit. `Hide` also forces opacity off.
    Direct,
    /// A reconciliation pass.
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Nothing matched; the content may not have rendered yet.
    Unresolved,
    /// More than one node matched. Never guess.
    Ambiguous,
    /// Matched a non-content node or the tool's own subtree.
    NotAddressable,
    /// The node already carries this exact aspect and value.
    AlreadyApplied,
    /// Required fields are missing. The patch stays stored but inert.
    Malformed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Ambiguous => "ambiguous",
            Self::NotAddressable => "not_addressable",
            Self::AlreadyApplied => "already_applied",
            Self::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("mutation failed: {0}")]
    Mutation(#[from] TreeError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Skipped(SkipReason),
    Failed(ApplyError),
}

/// Per-pass counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ApplySummary {
    pub fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
            ApplyOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.failed
    }
}

/// Applies patches, remembering the last node each locator resolved to.
#[derive(Debug, Clone)]
pub struct Applier {
    node_cache: HashMap<String, NodeId>,
    max_shadow_depth: usize,
}

impl Default for Applier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SHADOW_DEPTH)
    }
}

impl Applier {
    pub fn new(max_shadow_depth: usize) -> Self {
        Self { node_cache: HashMap::new(), max_shadow_depth }
    }

    pub fn clear_cache(&mut self) {
        self.node_cache.clear();
    }

    /// Remember `node` as the target of `patch`'s locator.
    pub fn remember(&mut self, patch: &Patch, node: NodeId) {
        self.node_cache.insert(patch.locator.key_string(), node);
    }

    /// Apply every patch in insertion order.
    pub fn apply_all(&mut self, doc: &mut Document, patches: &[Patch]) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for patch in patches {
            let outcome = self.apply_one(doc, patch, ApplyMode::Reconcile);
            if let ApplyOutcome::Failed(e) = &outcome {
                warn!(patch_id = %patch.id, locator = %patch.locator, error = %e, "patch failed");
            }
            summary.record(&outcome);
        }
        debug!(
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed,
            "apply pass finished"
        );
        summary
    }

    /// Resolve `patch`'s target and apply it.
    pub fn apply_one(&mut self, doc: &mut Document, patch: &Patch, mode: ApplyMode) -> ApplyOutcome {
        if let Err(e) = patch.validate() {
            debug!(patch_id = %patch.id, error = %e, "skipping malformed patch");
            return ApplyOutcome::Skipped(SkipReason::Malformed);
        }
        let node = match self.target(doc, patch) {
            Ok(node) => node,
            Err(ResolveError::Unresolved) => {
                trace!(locator = %patch.locator, "locator unresolved");
                return ApplyOutcome::Skipped(SkipReason::Unresolved);
            }
            Err(ResolveError::Ambiguous { matches }) => {
                debug!(locator = %patch.locator, matches, "locator ambiguous");
                return ApplyOutcome::Skipped(SkipReason::Ambiguous);
            }
        };
        self.apply_to_node(doc, node, patch, mode)
    }

    /// Apply `patch` to an already-known node.
    pub fn apply_to_node(
        &mut self,
        doc: &mut Document,
        node: NodeId,
        patch: &Patch,
        mode: ApplyMode,
    ) -> ApplyOutcome {
        if patch.validate().is_err() {
            return ApplyOutcome::Skipped(SkipReason::Malformed);
        }
        if !is_addressable(doc, node) {
            return ApplyOutcome::Skipped(SkipReason::NotAddressable);
        }

        if patch.kind == PatchKind::Remove {
            self.node_cache.remove(&patch.locator.key_string());
            return match doc.detach(node) {
                Ok(()) => ApplyOutcome::Applied,
                Err(e) => ApplyOutcome::Failed(e.into()),
            };
        }

        let marker = patch_marker_name(patch);
        let stamp = fingerprint(patch);
        if doc.attr(node, &marker) == Some(stamp.as_str()) {
            return ApplyOutcome::Skipped(SkipReason::AlreadyApplied);
        }

        let result = mutate(doc, node, patch, mode)
            .and_then(|()| doc.set_attribute(node, &marker, &stamp))
            .and_then(|()| doc.remove_attribute(node, PENDING_MARKER).map(drop));
        match result {
            Ok(()) => {
                trace!(node = %node, kind = %patch.kind, "patch applied");
                ApplyOutcome::Applied
            }
            Err(e) => ApplyOutcome::Failed(e.into()),
        }
    }

    /// Cached node if still attached, else a fresh unique resolution.
    fn target(&mut self, doc: &Document, patch: &Patch) -> Result<NodeId, ResolveError> {
        let key = patch.locator.key_string();
        if let Some(&cached) = self.node_cache.get(&key) {
            if doc.is_attached(cached) && doc.is_element(cached) {
                return Ok(cached);
            }
            self.node_cache.remove(&key);
        }
        let resolver = LocatorResolver::new(doc).with_max_depth(self.max_shadow_depth);
        let node = resolver.resolve_unique(&patch.locator)?;
        self.node_cache.insert(key, node);
        Ok(node)
    }
}

/// Stamp the pending marker on an edit target.
pub fn mark_pending(doc: &mut Document, node: NodeId) -> Result<(), TreeError> {
    doc.set_attribute(node, PENDING_MARKER, "")
}

fn mutate(doc: &mut Document, node: NodeId, patch: &Patch, mode: ApplyMode) -> Result<(), TreeError> {
    match patch.kind {
        PatchKind::SetText => doc.set_text_content(node, &patch.value),
        PatchKind::SetHtml => doc.set_inner_html(node, &patch.value),
        PatchKind::SetAttribute => {
            let name = patch.attribute_name.as_deref().unwrap_or_default().trim();
            if patch.value.is_empty() {
                doc.remove_attribute(node, name).map(drop)
            } else {
                doc.set_attribute(node, name, &patch.value)
            }
        }
        PatchKind::AppendStyle | PatchKind::ReplaceStyle => {
            let mut style = InlineStyle::parse(doc.attr(node, "style"));
            if patch.kind == PatchKind::ReplaceStyle {
                style.clear();
            }
            for decl in parse_declarations(&patch.value) {
                style.set(&decl.name, &decl.value, true);
            }
            write_style(doc, node, &style)
        }
        PatchKind::Hide => {
            let mut style = InlineStyle::parse(doc.attr(node, "style"));
            style.set("display", "none", true);
            style.set("visibility", "hidden", true);
            if mode == ApplyMode::Direct {
                style.set("opacity", "0", true);
            }
            write_style(doc, node, &style)
        }
        PatchKind::Remove => doc.detach(node),
    }
}

fn write_style(doc: &mut Document, node: NodeId, style: &InlineStyle) -> Result<(), TreeError> {
    match style.to_attribute_value() {
        Some(value) => doc.set_attribute(node, "style", &value),
        None => doc.remove_attribute(node, "style").map(drop),
    }
}

#[cfg(test)]
mod tests {
    use pagepatch_common::locator::Locator;

    use super::*;
    use crate::tree::query::TreeQuery;

    fn find(doc: &Document, selector: &str) -> NodeId {
        TreeQuery::new(doc).deep_query_first(doc.root(), selector).unwrap().unwrap()
    }

    fn patch(selector: &str, kind: PatchKind, value: &str) -> Patch {
        Patch::new(Locator::css(selector), kind, value)
    }

    #[test]
    fn set_text_applies_once_then_is_idempotent() {
        let mut doc = Document::parse("<body><span id=price>$10</span></body>");
        let mut applier = Applier::default();
        let p = patch("#price", PatchKind::SetText, "$12");

        assert_eq!(applier.apply_one(&mut doc, &p, ApplyMode::Reconcile), ApplyOutcome::Applied);
        let price = find(&doc, "#price");
        assert_eq!(doc.text_content(price), "$12");
        doc.take_mutations();

        assert_eq!(
            applier.apply_one(&mut doc, &p, ApplyMode::Reconcile),
            ApplyOutcome::Skipped(SkipReason::AlreadyApplied)
        );
        assert_eq!(doc.pending_mutations(), 0);
    }

    #[test]
    fn changed_value_reapplies() {
        let mut doc = Document::parse("<span id=price>$10</span>");
        let mut applier = Applier::default();
        applier.apply_one(&mut doc, &patch("#price", PatchKind::SetText, "$12"), ApplyMode::Reconcile);
        let outcome =
            applier.apply_one(&mut doc, &patch("#price", PatchKind::SetText, "$15"), ApplyMode::Reconcile);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(doc.text_content(find(&doc, "#price")), "$15");
    }

    #[test]
    fn set_html_replaces_children() {
        let mut doc = Document::parse("<div id=box>old</div>");
        let mut applier = Applier::default();
        applier.apply_one(&mut doc, &patch("#box", PatchKind::SetHtml, "<b>new</b>"), ApplyMode::Direct);
        assert_eq!(doc.inner_html(find(&doc, "#box")), "<b>new</b>");
    }

    #[test]
    fn set_attribute_sets_and_empty_value_removes() {
        let mut doc = Document::parse("<a id=link title=old>x</a>");
        let mut applier = Applier::default();
        let set = patch("#link", PatchKind::SetAttribute, "new").with_attribute("title");
        applier.apply_one(&mut doc, &set, ApplyMode::Reconcile);
        assert_eq!(doc.attr(find(&doc, "#link"), "title"), Some("new"));

        let clear = patch("#link", PatchKind::SetAttribute, "").with_attribute("title");
        assert_eq!(applier.apply_one(&mut doc, &clear, ApplyMode::Reconcile), ApplyOutcome::Applied);
        assert_eq!(doc.attr(find(&doc, "#link"), "title"), None);
    }

    #[test]
    fn append_style_forces_priority_and_keeps_other_rules() {
        let mut doc = Document::parse("<p id=t style='margin: 0; color: red !important'>x</p>");
        let mut applier = Applier::default();
        let p = patch("#t", PatchKind::AppendStyle, "color: blue; bogus; font-size: 2em");
        applier.apply_one(&mut doc, &p, ApplyMode::Reconcile);

        let style = InlineStyle::parse(doc.attr(find(&doc, "#t"), "style"));
        assert_eq!(style.get("margin").map(|d| d.important), Some(false));
        let color = style.get("color").unwrap();
        assert_eq!((color.value.as_str(), color.important), ("blue", true));
        assert!(style.get("font-size").unwrap().important);
    }

    #[test]
    fn replace_style_clears_first_and_empty_value_clears_all() {
        let mut doc = Document::parse("<p id=t style='margin: 0'>x</p>");
        let mut applier = Applier::default();
        applier.apply_one(&mut doc, &patch("#t", PatchKind::ReplaceStyle, "color: blue"), ApplyMode::Reconcile);
        let style = InlineStyle::parse(doc.attr(find(&doc, "#t"), "style"));
        assert!(style.get("margin").is_none());
        assert!(style.get("color").is_some());

        applier.apply_one(&mut doc, &patch("#t", PatchKind::ReplaceStyle, ""), ApplyMode::Reconcile);
        assert_eq!(doc.attr(find(&doc, "#t"), "style"), None);
    }

    #[test]
    fn hide_forces_opacity_only_on_direct_apply() {
        let mut doc = Document::parse("<p id=a>x</p><p id=b>y</p>");
        let mut applier = Applier::default();
        applier.apply_one(&mut doc, &patch("#a", PatchKind::Hide, ""), ApplyMode::Direct);
        applier.apply_one(&mut doc, &patch("#b", PatchKind::Hide, ""), ApplyMode::Reconcile);

        let a = InlineStyle::parse(doc.attr(find(&doc, "#a"), "style"));
        let b = InlineStyle::parse(doc.attr(find(&doc, "#b"), "style"));
        assert_eq!(a.get("display").map(|d| d.value.as_str()), Some("none"));
        assert_eq!(a.get("opacity").map(|d| d.value.as_str()), Some("0"));
        assert_eq!(b.get("visibility").map(|d| d.value.as_str()), Some("hidden"));
        assert!(b.get("opacity").is_none());
    }

    #[test]
    fn remove_detaches_and_counts_as_applied() {
        let mut doc = Document::parse("<ul><li id=x>a</li><li>b</li></ul>");
        let mut applier = Applier::default();
        let p = patch("#x", PatchKind::Remove, "");
        let li = find(&doc, "#x");
        assert_eq!(applier.apply_one(&mut doc, &p, ApplyMode::Reconcile), ApplyOutcome::Applied);
        assert!(!doc.is_attached(li));
        assert_eq!(
            applier.apply_one(&mut doc, &p, ApplyMode::Reconcile),
            ApplyOutcome::Skipped(SkipReason::Unresolved)
        );
    }

    #[test]
    fn skips_unresolved_ambiguous_unaddressable_and_malformed() {
        let mut doc = Document::parse(
            "<html><head><style>p{}</style></head><body><p>a</p><p>b</p></body></html>",
        );
        let mut applier = Applier::default();
        let cases = [
            (patch("#missing", PatchKind::SetText, "x"), SkipReason::Unresolved),
            (patch("p", PatchKind::SetText, "x"), SkipReason::Ambiguous),
            (patch("style", PatchKind::SetText, "x"), SkipReason::NotAddressable),
            (patch("body", PatchKind::SetAttribute, "x"), SkipReason::Malformed),
            (patch("body", PatchKind::AppendStyle, "nonsense"), SkipReason::Malformed),
        ];
        for (p, reason) in cases {
            assert_eq!(
                applier.apply_one(&mut doc, &p, ApplyMode::Reconcile),
                ApplyOutcome::Skipped(reason),
                "{} should be skipped as {}",
                p.locator,
                reason.as_str()
            );
        }
    }

    #[test]
    fn apply_clears_pending_marker() {
        let mut doc = Document::parse("<p id=t>x</p>");
        let node = find(&doc, "#t");
        mark_pending(&mut doc, node).unwrap();
        let mut applier = Applier::default();
        applier.apply_to_node(&mut doc, node, &patch("#t", PatchKind::SetText, "y"), ApplyMode::Direct);
        assert_eq!(doc.attr(node, PENDING_MARKER), None);
        assert!(doc.attr(node, "data-pagepatch-set-text").is_some());
    }

    #[test]
    fn node_cache_reuses_attached_nodes_and_drops_detached_ones() {
        let mut doc = Document::parse("<p class=t>x</p>");
        let mut applier = Applier::default();
        let p = patch(".t", PatchKind::SetAttribute, "1").with_attribute("data-n");
        applier.apply_one(&mut doc, &p, ApplyMode::Reconcile);
        let first = find(&doc, ".t");

        // Re-render: the old node goes away and an equivalent one appears.
        let body = doc.root();
        doc.detach(first).unwrap();
        doc.append_html(body, "<p class=t>x</p>").unwrap();
        assert_eq!(applier.apply_one(&mut doc, &p, ApplyMode::Reconcile), ApplyOutcome::Applied);
        let second = find(&doc, ".t");
        assert_ne!(first, second);
        assert_eq!(doc.attr(second, "data-n"), Some("1"));
    }

    #[test]
    fn failed_mutation_is_counted_and_the_pass_continues() {
        let mut doc = Document::parse("<a id=link>x</a><span id=b>2</span>");
        let mut applier = Applier::default();
        let broken = patch("#link", PatchKind::SetAttribute, "v").with_attribute("bad name");
        let marker = patch_marker_name(&broken);
        let patches = vec![
            broken,
            patch("#b", PatchKind::SetText, "two"),
            patch("#link", PatchKind::Hide, ""),
        ];

        let summary = applier.apply_all(&mut doc, &patches);
        assert_eq!(summary, ApplySummary { applied: 2, skipped: 0, failed: 1 });
        let link = find(&doc, "#link");
        assert_eq!(doc.attr(link, &marker), None);
        assert_eq!(doc.text_content(find(&doc, "#b")), "two");
        assert!(doc.attr(link, "data-pagepatch-hide").is_some());

        // Still failing on the next pass, never stamped as applied.
        assert!(matches!(
            applier.apply_one(&mut doc, &patches[0], ApplyMode::Reconcile),
            ApplyOutcome::Failed(ApplyError::Mutation(TreeError::InvalidAttributeName(_)))
        ));
    }

    #[test]
    fn apply_all_sums_outcomes() {
        let mut doc = Document::parse("<span id=a>1</span><span id=b>2</span>");
        let mut applier = Applier::default();
        let patches = vec![
            patch("#a", PatchKind::SetText, "one"),
            patch("#b", PatchKind::Hide, ""),
            patch("#gone", PatchKind::SetText, "x"),
        ];
        let first = applier.apply_all(&mut doc, &patches);
        assert_eq!(first, ApplySummary { applied: 2, skipped: 1, failed: 0 });
        let second = applier.apply_all(&mut doc, &patches);
        assert_eq!(second, ApplySummary { applied: 0, skipped: 3, failed: 0 });
        assert_eq!(second.total(), 3);
    }
}
