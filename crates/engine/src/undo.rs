// Undo manager: bounded LIFO of committed edit groups with captured pre-images.

use std::collections::VecDeque;

use pagepatch_common::types::{Patch, PatchKind};
use tracing::debug;

use crate::apply::marker::patch_marker_name;
use crate::locator::LocatorResolver;
use crate::tree::{Document, NodeId, TreeError};

pub const DEFAULT_UNDO_CAPACITY: usize = 20;

/// State of one node aspect before an edit touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreImage {
    /// Prior inner markup, for text and markup edits.
    Markup(String),
    /// Prior value of the edited attribute.
    Attribute(Option<String>),
    /// Prior inline `style` attribute.
    Style(Option<String>),
    /// Serialized node and the parent it was detached from.
    Removed { markup: String, parent: Option<NodeId> },
}

impl PreImage {
    /// Capture what an edit of `kind` on `node` is about to overwrite.
    pub fn capture(doc: &Document, node: NodeId, kind: PatchKind, attribute_name: Option<&str>) -> Self {
        match kind {
            PatchKind::SetText | PatchKind::SetHtml => Self::Markup(doc.inner_html(node)),
            PatchKind::SetAttribute => {
                let name = attribute_name.unwrap_or_default().trim();
                Self::Attribute(doc.attr(node, name).map(str::to_string))
            }
            PatchKind::AppendStyle | PatchKind::ReplaceStyle | PatchKind::Hide => {
                Self::Style(doc.attr(node, "style").map(str::to_string))
            }
            PatchKind::Remove => Self::Removed { markup: doc.outer_html(node), parent: doc.parent(node) },
        }
    }
}

/// One node's share of a committed edit.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub patch: Patch,
    pub pre_image: PreImage,
    /// The live node the edit touched.
    pub node: Option<NodeId>,
    /// Stored patch with the same key that this edit overwrote.
    pub superseded: Option<Patch>,
}

/// Entries from one committed edit, undone as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchGroup {
    pub entries: Vec<UndoEntry>,
}

impl PatchGroup {
    pub fn new(entries: Vec<UndoEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct UndoManager {
    groups: VecDeque<PatchGroup>,
    capacity: usize,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(DEFAULT_UNDO_CAPACITY)
    }
}

impl UndoManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { groups: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a group, discarding the oldest beyond capacity. Empty groups are
    /// not recorded.
    pub fn push(&mut self, group: PatchGroup) {
        if group.is_empty() {
            return;
        }
        if self.groups.len() == self.capacity {
            self.groups.pop_front();
            debug!(capacity = self.capacity, "undo history full; dropped oldest group");
        }
        self.groups.push_back(group);
    }

    pub fn pop(&mut self) -> Option<PatchGroup> {
        self.groups.pop_back()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

/// What reverting one entry did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Restored,
    /// A removed node's markup went back under its old parent, appended last.
    Reinserted,
    /// Neither the captured node nor the locator reached a target.
    TargetMissing,
    /// The removed node's parent is gone; nothing to reinsert into.
    ParentDetached,
}

/// Put the tree back the way it was before `entry`'s edit.
pub fn revert_entry(
    doc: &mut Document,
    entry: &UndoEntry,
    max_shadow_depth: usize,
) -> Result<RevertOutcome, TreeError> {
    let (name, prior) = match &entry.pre_image {
        PreImage::Removed { markup, parent } => return reinsert(doc, markup, *parent),
        PreImage::Markup(markup) => {
            let Some(node) = revert_target(doc, entry, max_shadow_depth) else {
                return Ok(RevertOutcome::TargetMissing);
            };
            doc.set_inner_html(node, markup)?;
            return clear_marker(doc, node, &entry.patch);
        }
        PreImage::Attribute(prior) => {
            (entry.patch.attribute_name.as_deref().unwrap_or_default().trim(), prior.as_deref())
        }
        PreImage::Style(prior) => ("style", prior.as_deref()),
    };
    let Some(node) = revert_target(doc, entry, max_shadow_depth) else {
        return Ok(RevertOutcome::TargetMissing);
    };
    restore_attribute(doc, node, name, prior)?;
    clear_marker(doc, node, &entry.patch)
}

/// The captured node if still live, else whatever the locator finds.
fn revert_target(doc: &Document, entry: &UndoEntry, max_shadow_depth: usize) -> Option<NodeId> {
    entry.node.filter(|&n| doc.is_attached(n) && doc.is_element(n)).or_else(|| {
        LocatorResolver::new(doc)
            .with_max_depth(max_shadow_depth)
            .resolve_unique(&entry.patch.locator)
            .ok()
    })
}

fn reinsert(doc: &mut Document, markup: &str, parent: Option<NodeId>) -> Result<RevertOutcome, TreeError> {
    match parent {
        Some(parent) if doc.is_attached(parent) => {
            doc.append_html(parent, markup)?;
            Ok(RevertOutcome::Reinserted)
        }
        _ => Ok(RevertOutcome::ParentDetached),
    }
}

fn clear_marker(doc: &mut Document, node: NodeId, patch: &Patch) -> Result<RevertOutcome, TreeError> {
    doc.remove_attribute(node, &patch_marker_name(patch))?;
    Ok(RevertOutcome::Restored)
}

fn restore_attribute(
    doc: &mut Document,
    node: NodeId,
    name: &str,
    prior: Option<&str>,
) -> Result<(), TreeError> {
    match prior {
        Some(value) => doc.set_attribute(node, name, value),
        None => doc.remove_attribute(node, name).map(drop),
    }
}
