// Shadow-piercing queries, the addressable-node filter, and target picking.

use std::collections::HashSet;

use tracing::trace;

use super::selector::{self, SelectorList};
use super::{Document, NodeData, NodeId, TreeError};

/// Id of the tool's own injected subtree.
pub const ROOT_ID: &str = "__pagepatch_root__";
/// Id of the tool's hover/selection overlay.
pub const OVERLAY_ID: &str = "__pagepatch_overlay__";

/// Default cap on nested shadow-root descent.
pub const DEFAULT_MAX_SHADOW_DEPTH: usize = 20;

/// Tags that never carry editable content.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "meta", "link", "head", "html"];

/// Shadow roots reachable from a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowWalk {
    pub roots: Vec<NodeId>,
    /// The depth cap stopped the walk before every root was visited.
    pub truncated: bool,
}

/// Query primitives over one document with a fixed shadow depth cap.
#[derive(Debug, Clone, Copy)]
pub struct TreeQuery<'a> {
    doc: &'a Document,
    max_depth: usize,
}

impl<'a> TreeQuery<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc, max_depth: DEFAULT_MAX_SHADOW_DEPTH }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn document(&self) -> &'a Document {
        self.doc
    }

    /// Ordinary query: elements under `scope` matching `selector`, in tree
    /// order, without entering shadow roots.
    pub fn query_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, TreeError> {
        let list = selector::parse(selector)?;
        Ok(self.select(scope, &list))
    }

    pub fn query_first(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, TreeError> {
        let list = selector::parse(selector)?;
        Ok(self
            .doc
            .descendant_elements(scope)
            .into_iter()
            .find(|&n| list.matches_scoped(self.doc, n, Some(scope))))
    }

    /// Shadow-piercing query: matches under `scope`, then under every
    /// reachable open shadow root.
    pub fn deep_query_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, TreeError> {
        let list = selector::parse(selector)?;
        let mut out = self.select(scope, &list);
        for root in self.shadow_roots(scope).roots {
            out.extend(self.select(root, &list));
        }
        Ok(out)
    }

    pub fn deep_query_first(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, TreeError> {
        Ok(self.deep_query_all(scope, selector)?.into_iter().next())
    }

    /// Lenient ordinary query: an invalid selector matches nothing.
    pub fn matches_in(&self, scope: NodeId, selector: &str) -> Vec<NodeId> {
        self.query_all(scope, selector).unwrap_or_else(|e| {
            trace!(error = %e, "selector rejected");
            Vec::new()
        })
    }

    /// Lenient shadow-piercing query: an invalid selector matches nothing.
    pub fn deep_matches(&self, selector: &str) -> Vec<NodeId> {
        self.deep_query_all(self.doc.root(), selector).unwrap_or_else(|e| {
            trace!(error = %e, "selector rejected");
            Vec::new()
        })
    }

    fn select(&self, scope: NodeId, list: &SelectorList) -> Vec<NodeId> {
        self.doc
            .descendant_elements(scope)
            .into_iter()
            .filter(|&n| list.matches_scoped(self.doc, n, Some(scope)))
            .collect()
    }

    /// Open shadow roots reachable from `scope`, guarded by a visited set and
    /// the depth cap. Hitting the cap truncates the walk; it is not an error.
    pub fn shadow_roots(&self, scope: NodeId) -> ShadowWalk {
        let mut walk = ShadowWalk::default();
        let mut visited = HashSet::new();
        self.collect_shadow_roots(scope, 0, &mut visited, &mut walk);
        if walk.truncated {
            trace!(max_depth = self.max_depth, "shadow walk truncated at depth cap");
        }
        walk
    }

    fn collect_shadow_roots(
        &self,
        scope: NodeId,
        depth: usize,
        visited: &mut HashSet<NodeId>,
        walk: &mut ShadowWalk,
    ) {
        let mut hosts = self.doc.descendant_elements(scope);
        if self.doc.is_element(scope) {
            hosts.insert(0, scope);
        }
        for host in hosts {
            let Some(root) = self.doc.shadow_root(host) else {
                continue;
            };
            if !visited.insert(root) {
                continue;
            }
            if depth >= self.max_depth {
                walk.truncated = true;
                continue;
            }
            walk.roots.push(root);
            self.collect_shadow_roots(root, depth + 1, visited, walk);
        }
    }

    /// Deepest element at `(x, y)`, drilling into open shadow roots.
    ///
    /// Closed shadow roots are opaque here; use [`node_from_event`] when an
    /// interaction's composed path is available.
    pub fn node_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let mut hit = self.hit_test(self.doc.root(), x, y)?;
        for _ in 0..self.max_depth {
            let Some(root) = self.doc.shadow_root(hit) else {
                break;
            };
            match self.hit_test(root, x, y) {
                Some(inner) if inner != hit => hit = inner,
                _ => break,
            }
        }
        Some(hit)
    }

    /// Last element in tree order under `scope` whose box contains the point.
    fn hit_test(&self, scope: NodeId, x: f64, y: f64) -> Option<NodeId> {
        self.doc
            .descendant_elements(scope)
            .into_iter()
            .filter(|&n| self.doc.bounds(n).is_some_and(|b| b.contains(x, y)))
            .last()
    }
}

/// Composed parent: the light-tree parent, or the host for a shadow root's
/// top-level children.
pub fn composed_parent(doc: &Document, node: NodeId) -> Option<NodeId> {
    let parent = doc.parent(node)?;
    match doc.data(parent)? {
        NodeData::ShadowRoot { host, .. } => Some(*host),
        _ => Some(parent),
    }
}

/// Whether `node` is, or sits inside, the tool's own injected subtree.
pub fn is_self_originated(doc: &Document, node: NodeId) -> bool {
    let mut cur = Some(node);
    while let Some(id) = cur {
        if doc.element(id).and_then(|el| el.id()).is_some_and(|id| id == ROOT_ID || id == OVERLAY_ID) {
            return true;
        }
        cur = composed_parent(doc, id);
    }
    false
}

/// Whether `node` is an editable content element.
pub fn is_addressable(doc: &Document, node: NodeId) -> bool {
    let Some(el) = doc.element(node) else {
        return false;
    };
    !NON_CONTENT_TAGS.contains(&el.tag()) && !is_self_originated(doc, node)
}

/// First addressable element along an interaction's composed path
/// (deepest target first). Authoritative even inside closed shadow roots.
pub fn node_from_event(doc: &Document, composed_path: &[NodeId]) -> Option<NodeId> {
    composed_path
        .iter()
        .copied()
        .find(|&n| is_addressable(doc, n) && doc.tag(n) != Some("body"))
}

/// Composed path for a target, deepest first, as an event would report it.
pub fn composed_path(doc: &Document, target: NodeId) -> Vec<NodeId> {
    let mut path = Vec::new();
    let mut cur = Some(target);
    while let Some(id) = cur {
        path.push(id);
        cur = doc.parent(id);
    }
    path
}
