// Arena document tree: elements, text, and attached shadow roots.
//
// Nodes are never freed; a detached node keeps its id and subtree so that
// caches keyed by `NodeId` can check attachment instead of dangling.

pub mod html;
pub mod query;
pub mod selector;
pub mod xpath;

use std::fmt;

use thiserror::Error;
use url::Url;

/// Base address used when a document is built without one.
pub const DEFAULT_BASE_URL: &str = "http://localhost/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Whether a shadow root is reachable through its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMode {
    Open,
    Closed,
}

impl ShadowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Layout box used for point hit-testing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Debug, Clone)]
pub struct ElementData {
    tag: String,
    attrs: Vec<(String, String)>,
    shadow_root: Option<NodeId>,
    bounds: Option<Rect>,
}

impl ElementData {
    fn new(tag: &str) -> Self {
        Self { tag: tag.to_ascii_lowercase(), attrs: Vec::new(), shadow_root: None, bounds: None }
    }

    /// Lowercase tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Attributes in source order.
    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_ascii_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
    ShadowRoot { host: NodeId, mode: ShadowMode },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/// A childList change observed on `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("node {0} cannot have children")]
    NotAContainer(NodeId),

    #[error("node {0} is detached")]
    Detached(NodeId),

    #[error("inserting {child} under {parent} would create a cycle")]
    HierarchyCycle { parent: NodeId, child: NodeId },

    #[error("`{0}` is not a valid attribute name")]
    InvalidAttributeName(String),

    #[error("element {0} already hosts a shadow root")]
    ShadowAlreadyAttached(NodeId),

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid xpath `{path}`: {reason}")]
    InvalidXPath { path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    base_url: Option<Url>,
    mutations: Vec<MutationRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Node { parent: None, children: Vec::new(), data: NodeData::Document };
        Self { nodes: vec![root], root: NodeId(0), base_url: None, mutations: Vec::new() }
    }

    /// Parse a full document. The parser is lenient and never fails.
    pub fn parse(markup: &str) -> Self {
        let mut doc = Self::new();
        let root = doc.root;
        html::parse_into(&mut doc, root, markup);
        doc.mutations.clear();
        doc
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Address relative links resolve against; `DEFAULT_BASE_URL` when unset.
    pub fn base_url(&self) -> Option<Url> {
        self.base_url.clone().or_else(|| Url::parse(DEFAULT_BASE_URL).ok())
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The `<html>` element, if present.
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root).into_iter().next()
    }

    /// The `<body>` element, if present.
    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html).into_iter().find(|&c| self.tag(c) == Some("body"))
    }

    // ── Node access ────────────────────────────────────────────────

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(id.0).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(id.0).ok_or(TreeError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.data(id)? {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, TreeError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element(el) => Ok(el),
            _ => Err(TreeError::NotAnElement(id)),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(ElementData::tag)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    /// Parent if it is an element. `None` at the top of a document or shadow root.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|&p| self.is_element(p))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).iter().copied().filter(|&c| self.is_element(c)).collect()
    }

    /// Open shadow root hosted by `host`, as exposed to ordinary traversal.
    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        let root = self.element(host)?.shadow_root?;
        match self.data(root)? {
            NodeData::ShadowRoot { mode: ShadowMode::Open, .. } => Some(root),
            _ => None,
        }
    }

    /// Shadow root hosted by `host` regardless of mode.
    pub fn attached_shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.element(host)?.shadow_root
    }

    pub fn shadow_host(&self, shadow_root: NodeId) -> Option<NodeId> {
        match self.data(shadow_root)? {
            NodeData::ShadowRoot { host, .. } => Some(*host),
            _ => None,
        }
    }

    pub fn is_shadow_root(&self, id: NodeId) -> bool {
        matches!(self.data(id), Some(NodeData::ShadowRoot { .. }))
    }

    /// Topmost ancestor without crossing a shadow boundary: the document, a
    /// shadow root, or the top of a detached subtree.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(parent) = self.parent(cur) {
            cur = parent;
        }
        cur
    }

    /// Whether `id` is connected to the document, crossing shadow hosts.
    pub fn is_attached(&self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut cur = id;
        loop {
            let top = self.root_of(cur);
            match self.data(top) {
                Some(NodeData::Document) => return top == self.root,
                Some(NodeData::ShadowRoot { host, .. }) => cur = *host,
                _ => return false,
            }
        }
    }

    /// Whether `ancestor` is `node` or one of its light-tree ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Element descendants of `scope` in tree order, not entering shadow roots.
    pub fn descendant_elements(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if self.is_element(id) {
                out.push(id);
            }
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// 1-based position among element siblings.
    pub fn element_index(&self, id: NodeId) -> usize {
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        self.element_children(parent).iter().position(|&c| c == id).map_or(1, |p| p + 1)
    }

    /// 1-based position among element siblings with the same tag, and the
    /// number of such siblings.
    pub fn same_tag_position(&self, id: NodeId) -> (usize, usize) {
        let (Some(tag), Some(parent)) = (self.tag(id), self.parent(id)) else {
            return (1, 1);
        };
        let same: Vec<NodeId> = self
            .element_children(parent)
            .into_iter()
            .filter(|&c| self.tag(c) == Some(tag))
            .collect();
        let pos = same.iter().position(|&c| c == id).map_or(1, |p| p + 1);
        (pos, same.len())
    }

    // ── Construction and mutation ──────────────────────────────────

    fn push_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { parent: None, children: Vec::new(), data });
        id
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push_node(NodeData::Element(ElementData::new(tag)))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push_node(NodeData::Comment(text.to_string()))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        match &self.node(parent)?.data {
            NodeData::Document | NodeData::Element(_) | NodeData::ShadowRoot { .. } => {}
            _ => return Err(TreeError::NotAContainer(parent)),
        }
        if matches!(self.node(child)?.data, NodeData::Document | NodeData::ShadowRoot { .. }) {
            return Err(TreeError::HierarchyCycle { parent, child });
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(TreeError::HierarchyCycle { parent, child });
        }

        if let Some(old_parent) = self.node(child)?.parent {
            self.node_mut(old_parent)?.children.retain(|&c| c != child);
            self.mutations.push(MutationRecord { target: old_parent });
        }
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        self.mutations.push(MutationRecord { target: parent });
        Ok(())
    }

    /// Remove `id` from its parent. The subtree stays in the arena.
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        let parent = self.node(id)?.parent.ok_or(TreeError::Detached(id))?;
        self.node_mut(parent)?.children.retain(|&c| c != id);
        self.node_mut(id)?.parent = None;
        self.mutations.push(MutationRecord { target: parent });
        Ok(())
    }

    pub fn attach_shadow(&mut self, host: NodeId, mode: ShadowMode) -> Result<NodeId, TreeError> {
        if self.element_mut(host)?.shadow_root.is_some() {
            return Err(TreeError::ShadowAlreadyAttached(host));
        }
        let root = self.push_node(NodeData::ShadowRoot { host, mode });
        self.element_mut(host)?.shadow_root = Some(root);
        Ok(root)
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), TreeError> {
        let name = name.trim().to_ascii_lowercase();
        if !is_valid_attribute_name(&name) {
            return Err(TreeError::InvalidAttributeName(name));
        }
        let el = self.element_mut(id)?;
        match el.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => el.attrs.push((name, value.to_string())),
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<Option<String>, TreeError> {
        let el = self.element_mut(id)?;
        let Some(pos) = el.attrs.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) else {
            return Ok(None);
        };
        Ok(Some(el.attrs.remove(pos).1))
    }

    /// Concatenated text of all light-tree descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => out.push_str(text),
            Some(NodeData::Comment(_)) | None => {}
            Some(_) => {
                for &child in self.children(id) {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), TreeError> {
        if !self.is_element(id) {
            return Err(TreeError::NotAnElement(id));
        }
        self.clear_children(id)?;
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node)?;
        }
        self.mutations.push(MutationRecord { target: id });
        Ok(())
    }

    pub(crate) fn clear_children(&mut self, id: NodeId) -> Result<(), TreeError> {
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        for child in children {
            self.node_mut(child)?.parent = None;
        }
        Ok(())
    }

    pub fn set_bounds(&mut self, id: NodeId, bounds: Rect) -> Result<(), TreeError> {
        self.element_mut(id)?.bounds = Some(bounds);
        Ok(())
    }

    pub fn bounds(&self, id: NodeId) -> Option<Rect> {
        self.element(id)?.bounds
    }

    /// Drain the childList mutation log.
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.len()
    }
}

/// Names `setAttribute` would reject: empty, or containing whitespace,
/// quotes, `/`, `=`, `>` or control characters.
fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '/' | '=' | '>' | '<'))
}
