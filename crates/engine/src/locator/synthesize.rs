// Locator synthesis: an ordered list of strategies, first unique candidate wins.
//
// Uniqueness is judged in the node's own context. A node in the primary tree
// needs a selector matching only itself under an ordinary document query. A
// node inside a shadow root gets a plain CSS locator when a shadow-piercing
// query finds only it, and a host-path locator when the selector is unique
// within its own root.

use std::collections::HashMap;

use pagepatch_common::locator::Locator;
use tracing::{debug, trace};

use super::{SynthesisError, DEFAULT_MAX_CLIMB_DEPTH, RESERVED_ATTR_NAMESPACE};
use crate::tree::query::{TreeQuery, DEFAULT_MAX_SHADOW_DEPTH};
use crate::tree::selector::{css_escape, css_escape_string};
use crate::tree::xpath::quote_literal;
use crate::tree::{Document, ElementData, NodeData, NodeId};

const DATA_ATTR_MAX_LEN: usize = 100;
const SEMANTIC_ATTRS: &[&str] = &["aria-label", "aria-labelledby", "role", "name", "title", "alt"];
const SEMANTIC_VALUE_MAX_LEN: usize = 80;
const LINK_PATH_MAX_LEN: usize = 50;
const CLASS_MAX_LEN: usize = 50;
const MAX_CLASSES: usize = 3;
const LEAF_TEXT_TAGS: &[&str] = &["button", "a", "span", "label", "h1", "h2", "h3", "h4", "h5", "h6"];
const LEAF_TEXT_MAX_LEN: usize = 50;
const LEAF_PARENT_DEPTH: usize = 3;
const LEAF_MAX_SIBLING_MATCHES: usize = 5;
const PATH_CLASS_MAX_LEN: usize = 40;
const PATH_MAX_CLASSES: usize = 2;

/// Framework-injected scoping class; never identifies an element.
const STYLE_SCOPE_CLASS: &str = "style-scope";

/// The strategy that produced a locator, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Id,
    DataAttribute,
    Semantic,
    Link,
    Classes,
    LeafText,
    Structural,
    Absolute,
}

impl Strategy {
    /// Candidate strategies; `Absolute` runs last and never rejects.
    const CANDIDATES: [Strategy; 7] = [
        Strategy::Id,
        Strategy::DataAttribute,
        Strategy::Semantic,
        Strategy::Link,
        Strategy::Classes,
        Strategy::LeafText,
        Strategy::Structural,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::DataAttribute => "data-attribute",
            Self::Semantic => "semantic",
            Self::Link => "link",
            Self::Classes => "classes",
            Self::LeafText => "leaf-text",
            Self::Structural => "structural",
            Self::Absolute => "absolute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesized {
    pub locator: Locator,
    pub strategy: Strategy,
}

/// Maps nodes to locators, memoizing per node until [`clear_cache`].
///
/// [`clear_cache`]: LocatorSynthesizer::clear_cache
#[derive(Debug, Clone)]
pub struct LocatorSynthesizer {
    cache: HashMap<NodeId, Synthesized>,
    max_climb_depth: usize,
    max_shadow_depth: usize,
}

impl Default for LocatorSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorSynthesizer {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CLIMB_DEPTH, DEFAULT_MAX_SHADOW_DEPTH)
    }

    pub fn with_limits(max_climb_depth: usize, max_shadow_depth: usize) -> Self {
        Self { cache: HashMap::new(), max_climb_depth: max_climb_depth.max(1), max_shadow_depth }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn synthesize(&mut self, doc: &Document, node: NodeId) -> Result<Locator, SynthesisError> {
        self.synthesize_detailed(doc, node).map(|s| s.locator)
    }

    /// Synthesize a locator and report which strategy produced it.
    ///
    /// Every attached element yields a locator; the absolute fallback never
    /// rejects.
    pub fn synthesize_detailed(
        &mut self,
        doc: &Document,
        node: NodeId,
    ) -> Result<Synthesized, SynthesisError> {
        if let Some(hit) = self.cache.get(&node) {
            return Ok(hit.clone());
        }
        if !doc.is_element(node) {
            return Err(SynthesisError::NotAnElement(node));
        }
        if !doc.is_attached(node) {
            return Err(SynthesisError::Detached(node));
        }

        let query = TreeQuery::new(doc).with_max_depth(self.max_shadow_depth);
        let mut attempt = Attempt::new(query, node, self.max_climb_depth);
        let synthesized = attempt.run();
        debug!(
            node = %node,
            strategy = synthesized.strategy.as_str(),
            locator = %synthesized.locator,
            "synthesized locator"
        );
        self.cache.insert(node, synthesized.clone());
        Ok(synthesized)
    }
}

// ── One synthesis run ──────────────────────────────────────────────

struct Attempt<'a> {
    doc: &'a Document,
    query: TreeQuery<'a>,
    node: NodeId,
    /// The document, or the shadow root the node lives in.
    root: NodeId,
    in_shadow: bool,
    max_climb_depth: usize,
    host_path: Option<Vec<String>>,
}

impl<'a> Attempt<'a> {
    fn new(query: TreeQuery<'a>, node: NodeId, max_climb_depth: usize) -> Self {
        let doc = query.document();
        let root = doc.root_of(node);
        Self {
            doc,
            query,
            node,
            root,
            in_shadow: matches!(doc.data(root), Some(NodeData::ShadowRoot { .. })),
            max_climb_depth,
            host_path: None,
        }
    }

    fn run(&mut self) -> Synthesized {
        for strategy in Strategy::CANDIDATES {
            for candidate in self.candidates(strategy) {
                if let Some(locator) = self.accept(&candidate) {
                    return Synthesized { locator, strategy };
                }
                trace!(strategy = strategy.as_str(), candidate, "candidate rejected");
            }
        }
        Synthesized { locator: self.absolute(), strategy: Strategy::Absolute }
    }

    fn element(&self) -> Option<&'a ElementData> {
        self.doc.element(self.node)
    }

    fn tag(&self) -> String {
        self.element().map(|el| css_escape(el.tag())).unwrap_or_default()
    }

    fn candidates(&self, strategy: Strategy) -> Vec<String> {
        let Some(el) = self.element() else {
            return Vec::new();
        };
        let tag = self.tag();
        match strategy {
            Strategy::Id => el.id().map(|id| format!("#{}", css_escape(id))).into_iter().collect(),
            Strategy::DataAttribute => el
                .attrs()
                .iter()
                .filter(|(name, value)| {
                    name.starts_with("data-")
                        && !name.contains(RESERVED_ATTR_NAMESPACE)
                        && (1..=DATA_ATTR_MAX_LEN).contains(&value.chars().count())
                })
                .map(|(name, value)| format!("{tag}[{}={}]", css_escape(name), css_escape_string(value)))
                .collect(),
            Strategy::Semantic => SEMANTIC_ATTRS
                .iter()
                .filter_map(|&name| {
                    let value = el.attr(name)?;
                    let len = value.trim().chars().count();
                    (len > 0 && value.chars().count() <= SEMANTIC_VALUE_MAX_LEN)
                        .then(|| format!("{tag}[{name}={}]", css_escape_string(value)))
                })
                .collect(),
            Strategy::Link => self.link_candidate(el).into_iter().collect(),
            Strategy::Classes => {
                let classes: Vec<String> = el
                    .classes()
                    .filter(|c| usable_class(c, CLASS_MAX_LEN))
                    .take(MAX_CLASSES)
                    .map(css_escape)
                    .collect();
                if classes.is_empty() {
                    Vec::new()
                } else {
                    vec![format!("{tag}.{}", classes.join("."))]
                }
            }
            Strategy::LeafText => self.leaf_text_candidate(el).into_iter().collect(),
            Strategy::Structural => {
                vec![structural_path(&self.query, self.node, Some(self.max_climb_depth)).path]
            }
            Strategy::Absolute => Vec::new(),
        }
    }

    fn link_candidate(&self, el: &ElementData) -> Option<String> {
        let base = self.doc.base_url()?;
        match el.tag() {
            "a" => {
                let url = base.join(el.attr("href")?).ok()?;
                let path: String = url.path().chars().take(LINK_PATH_MAX_LEN).collect();
                (path.len() > 1).then(|| format!("a[href*={}]", css_escape_string(&path)))
            }
            "img" => {
                let url = base.join(el.attr("src")?).ok()?;
                let file = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
                Some(format!("img[src*={}]", css_escape_string(file)))
            }
            _ => None,
        }
    }

    fn leaf_text_candidate(&self, el: &ElementData) -> Option<String> {
        if !LEAF_TEXT_TAGS.contains(&el.tag()) {
            return None;
        }
        let [only] = self.doc.children(self.node) else {
            return None;
        };
        let Some(NodeData::Text(text)) = self.doc.data(*only) else {
            return None;
        };
        if !(1..=LEAF_TEXT_MAX_LEN).contains(&text.trim().chars().count()) {
            return None;
        }

        let parent = self.doc.parent_element(self.node)?;
        let parent_path = structural_path(&self.query, parent, Some(LEAF_PARENT_DEPTH)).path;
        let siblings = format!("{parent_path} > {}", self.tag());
        let matches = self.query.matches_in(self.root, &siblings);
        if matches.len() > LEAF_MAX_SIBLING_MATCHES || !matches.contains(&self.node) {
            return None;
        }
        Some(format!("{siblings}:nth-child({})", self.doc.element_index(self.node)))
    }

    fn accept(&mut self, css: &str) -> Option<Locator> {
        if !self.in_shadow {
            return (self.query.matches_in(self.doc.root(), css) == [self.node]).then(|| Locator::css(css));
        }
        if self.query.deep_matches(css) == [self.node] {
            return Some(Locator::css(css));
        }
        if self.query.matches_in(self.root, css) == [self.node] {
            return Some(Locator::Shadow {
                host_path: self.host_path(),
                inner_selector: css.to_string(),
            });
        }
        None
    }

    /// Host selectors from the outermost host inward, each unique within
    /// the root that contains it.
    fn host_path(&mut self) -> Vec<String> {
        if let Some(path) = &self.host_path {
            return path.clone();
        }
        let mut hops = Vec::new();
        let mut root = self.root;
        while let Some(host) = self.doc.shadow_host(root) {
            hops.push(host_selector(&self.query, host));
            root = self.doc.root_of(host);
        }
        hops.reverse();
        self.host_path = Some(hops.clone());
        hops
    }

    fn absolute(&mut self) -> Locator {
        if self.in_shadow {
            let inner_selector = anchored_path(&self.query, self.node);
            return Locator::Shadow { host_path: self.host_path(), inner_selector };
        }
        Locator::xpath(self.absolute_xpath())
    }

    /// `/html/body/div[2]/span`, or `//*[@id="x"]/div[2]/span` when an
    /// ancestor carries a document-unique id.
    fn absolute_xpath(&self) -> String {
        let mut steps = Vec::new();
        let mut cur = self.node;
        let anchored = loop {
            if let Some(anchor) = self.xpath_id_anchor(cur) {
                steps.push(anchor);
                break true;
            }
            let tag = self.doc.tag(cur).unwrap_or("*");
            let (position, count) = self.doc.same_tag_position(cur);
            steps.push(if count > 1 { format!("{tag}[{position}]") } else { tag.to_string() });
            match self.doc.parent_element(cur) {
                Some(parent) => cur = parent,
                None => break false,
            }
        };
        steps.reverse();
        let joined = steps.join("/");
        if anchored {
            joined
        } else {
            format!("/{joined}")
        }
    }

    fn xpath_id_anchor(&self, node: NodeId) -> Option<String> {
        let id = self.doc.element(node)?.id()?;
        let literal = quote_literal(id)?;
        let holders = self
            .doc
            .descendant_elements(self.doc.root())
            .into_iter()
            .filter(|&n| self.doc.attr(n, "id") == Some(id))
            .count();
        (holders == 1).then(|| format!("//*[@id={literal}]"))
    }
}

// ── Structural paths ───────────────────────────────────────────────

struct StructuralPath {
    segments: Vec<String>,
    path: String,
    unique: bool,
}

/// Climb from `node` toward the top of its root, prepending one segment per
/// level, until the joined path matches only `node` within that root or
/// `max_depth` segments have been used.
fn structural_path(query: &TreeQuery<'_>, node: NodeId, max_depth: Option<usize>) -> StructuralPath {
    let doc = query.document();
    let root = doc.root_of(node);
    let mut segments: Vec<String> = Vec::new();
    let mut cur = Some(node);
    while let Some(el) = cur {
        if max_depth.is_some_and(|max| segments.len() >= max) {
            break;
        }
        segments.insert(0, path_segment(doc, el));
        let path = segments.join(" > ");
        if query.matches_in(root, &path) == [node] {
            return StructuralPath { segments, path, unique: true };
        }
        cur = doc.parent_element(el);
    }
    let path = segments.join(" > ");
    StructuralPath { segments, path, unique: false }
}

/// Matches only elements with no element ancestor: the top level of a
/// document or shadow root, including under `ShadowRoot.querySelector`
/// where `:scope` matches nothing.
const TOP_LEVEL_ANCHOR: &str = ":not(* *)";

/// A structural path that is always unique within the node's root: the
/// uncapped climb, with its first segment pinned to the top level when the
/// climb alone is ambiguous.
fn anchored_path(query: &TreeQuery<'_>, node: NodeId) -> String {
    let climbed = structural_path(query, node, None);
    if climbed.unique {
        return climbed.path;
    }
    let mut segments = climbed.segments;
    if let Some(first) = segments.first_mut() {
        first.push_str(TOP_LEVEL_ANCHOR);
    }
    segments.join(" > ")
}

/// `#id` when the id is unique within the host's own root, otherwise an
/// anchored structural path.
fn host_selector(query: &TreeQuery<'_>, host: NodeId) -> String {
    let doc = query.document();
    if let Some(id) = doc.element(host).and_then(ElementData::id) {
        let selector = format!("#{}", css_escape(id));
        if query.matches_in(doc.root_of(host), &selector) == [host] {
            return selector;
        }
    }
    anchored_path(query, host)
}

fn path_segment(doc: &Document, node: NodeId) -> String {
    let Some(el) = doc.element(node) else {
        return "*".to_string();
    };
    let mut segment = css_escape(el.tag());
    if let Some(id) = el.id() {
        segment.push('#');
        segment.push_str(&css_escape(id));
    } else {
        for class in el.classes().filter(|c| usable_class(c, PATH_CLASS_MAX_LEN)).take(PATH_MAX_CLASSES) {
            segment.push('.');
            segment.push_str(&css_escape(class));
        }
    }
    let (position, _) = doc.same_tag_position(node);
    segment.push_str(&format!(":nth-of-type({position})"));
    segment
}

fn usable_class(class: &str, max_len: usize) -> bool {
    !class.is_empty()
        && class.chars().count() <= max_len
        && !class.starts_with(|c: char| c.is_ascii_digit())
        && class != STYLE_SCOPE_CLASS
        && !class.contains(RESERVED_ATTR_NAMESPACE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::LocatorResolver;
    use crate::tree::ShadowMode;

    fn find(doc: &Document, selector: &str) -> NodeId {
        TreeQuery::new(doc)
            .deep_query_first(doc.root(), selector)
            .expect("selector should parse")
            .expect("node should exist")
    }

    fn synth(doc: &Document, node: NodeId) -> Synthesized {
        LocatorSynthesizer::new().synthesize_detailed(doc, node).expect("node should be addressable")
    }

    fn assert_round_trips(doc: &Document, node: NodeId) -> Synthesized {
        let synthesized = synth(doc, node);
        let resolved = LocatorResolver::new(doc).resolve_all(&synthesized.locator);
        assert_eq!(resolved, vec![node], "{} should resolve to only {node}", synthesized.locator);
        synthesized
    }

    #[test]
    fn id_wins_first() {
        let doc = Document::parse("<body><div id=hero class=banner>x</div></body>");
        let s = assert_round_trips(&doc, find(&doc, "div"));
        assert_eq!(s.strategy, Strategy::Id);
        assert_eq!(s.locator, Locator::css("#hero"));
    }

    #[test]
    fn duplicate_id_falls_through() {
        let doc = Document::parse("<div id=x data-row=1>a</div><div id=x data-row=2>b</div>");
        let second = find(&doc, "[data-row=\"2\"]");
        let s = assert_round_trips(&doc, second);
        assert_eq!(s.strategy, Strategy::DataAttribute);
        assert_eq!(s.locator, Locator::css("div[data-row=\"2\"]"));
    }

    #[test]
    fn reserved_marker_attributes_are_never_anchors() {
        let doc = Document::parse(
            "<p data-pagepatch-set-text=abc>one</p><p data-pagepatch-set-text=def>two</p>",
        );
        let s = assert_round_trips(&doc, find(&doc, "p:nth-of-type(2)"));
        assert_ne!(s.strategy, Strategy::DataAttribute);
    }

    #[test]
    fn semantic_attributes_are_ranked() {
        let doc = Document::parse(
            "<button role=button>a</button><button role=button aria-label='Close dialog'>b</button>",
        );
        let s = assert_round_trips(&doc, find(&doc, "[aria-label]"));
        assert_eq!(s.strategy, Strategy::Semantic);
        assert_eq!(s.locator, Locator::css("button[aria-label=\"Close dialog\"]"));
    }

    #[test]
    fn links_use_their_path() {
        let doc = Document::parse(
            "<nav><a href='/pricing?ref=nav'>Pricing</a><a href='/docs'>Docs</a></nav>\
             <img src='https://cdn.example.com/img/logo.png'>",
        );
        let s = assert_round_trips(&doc, find(&doc, "a"));
        assert_eq!(s.strategy, Strategy::Link);
        assert_eq!(s.locator, Locator::css("a[href*=\"/pricing\"]"));

        let s = assert_round_trips(&doc, find(&doc, "img"));
        assert_eq!(s.locator, Locator::css("img[src*=\"logo.png\"]"));
    }

    #[test]
    fn classes_skip_unstable_names() {
        let doc = Document::parse(
            "<div class='style-scope 3col card featured'>a</div><div class=card>b</div>",
        );
        let s = assert_round_trips(&doc, find(&doc, ".featured"));
        assert_eq!(s.strategy, Strategy::Classes);
        assert_eq!(s.locator, Locator::css("div.card.featured"));
    }

    #[test]
    fn leaf_text_uses_parent_path_and_position() {
        let doc = Document::parse(
            "<body><div><span>one</span><span>two</span></div><div><span>three</span></div></body>",
        );
        let two = find(&doc, "div > span:nth-child(2)");
        let s = assert_round_trips(&doc, two);
        assert_eq!(s.strategy, Strategy::LeafText);
    }

    #[test]
    fn structural_path_climbs_until_unique() {
        let doc = Document::parse(
            "<body><section><div><p>a</p></div></section><aside><div><p>b</p></div></aside></body>",
        );
        let b = find(&doc, "aside p");
        let s = assert_round_trips(&doc, b);
        assert_eq!(s.strategy, Strategy::Structural);
        assert_eq!(s.locator, Locator::css("aside:nth-of-type(1) > div:nth-of-type(1) > p:nth-of-type(1)"));
    }

    #[test]
    fn repeated_deep_structure_falls_back_to_xpath() {
        let chain = format!("<div>{}<p></p>{}</div>", "<div>".repeat(4), "</div>".repeat(4));
        let doc = Document::parse(&format!("<html><body>{chain}{chain}</body></html>"));
        let second = find(&doc, "body > div:nth-of-type(2) p");

        let s = LocatorSynthesizer::with_limits(3, DEFAULT_MAX_SHADOW_DEPTH)
            .synthesize_detailed(&doc, second)
            .unwrap();
        assert_eq!(s.strategy, Strategy::Absolute);
        assert_eq!(s.locator, Locator::xpath("/html/body/div[2]/div/div/div/div/p"));
        assert_eq!(LocatorResolver::new(&doc).resolve_all(&s.locator), vec![second]);
    }

    #[test]
    fn absolute_xpath_anchors_on_unique_ancestor_id() {
        let doc = Document::parse(
            "<body><div id=app><ul><li></li><li></li></ul><ul><li></li></ul></div></body>",
        );
        let li = find(&doc, "ul:nth-of-type(1) > li:nth-of-type(2)");
        let query = TreeQuery::new(&doc);
        let attempt = Attempt::new(query, li, DEFAULT_MAX_CLIMB_DEPTH);
        assert_eq!(attempt.absolute_xpath(), "//*[@id=\"app\"]/ul[1]/li[2]");
    }

    #[test]
    fn node_in_shadow_root_gets_plain_css_when_deep_unique() {
        let doc = Document::parse(
            "<x-card><template shadowrootmode=open><button data-action=buy>Buy</button></template></x-card>",
        );
        let s = assert_round_trips(&doc, find(&doc, "button"));
        assert_eq!(s.locator, Locator::css("button[data-action=\"buy\"]"));
    }

    #[test]
    fn node_in_repeated_components_gets_host_path() {
        let doc = Document::parse(
            "<body>\
               <x-card id=first><template shadowrootmode=open><p class=price>1</p></template></x-card>\
               <x-card id=second><template shadowrootmode=open><p class=price>2</p></template></x-card>\
             </body>",
        );
        let second_host = find(&doc, "#second");
        let shadow = doc.shadow_root(second_host).unwrap();
        let price = doc.element_children(shadow)[0];

        let s = assert_round_trips(&doc, price);
        assert_eq!(
            s.locator,
            Locator::Shadow { host_path: vec!["#second".to_string()], inner_selector: "p.price".to_string() }
        );
    }

    #[test]
    fn nested_shadow_roots_chain_hosts() {
        let doc = Document::parse(
            "<body>\
               <x-outer><template shadowrootmode=open>\
                 <x-inner><template shadowrootmode=open><i>a</i></template></x-inner>\
                 <x-inner><template shadowrootmode=open><i>b</i></template></x-inner>\
               </template></x-outer>\
               <x-outer><template shadowrootmode=open><i>c</i></template></x-outer>\
             </body>",
        );
        let outer = find(&doc, "x-outer");
        let outer_root = doc.shadow_root(outer).unwrap();
        let second_inner = doc.element_children(outer_root)[1];
        let target = doc.element_children(doc.shadow_root(second_inner).unwrap())[0];

        let s = assert_round_trips(&doc, target);
        let Locator::Shadow { host_path, .. } = &s.locator else {
            panic!("expected a shadow locator, got {}", s.locator);
        };
        assert_eq!(host_path.len(), 2);
    }

    #[test]
    fn repeated_shadow_structure_falls_back_to_anchored_inner_path() {
        let doc = Document::parse(
            "<x-list><template shadowrootmode=open>\
               <div><b></b></div><div><div><b></b></div></div>\
             </template></x-list>",
        );
        let host = find(&doc, "x-list");
        let shadow = doc.shadow_root(host).unwrap();
        let shallow = doc.element_children(doc.element_children(shadow)[0])[0];

        let s = assert_round_trips(&doc, shallow);
        assert_eq!(s.strategy, Strategy::Absolute);
        assert_eq!(
            s.locator,
            Locator::Shadow {
                host_path: vec!["x-list:nth-of-type(1)".to_string()],
                inner_selector: "div:nth-of-type(1):not(* *) > b:nth-of-type(1)".to_string(),
            }
        );
    }

    #[test]
    fn closed_shadow_nodes_still_synthesize() {
        let mut doc = Document::parse("<body><x-secret></x-secret></body>");
        let host = find(&doc, "x-secret");
        let root = doc.attach_shadow(host, ShadowMode::Closed).unwrap();
        let inner = doc.create_element("span");
        doc.append_child(root, inner).unwrap();

        let s = synth(&doc, inner);
        assert!(s.locator.is_shadow());
        assert_eq!(LocatorResolver::new(&doc).resolve(&s.locator), None);
    }

    #[test]
    fn detached_and_non_element_nodes_are_rejected() {
        let mut doc = Document::parse("<p>text</p>");
        let p = find(&doc, "p");
        let text = doc.children(p)[0];
        let mut synth = LocatorSynthesizer::new();
        assert_eq!(synth.synthesize(&doc, text), Err(SynthesisError::NotAnElement(text)));

        let orphan = doc.create_element("div");
        assert_eq!(synth.synthesize(&doc, orphan), Err(SynthesisError::Detached(orphan)));
    }

    #[test]
    fn cache_holds_until_cleared() {
        let mut doc = Document::parse("<div id=a></div>");
        let div = find(&doc, "div");
        let mut synth = LocatorSynthesizer::new();
        assert_eq!(synth.synthesize(&doc, div).unwrap(), Locator::css("#a"));

        doc.set_attribute(div, "id", "b").unwrap();
        assert_eq!(synth.synthesize(&doc, div).unwrap(), Locator::css("#a"));
        synth.clear_cache();
        assert_eq!(synth.cached_len(), 0);
        assert_eq!(synth.synthesize(&doc, div).unwrap(), Locator::css("#b"));
    }
}
