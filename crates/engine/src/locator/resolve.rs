// Locator resolution against a live document.

use std::sync::OnceLock;

use pagepatch_common::locator::Locator;
use regex::Regex;
use tracing::trace;

use super::ResolveError;
use crate::tree::query::TreeQuery;
use crate::tree::selector::css_escape;
use crate::tree::xpath;
use crate::tree::{Document, NodeId};

/// Finds the live node(s) a locator addresses. Stale locators resolve to
/// nothing; resolution never panics or errors on malformed input.
#[derive(Debug, Clone, Copy)]
pub struct LocatorResolver<'a> {
    query: TreeQuery<'a>,
}

impl<'a> LocatorResolver<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { query: TreeQuery::new(doc) }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.query = self.query.with_max_depth(max_depth);
        self
    }

    fn doc(&self) -> &'a Document {
        self.query.document()
    }

    /// First match, if any.
    pub fn resolve(&self, locator: &Locator) -> Option<NodeId> {
        self.resolve_all(locator).into_iter().next()
    }

    /// Every match, in tree order within the query that produced them.
    pub fn resolve_all(&self, locator: &Locator) -> Vec<NodeId> {
        let found = match locator {
            Locator::Css(selector) => self.resolve_css(selector),
            Locator::XPath(path) => self.resolve_xpath(path),
            Locator::Shadow { host_path, inner_selector } => self.resolve_shadow(host_path, inner_selector),
        };
        trace!(locator = %locator, matches = found.len(), "resolved locator");
        found
    }

    /// Exactly one match, or why not.
    pub fn resolve_unique(&self, locator: &Locator) -> Result<NodeId, ResolveError> {
        match self.resolve_all(locator).as_slice() {
            [] => Err(ResolveError::Unresolved),
            [node] => Ok(*node),
            many => Err(ResolveError::Ambiguous { matches: many.len() }),
        }
    }

    fn resolve_css(&self, selector: &str) -> Vec<NodeId> {
        let direct = self.query.matches_in(self.doc().root(), selector);
        if !direct.is_empty() {
            return direct;
        }
        self.query.deep_matches(selector)
    }

    fn resolve_xpath(&self, path: &str) -> Vec<NodeId> {
        let doc = self.doc();
        match xpath::parse(path) {
            Ok(parsed) => {
                let direct = parsed.evaluate(doc);
                if !direct.is_empty() {
                    return direct;
                }
                // The id anchor may live inside a shadow root.
                let Some((id, tail)) = parsed.id_anchor() else {
                    return Vec::new();
                };
                let anchors: Vec<NodeId> = self
                    .deep_by_id(id)
                    .into_iter()
                    .filter(|&n| parsed.first_step_matches(doc, n))
                    .collect();
                tail.evaluate_from(doc, anchors)
            }
            Err(e) => {
                trace!(error = %e, "xpath not evaluable, trying id fallback");
                match extract_id(path) {
                    Some(id) => self.deep_by_id(&id),
                    None => Vec::new(),
                }
            }
        }
    }

    fn deep_by_id(&self, id: &str) -> Vec<NodeId> {
        self.query.deep_matches(&format!("#{}", css_escape(id)))
    }

    /// Walk host selectors one hop at a time with ordinary queries, requiring
    /// an open shadow root at every hop.
    fn resolve_shadow(&self, host_path: &[String], inner_selector: &str) -> Vec<NodeId> {
        let doc = self.doc();
        let mut root = doc.root();
        for host_selector in host_path {
            let host = match self.query.query_first(root, host_selector) {
                Ok(Some(host)) => host,
                Ok(None) => return Vec::new(),
                Err(e) => {
                    trace!(error = %e, "host selector rejected");
                    return Vec::new();
                }
            };
            let Some(shadow) = doc.shadow_root(host) else {
                return Vec::new();
            };
            root = shadow;
        }
        self.query.matches_in(root, inner_selector)
    }
}

fn id_predicate() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"@id\s*=\s*["']([^"']+)["']"#).expect("id predicate pattern should compile")
    })
}

/// Pull the first `@id="..."` value out of an xpath the evaluator can't run.
fn extract_id(path: &str) -> Option<String> {
    id_predicate().captures(path).map(|caps| caps[1].to_string())
}
