// Index-predicate XPath subset: `/a/b[2]`, `//*[@id="x"]/div[3]/span`.

use std::collections::HashSet;

use super::{Document, NodeId, TreeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    /// `/` anchors the first step at the document; `//` matches anywhere.
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// `None` for `*`.
    name: Option<String>,
    predicate: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    /// 1-based position among same-name element siblings.
    Position(usize),
    IdEquals(String),
}

pub fn parse(path: &str) -> Result<XPath, TreeError> {
    let error = |reason: &str| TreeError::InvalidXPath { path: path.to_string(), reason: reason.to_string() };
    let trimmed = path.trim();
    let (absolute, rest) = if let Some(rest) = trimmed.strip_prefix("//") {
        (false, rest)
    } else if let Some(rest) = trimmed.strip_prefix('/') {
        (true, rest)
    } else {
        return Err(error("path must start with `/` or `//`"));
    };

    let steps = split_steps(rest)
        .ok_or_else(|| error("unterminated predicate"))?
        .into_iter()
        .map(|raw| parse_step(raw).ok_or_else(|| error(&format!("unsupported step `{raw}`"))))
        .collect::<Result<Vec<_>, _>>()?;
    if steps.is_empty() {
        return Err(error("path has no steps"));
    }
    Ok(XPath { absolute, steps })
}

/// Split on `/` outside of predicates and quotes.
fn split_steps(rest: &str) -> Option<Vec<&str>> {
    let mut steps = Vec::new();
    let mut start = 0usize;
    let mut in_predicate = false;
    let mut quote: Option<char> = None;
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if in_predicate => quote = Some(c),
            (None, '[') => in_predicate = true,
            (None, ']') => in_predicate = false,
            (None, '/') if !in_predicate => {
                steps.push(&rest[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_predicate || quote.is_some() {
        return None;
    }
    steps.push(&rest[start..]);
    Some(steps)
}

fn parse_step(raw: &str) -> Option<Step> {
    let raw = raw.trim();
    let (name_part, predicate_part) = match raw.find('[') {
        Some(open) => (&raw[..open], Some(raw[open + 1..].strip_suffix(']')?)),
        None => (raw, None),
    };

    let name = match name_part {
        "*" => None,
        n if !n.is_empty()
            && n.chars().all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')) =>
        {
            Some(n.to_ascii_lowercase())
        }
        _ => return None,
    };

    let predicate = match predicate_part.map(str::trim) {
        None => None,
        Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
            let n: usize = p.parse().ok()?;
            if n == 0 {
                return None;
            }
            Some(Predicate::Position(n))
        }
        Some(p) => {
            let value = p.strip_prefix("@id")?.trim_start().strip_prefix('=')?.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))?;
            Some(Predicate::IdEquals(unquoted.to_string()))
        }
    };

    Some(Step { name, predicate })
}

impl XPath {
    /// Matching elements in the primary tree. Never enters shadow roots.
    pub fn evaluate(&self, doc: &Document) -> Vec<NodeId> {
        let Some((first, rest)) = self.steps.split_first() else {
            return Vec::new();
        };

        let candidates = if self.absolute {
            doc.element_children(doc.root())
        } else {
            doc.descendant_elements(doc.root())
        };
        let context: Vec<NodeId> =
            candidates.into_iter().filter(|&n| step_matches(doc, n, first)).collect();
        descend(doc, context, rest)
    }

    /// Split `//*[@id="x"]/rest` into the id and a relative tail, so the
    /// anchor can be found by other means and the tail applied from there.
    pub fn id_anchor(&self) -> Option<(&str, XPath)> {
        if self.absolute {
            return None;
        }
        let (first, rest) = self.steps.split_first()?;
        match &first.predicate {
            Some(Predicate::IdEquals(id)) => {
                Some((id.as_str(), XPath { absolute: false, steps: rest.to_vec() }))
            }
            _ => None,
        }
    }

    /// Apply every step as a child step starting from `context`.
    pub fn evaluate_from(&self, doc: &Document, context: Vec<NodeId>) -> Vec<NodeId> {
        descend(doc, context, &self.steps)
    }

    /// Whether `node` satisfies the leading step (name and predicate).
    pub fn first_step_matches(&self, doc: &Document, node: NodeId) -> bool {
        self.steps.first().is_some_and(|step| step_matches(doc, node, step))
    }
}

fn descend(doc: &Document, mut context: Vec<NodeId>, steps: &[Step]) -> Vec<NodeId> {
    for step in steps {
        let mut seen = HashSet::new();
        context = context
            .into_iter()
            .flat_map(|ctx| doc.element_children(ctx))
            .filter(|&n| step_matches(doc, n, step) && seen.insert(n))
            .collect();
        if context.is_empty() {
            break;
        }
    }
    context
}

fn step_matches(doc: &Document, node: NodeId, step: &Step) -> bool {
    let Some(tag) = doc.tag(node) else {
        return false;
    };
    if step.name.as_deref().is_some_and(|name| name != tag) {
        return false;
    }
    match &step.predicate {
        None => true,
        Some(Predicate::IdEquals(id)) => doc.attr(node, "id") == Some(id.as_str()),
        Some(Predicate::Position(n)) => {
            let Some(parent) = doc.parent(node) else {
                return *n == 1;
            };
            doc.element_children(parent)
                .into_iter()
                .filter(|&s| step.name.as_deref().map_or(true, |name| doc.tag(s) == Some(name)))
                .position(|s| s == node)
                .is_some_and(|p| p + 1 == *n)
        }
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(doc: &Document, path: &str) -> Result<Vec<NodeId>, TreeError> {
    Ok(parse(path)?.evaluate(doc))
}

/// Quote `value` as an XPath string literal, if it can be expressed.
pub fn quote_literal(value: &str) -> Option<String> {
    if !value.contains('"') {
        Some(format!("\"{value}\""))
    } else if !value.contains('\'') {
        Some(format!("'{value}'"))
    } else {
        None
    }
}
