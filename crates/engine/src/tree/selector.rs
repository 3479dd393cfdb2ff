// CSS selector parsing and matching.
//
// Supports type/universal, #id, .class, attribute selectors, structural
// pseudo-classes, `:scope`, `:not()` and the four combinators. Only element ancestors
// and the scoping root take part in matching, so a selector never matches
// across a shadow boundary.

use super::{Document, NodeId, TreeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    complexes: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    op: AttrOp,
    value: String,
    case_insensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pseudo {
    NthChild(Nth),
    NthLastChild(Nth),
    NthOfType(Nth),
    NthLastOfType(Nth),
    OnlyChild,
    OnlyOfType,
    /// The query's scoping root (document, shadow root or element).
    Scope,
    Not(Box<SelectorList>),
}

/// `an+b` position pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nth {
    a: i64,
    b: i64,
}

impl Nth {
    const FIRST: Nth = Nth { a: 0, b: 1 };

    fn matches(self, position: i64) -> bool {
        if self.a == 0 {
            return position == self.b;
        }
        let diff = position - self.b;
        diff % self.a == 0 && diff / self.a >= 0
    }

    fn parse(arg: &str) -> Option<Self> {
        let compact: String =
            arg.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_lowercase();
        match compact.as_str() {
            "odd" => return Some(Nth { a: 2, b: 1 }),
            "even" => return Some(Nth { a: 2, b: 0 }),
            _ => {}
        }
        let Some((a_part, b_part)) = compact.split_once('n') else {
            return compact.parse().ok().map(|b| Nth { a: 0, b });
        };
        let a = match a_part {
            "" | "+" => 1,
            "-" => -1,
            other => other.parse().ok()?,
        };
        let b = if b_part.is_empty() { 0 } else { b_part.parse().ok()? };
        Some(Nth { a, b })
    }
}

// ── Parsing ────────────────────────────────────────────────────────

pub fn parse(selector: &str) -> Result<SelectorList, TreeError> {
    let mut parser = Parser { source: selector, chars: selector.chars().collect(), pos: 0 };
    parser.parse_list()
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> TreeError {
        TreeError::InvalidSelector { selector: self.source.to_string(), reason: reason.into() }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<SelectorList, TreeError> {
        let mut complexes = Vec::new();
        loop {
            self.skip_ws();
            complexes.push(self.parse_complex()?);
            self.skip_ws();
            match self.bump() {
                None => break,
                Some(',') => continue,
                Some(other) => return Err(self.error(format!("unexpected `{other}`"))),
            }
        }
        Ok(SelectorList { complexes })
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, TreeError> {
        let mut compounds = vec![self.parse_compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            let combinator = match self.peek() {
                Some('>') => Combinator::Child,
                Some('+') => Combinator::NextSibling,
                Some('~') => Combinator::SubsequentSibling,
                None | Some(',') => break,
                Some(_) if had_ws => Combinator::Descendant,
                Some(other) => return Err(self.error(format!("unexpected `{other}`"))),
            };
            if combinator != Combinator::Descendant {
                self.pos += 1;
                self.skip_ws();
            }
            combinators.push(combinator);
            compounds.push(self.parse_compound()?);
        }
        Ok(ComplexSelector { compounds, combinators })
    }

    fn parse_compound(&mut self) -> Result<Compound, TreeError> {
        let start = self.pos;
        let mut compound = Compound::default();

        if self.eat('*') {
            // Universal: no tag constraint.
        } else if self.at_ident_start() {
            compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.pseudos.push(self.parse_pseudo()?);
                }
                _ => break,
            }
        }

        if self.pos == start {
            return Err(self.error("expected a selector"));
        }
        Ok(compound)
    }

    fn at_ident_start(&self) -> bool {
        match self.peek() {
            Some(c) if is_name_start(c) || c == '\\' => true,
            Some('-') => match self.peek_at(1) {
                Some(c) => is_name_start(c) || c == '-' || c == '\\',
                None => false,
            },
            _ => false,
        }
    }

    fn parse_ident(&mut self) -> Result<String, TreeError> {
        if !self.at_ident_start() {
            return Err(self.error("expected an identifier"));
        }
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.pos += 1;
                out.push(self.parse_escape());
            } else if is_name_char(c) {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(out)
    }

    /// Consume an escape body (the backslash is already consumed).
    fn parse_escape(&mut self) -> char {
        let Some(first) = self.peek() else {
            return char::REPLACEMENT_CHARACTER;
        };
        if !first.is_ascii_hexdigit() {
            self.pos += 1;
            return first;
        }
        let mut code = 0u32;
        let mut digits = 0;
        while digits < 6 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            code = code * 16 + self.bump().and_then(|c| c.to_digit(16)).unwrap_or(0);
            digits += 1;
        }
        if self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        match char::from_u32(code) {
            Some(c) if code != 0 => c,
            _ => char::REPLACEMENT_CHARACTER,
        }
    }

    fn parse_string(&mut self) -> Result<String, TreeError> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.peek() {
                    Some('\n') => self.pos += 1,
                    None => {}
                    Some(_) => out.push(self.parse_escape()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_attr(&mut self) -> Result<AttrSelector, TreeError> {
        self.skip_ws();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_ws();

        let op = match (self.peek(), self.peek_at(1)) {
            (Some(']'), _) => {
                self.pos += 1;
                return Ok(AttrSelector {
                    name,
                    op: AttrOp::Exists,
                    value: String::new(),
                    case_insensitive: false,
                });
            }
            (Some('='), _) => AttrOp::Equals,
            (Some('~'), Some('=')) => AttrOp::Includes,
            (Some('|'), Some('=')) => AttrOp::DashMatch,
            (Some('^'), Some('=')) => AttrOp::Prefix,
            (Some('$'), Some('=')) => AttrOp::Suffix,
            (Some('*'), Some('=')) => AttrOp::Substring,
            _ => return Err(self.error("expected an attribute operator")),
        };
        self.pos += if op == AttrOp::Equals { 1 } else { 2 };
        self.skip_ws();

        let value = match self.peek() {
            Some('"') | Some('\'') => self.parse_string()?,
            _ => self.parse_ident()?,
        };
        self.skip_ws();

        let mut case_insensitive = false;
        if matches!(self.peek(), Some('i') | Some('I') | Some('s') | Some('S')) {
            case_insensitive = matches!(self.bump(), Some('i') | Some('I'));
            self.skip_ws();
        }
        if !self.eat(']') {
            return Err(self.error("expected `]`"));
        }
        Ok(AttrSelector { name, op, value, case_insensitive })
    }

    fn parse_pseudo(&mut self) -> Result<Pseudo, TreeError> {
        let name = self.parse_ident()?.to_ascii_lowercase();
        let arg = if self.eat('(') {
            let start = self.pos;
            let mut depth = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    '(' => depth += 1,
                    ')' if depth == 0 => break,
                    ')' => depth -= 1,
                    _ => {}
                }
                self.pos += 1;
            }
            let arg: String = self.chars[start..self.pos].iter().collect();
            if !self.eat(')') {
                return Err(self.error("expected `)`"));
            }
            Some(arg)
        } else {
            None
        };

        let nth = |arg: Option<String>| {
            arg.as_deref().and_then(Nth::parse).ok_or_else(|| self.error(format!("bad :{name}() argument")))
        };
        let pseudo = match name.as_str() {
            "first-child" => Pseudo::NthChild(Nth::FIRST),
            "last-child" => Pseudo::NthLastChild(Nth::FIRST),
            "only-child" => Pseudo::OnlyChild,
            "first-of-type" => Pseudo::NthOfType(Nth::FIRST),
            "last-of-type" => Pseudo::NthLastOfType(Nth::FIRST),
            "only-of-type" => Pseudo::OnlyOfType,
            "scope" => Pseudo::Scope,
            "nth-child" => Pseudo::NthChild(nth(arg)?),
            "nth-last-child" => Pseudo::NthLastChild(nth(arg)?),
            "nth-of-type" => Pseudo::NthOfType(nth(arg)?),
            "nth-last-of-type" => Pseudo::NthLastOfType(nth(arg)?),
            "not" => {
                let inner = arg.as_deref().map(str::trim).filter(|a| !a.is_empty());
                let inner = inner.ok_or_else(|| self.error("empty :not() argument"))?;
                Pseudo::Not(Box::new(parse(inner).map_err(|_| self.error("bad :not() argument"))?))
            }
            other => return Err(self.error(format!("unsupported pseudo-class :{other}"))),
        };
        Ok(pseudo)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_ascii_digit() || c == '-'
}

// ── Matching ───────────────────────────────────────────────────────

impl SelectorList {
    /// Match with no scoping root; `:scope` then means the document element.
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.matches_scoped(doc, node, None)
    }

    /// Match relative to the root a query was issued on.
    pub fn matches_scoped(&self, doc: &Document, node: NodeId, scope: Option<NodeId>) -> bool {
        let scope = scope.or_else(|| doc.document_element());
        self.complexes.iter().any(|complex| {
            let last = complex.compounds.len() - 1;
            match_from(doc, node, complex, last, scope)
        })
    }
}

impl Compound {
    fn is_scope_only(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.pseudos == [Pseudo::Scope]
    }
}

fn match_from(
    doc: &Document,
    node: NodeId,
    complex: &ComplexSelector,
    idx: usize,
    scope: Option<NodeId>,
) -> bool {
    if !matches_compound(doc, node, &complex.compounds[idx], scope) {
        return false;
    }
    if idx == 0 {
        return true;
    }
    match complex.combinators[idx - 1] {
        Combinator::Child => {
            doc.parent(node).is_some_and(|p| match_from(doc, p, complex, idx - 1, scope))
        }
        Combinator::Descendant => {
            let mut cur = doc.parent(node);
            while let Some(ancestor) = cur {
                if match_from(doc, ancestor, complex, idx - 1, scope) {
                    return true;
                }
                cur = doc.parent(ancestor);
            }
            false
        }
        Combinator::NextSibling => previous_element_siblings(doc, node)
            .first()
            .is_some_and(|&s| match_from(doc, s, complex, idx - 1, scope)),
        Combinator::SubsequentSibling => previous_element_siblings(doc, node)
            .into_iter()
            .any(|s| match_from(doc, s, complex, idx - 1, scope)),
    }
}

/// Element siblings before `node`, nearest first.
fn previous_element_siblings(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let Some(parent) = doc.parent(node) else {
        return Vec::new();
    };
    let siblings = doc.element_children(parent);
    let pos = siblings.iter().position(|&s| s == node).unwrap_or(0);
    siblings[..pos].iter().rev().copied().collect()
}

fn matches_compound(doc: &Document, node: NodeId, compound: &Compound, scope: Option<NodeId>) -> bool {
    let Some(el) = doc.element(node) else {
        // Non-element roots only ever match a bare `:scope`.
        return compound.is_scope_only() && Some(node) == scope;
    };
    if compound.tag.as_deref().is_some_and(|tag| tag != el.tag()) {
        return false;
    }
    if compound.id.as_deref().is_some_and(|id| el.attr("id") != Some(id)) {
        return false;
    }
    if !compound.classes.iter().all(|c| el.has_class(c)) {
        return false;
    }
    if !compound.attrs.iter().all(|a| matches_attr(el.attr(&a.name), a)) {
        return false;
    }
    compound.pseudos.iter().all(|p| matches_pseudo(doc, node, p, scope))
}

fn matches_attr(actual: Option<&str>, selector: &AttrSelector) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let (actual, expected) = if selector.case_insensitive {
        (actual.to_lowercase(), selector.value.to_lowercase())
    } else {
        (actual.to_string(), selector.value.clone())
    };
    match selector.op {
        AttrOp::Exists => true,
        AttrOp::Equals => actual == expected,
        AttrOp::Includes => actual.split_ascii_whitespace().any(|w| w == expected),
        AttrOp::DashMatch => actual == expected || actual.starts_with(&format!("{expected}-")),
        AttrOp::Prefix => !expected.is_empty() && actual.starts_with(&expected),
        AttrOp::Suffix => !expected.is_empty() && actual.ends_with(&expected),
        AttrOp::Substring => !expected.is_empty() && actual.contains(&expected),
    }
}

fn matches_pseudo(doc: &Document, node: NodeId, pseudo: &Pseudo, scope: Option<NodeId>) -> bool {
    match pseudo {
        Pseudo::Scope => return Some(node) == scope,
        Pseudo::Not(list) => return !list.matches_scoped(doc, node, scope),
        _ => {}
    }
    let siblings = match doc.parent(node) {
        Some(parent) => doc.element_children(parent),
        None => vec![node],
    };
    let tag = doc.tag(node);
    let same_type: Vec<NodeId> = siblings.iter().copied().filter(|&s| doc.tag(s) == tag).collect();

    let position = |list: &[NodeId]| list.iter().position(|&s| s == node).map_or(0, |p| p as i64 + 1);
    let position_from_end = |list: &[NodeId]| {
        list.iter().rev().position(|&s| s == node).map_or(0, |p| p as i64 + 1)
    };

    match pseudo {
        Pseudo::NthChild(nth) => nth.matches(position(&siblings)),
        Pseudo::NthLastChild(nth) => nth.matches(position_from_end(&siblings)),
        Pseudo::NthOfType(nth) => nth.matches(position(&same_type)),
        Pseudo::NthLastOfType(nth) => nth.matches(position_from_end(&same_type)),
        Pseudo::OnlyChild => siblings.len() == 1,
        Pseudo::OnlyOfType => same_type.len() == 1,
        Pseudo::Scope | Pseudo::Not(_) => false,
    }
}

// ── Escaping ───────────────────────────────────────────────────────

/// Escape `value` for use as a CSS identifier (`#id`, `.class`).
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if code == 0 {
            out.push(char::REPLACEMENT_CHARACTER);
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{code:x} "));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if is_name_char(c) {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Quote `value` as a CSS string literal.
pub fn css_escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push(char::REPLACEMENT_CHARACTER),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\{:x} ", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
