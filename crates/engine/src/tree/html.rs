// Lenient HTML parsing and serialization for the arena tree.
//
// Declarative shadow roots (`<template shadowrootmode="open|closed">`) attach
// to their parent element on parse and are emitted again on serialize, so a
// snapshot with encapsulated sub-trees survives a file round-trip.

use super::{Document, NodeData, NodeId, ShadowMode, TreeError};

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Tags whose start implicitly closes an open element of the same tag.
const SELF_NESTING_CLOSES: &[&str] = &["p", "li", "option", "tr", "td", "th", "dt", "dd"];

const SHADOW_TEMPLATE_ATTR: &str = "shadowrootmode";

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

struct OpenNode {
    id: NodeId,
    tag: String,
}

/// Parse `markup` and append the resulting nodes under `parent`.
/// Returns the top-level nodes that were appended.
pub(crate) fn parse_into(doc: &mut Document, parent: NodeId, markup: &str) -> Vec<NodeId> {
    let bytes = markup.as_bytes();
    let mut stack = vec![OpenNode { id: parent, tag: String::new() }];
    let mut top_level = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        if markup[i..].starts_with("<!--") {
            let end = markup[i + 4..].find("-->").map(|p| i + 4 + p);
            let text = &markup[i + 4..end.unwrap_or(bytes.len())];
            let node = doc.create_comment(text);
            append(doc, &stack, &mut top_level, node);
            i = end.map_or(bytes.len(), |e| e + 3);
            continue;
        }

        if bytes[i] == b'<' && matches!(bytes.get(i + 1), Some(b'!') | Some(b'?')) {
            i = markup[i..].find('>').map_or(bytes.len(), |p| i + p + 1);
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1) == Some(&b'/') {
            let (tag, next) = parse_end_tag(markup, i);
            i = next;
            close_element(&mut stack, &tag);
            continue;
        }

        if bytes[i] == b'<' && bytes.get(i + 1).is_some_and(u8::is_ascii_alphabetic) {
            let start = parse_start_tag(markup, i);
            i = start.next;

            if SELF_NESTING_CLOSES.contains(&start.tag.as_str())
                && stack.len() > 1
                && stack.last().is_some_and(|top| top.tag == start.tag)
            {
                stack.pop();
            }

            if start.tag == "template" {
                if let Some(mode) = declarative_shadow_mode(&start.attrs) {
                    let host = stack.last().map(|top| top.id).unwrap_or(parent);
                    if let Ok(shadow) = doc.attach_shadow(host, mode) {
                        stack.push(OpenNode { id: shadow, tag: start.tag });
                        continue;
                    }
                }
            }

            let node = doc.create_element(&start.tag);
            for (name, value) in &start.attrs {
                if doc.attr(node, name).is_none() {
                    let _ = doc.set_attribute(node, name, value);
                }
            }
            append(doc, &stack, &mut top_level, node);

            if RAW_TEXT_TAGS.contains(&start.tag.as_str()) {
                let close = find_end_tag(markup, i, &start.tag);
                let body = &markup[i..close];
                if !body.is_empty() {
                    let text = doc.create_text(body);
                    let _ = doc.append_child(node, text);
                }
                i = parse_end_tag(markup, close).1;
                continue;
            }

            if !start.self_closing && !is_void_tag(&start.tag) {
                stack.push(OpenNode { id: node, tag: start.tag });
            }
            continue;
        }

        let text_start = i;
        i += 1;
        while i < bytes.len() && !starts_markup(bytes, i) {
            i += 1;
        }
        let text = decode_entities(&markup[text_start..i]);
        let node = doc.create_text(&text);
        append(doc, &stack, &mut top_level, node);
    }

    top_level
}

fn append(doc: &mut Document, stack: &[OpenNode], top_level: &mut Vec<NodeId>, node: NodeId) {
    let Some(parent) = stack.last() else {
        return;
    };
    if doc.append_child(parent.id, node).is_ok() && stack.len() == 1 {
        top_level.push(node);
    }
}

fn close_element(stack: &mut Vec<OpenNode>, tag: &str) {
    // The bottom entry is the insertion parent and is never closed.
    if let Some(pos) = stack.iter().skip(1).rposition(|open| open.tag == tag) {
        stack.truncate(pos + 1);
    }
}

fn starts_markup(bytes: &[u8], i: usize) -> bool {
    bytes[i] == b'<'
        && bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'))
}

fn declarative_shadow_mode(attrs: &[(String, String)]) -> Option<ShadowMode> {
    let (_, mode) = attrs.iter().find(|(name, _)| name == SHADOW_TEMPLATE_ATTR)?;
    match mode.to_ascii_lowercase().as_str() {
        "open" => Some(ShadowMode::Open),
        "closed" => Some(ShadowMode::Closed),
        _ => None,
    }
}

struct StartTag {
    tag: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    next: usize,
}

fn parse_start_tag(markup: &str, at: usize) -> StartTag {
    let bytes = markup.as_bytes();
    let mut i = at + 1;
    let name_start = i;
    while i < bytes.len() && !is_name_terminator(bytes[i]) {
        i += 1;
    }
    let tag = markup[name_start..i].to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                i += 1;
                if bytes.get(i) == Some(&b'>') {
                    self_closing = true;
                    i += 1;
                    break;
                }
                continue;
            }
            _ => {}
        }

        let attr_start = i;
        while i < bytes.len() && !is_name_terminator(bytes[i]) && bytes[i] != b'=' {
            i += 1;
        }
        if i == attr_start {
            i += 1;
            continue;
        }
        let name = markup[attr_start..i].to_ascii_lowercase();

        skip_ws(bytes, &mut i);
        let value = if bytes.get(i) == Some(&b'=') {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(markup, &mut i)
        } else {
            String::new()
        };
        attrs.push((name, value));
    }

    StartTag { tag, attrs, self_closing, next: i }
}

fn parse_attr_value(markup: &str, i: &mut usize) -> String {
    let bytes = markup.as_bytes();
    match bytes.get(*i) {
        Some(&quote @ (b'"' | b'\'')) => {
            let start = *i + 1;
            let end = markup[start..].find(quote as char).map_or(bytes.len(), |p| start + p);
            *i = (end + 1).min(bytes.len());
            decode_entities(&markup[start..end])
        }
        _ => {
            let start = *i;
            while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
                *i += 1;
            }
            decode_entities(&markup[start..*i])
        }
    }
}

fn parse_end_tag(markup: &str, at: usize) -> (String, usize) {
    let bytes = markup.as_bytes();
    let mut i = (at + 2).min(bytes.len());
    let name_start = i;
    while i < bytes.len() && !is_name_terminator(bytes[i]) {
        i += 1;
    }
    let tag = markup[name_start..i].to_ascii_lowercase();
    let next = markup[i..].find('>').map_or(bytes.len(), |p| i + p + 1);
    (tag, next)
}

/// Byte offset of the `</tag` that closes a raw-text element, or the end.
fn find_end_tag(markup: &str, from: usize, tag: &str) -> usize {
    let needle = format!("</{tag}");
    let lower = markup[from..].to_ascii_lowercase();
    lower.find(&needle).map_or(markup.len(), |p| from + p)
}

fn is_name_terminator(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'>' || b == b'/'
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

pub fn decode_entities(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.bytes().take(12).position(|b| b == b';') else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => entity.strip_prefix('#').and_then(|num| {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32)
            }),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

// ── Document API ───────────────────────────────────────────────────

impl Document {
    /// Serialized children of `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_children(id, &mut out);
        out
    }

    /// Serialized `id` including its own tag.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Replace the children of element `id` with parsed `markup`.
    pub fn set_inner_html(&mut self, id: NodeId, markup: &str) -> Result<(), TreeError> {
        if !self.is_element(id) {
            return Err(TreeError::NotAnElement(id));
        }
        self.clear_children(id)?;
        parse_into(self, id, markup);
        self.mutations.push(super::MutationRecord { target: id });
        Ok(())
    }

    /// Parse `markup` and append it under `parent`, returning the new top-level nodes.
    pub fn append_html(&mut self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>, TreeError> {
        match self.data(parent) {
            Some(NodeData::Document | NodeData::Element(_) | NodeData::ShadowRoot { .. }) => {
                Ok(parse_into(self, parent, markup))
            }
            Some(_) => Err(TreeError::NotAContainer(parent)),
            None => Err(TreeError::UnknownNode(parent)),
        }
    }

    fn write_children(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            self.write_node(child, out);
        }
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Element(el)) => {
                out.push('<');
                out.push_str(el.tag());
                for (name, value) in el.attrs() {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_attr(value, out);
                    out.push('"');
                }
                out.push('>');
                if is_void_tag(el.tag()) {
                    return;
                }
                if let Some(shadow) = self.attached_shadow_root(id) {
                    let mode = match self.data(shadow) {
                        Some(NodeData::ShadowRoot { mode, .. }) => *mode,
                        _ => ShadowMode::Open,
                    };
                    out.push_str("<template shadowrootmode=\"");
                    out.push_str(mode.as_str());
                    out.push_str("\">");
                    self.write_children(shadow, out);
                    out.push_str("</template>");
                }
                self.write_children(id, out);
                out.push_str("</");
                out.push_str(el.tag());
                out.push('>');
            }
            Some(NodeData::Text(text)) => {
                let raw = self.parent(id).and_then(|p| self.tag(p)).is_some_and(|t| RAW_TEXT_TAGS.contains(&t));
                if raw {
                    out.push_str(text);
                } else {
                    escape_text(text, out);
                }
            }
            Some(NodeData::Comment(text)) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            Some(NodeData::Document | NodeData::ShadowRoot { .. }) => self.write_children(id, out),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(doc: &Document, tag: &str) -> NodeId {
        doc.descendant_elements(doc.root())
            .into_iter()
            .find(|&n| doc.tag(n) == Some(tag))
            .unwrap_or_else(|| panic!("no <{tag}> in document"))
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        let doc = Document::parse(
            "<!DOCTYPE html><html><body><div id=main class='a b'><span data-x=1>Hi &amp; bye</span></div></body></html>",
        );
        let span = find(&doc, "span");
        assert_eq!(doc.attr(span, "data-x"), Some("1"));
        assert_eq!(doc.text_content(span), "Hi & bye");
        let div = find(&doc, "div");
        assert!(doc.element(div).unwrap().has_class("b"));
        assert_eq!(doc.body().map(|b| doc.tag(b)), Some(Some("body")));
    }

    #[test]
    fn void_and_self_closing_tags_do_not_nest() {
        let doc = Document::parse("<p>a<br>b<img src=x.png/>c</p>");
        let p = find(&doc, "p");
        assert_eq!(doc.element_children(p).len(), 2);
        assert_eq!(doc.text_content(p), "abc");
    }

    #[test]
    fn script_content_is_raw_text() {
        let doc = Document::parse("<script>if (a < b) { x('</div>') }</script><div>ok</div>");
        let script = find(&doc, "script");
        assert_eq!(doc.text_content(script), "if (a < b) { x('</div>') }");
        let _ = find(&doc, "div");
    }

    #[test]
    fn unclosed_and_stray_tags_recover() {
        let doc = Document::parse("<ul><li>one<li>two</ul></span><p>after");
        let ul = find(&doc, "ul");
        assert_eq!(doc.element_children(ul).len(), 2);
        let p = find(&doc, "p");
        assert_eq!(doc.text_content(p), "after");
    }

    #[test]
    fn declarative_shadow_root_attaches_to_parent() {
        let doc = Document::parse(
            "<my-card id=card><template shadowrootmode=\"open\"><p class=inner>secret</p></template><span>light</span></my-card>",
        );
        let host = find(&doc, "my-card");
        let shadow = doc.shadow_root(host).expect("shadow root attached");
        let inner = doc.element_children(shadow)[0];
        assert_eq!(doc.text_content(inner), "secret");
        assert_eq!(doc.element_children(host).len(), 1);
    }

    #[test]
    fn serializer_round_trips_shadow_roots() {
        let markup = "<x-app><template shadowrootmode=\"closed\"><b>in</b></template><i>out</i></x-app>";
        let doc = Document::parse(markup);
        assert_eq!(doc.inner_html(doc.root()), markup);
    }

    #[test]
    fn serializer_escapes_text_and_attributes() {
        let mut doc = Document::parse("<div></div>");
        let div = find(&doc, "div");
        doc.set_attribute(div, "title", "a \"quote\" & more").unwrap();
        doc.set_text_content(div, "1 < 2").unwrap();
        assert_eq!(
            doc.outer_html(div),
            "<div title=\"a &quot;quote&quot; &amp; more\">1 &lt; 2</div>"
        );
    }

    #[test]
    fn set_inner_html_replaces_children() {
        let mut doc = Document::parse("<div><span>old</span></div>");
        let div = find(&doc, "div");
        let old = find(&doc, "span");
        doc.set_inner_html(div, "<b>new</b> text").unwrap();
        assert!(!doc.is_attached(old));
        assert_eq!(doc.inner_html(div), "<b>new</b> text");
    }

    #[test]
    fn decodes_numeric_entities_and_keeps_unknown() {
        assert_eq!(decode_entities("&#65;&#x42;&bogus;&"), "AB&bogus;&");
    }

    #[test]
    fn lone_angle_bracket_is_text() {
        let doc = Document::parse("<p>a < b</p>");
        assert_eq!(doc.text_content(find(&doc, "p")), "a < b");
    }
}
