// Inline style declarations: parse, edit and serialize `style` attribute values.

/// One `name: value [!important]` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleDeclaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

impl StyleDeclaration {
    pub fn new(name: impl Into<String>, value: impl Into<String>, important: bool) -> Self {
        Self { name: name.into(), value: value.into(), important }
    }
}

/// An element's inline style as an ordered declaration list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineStyle {
    declarations: Vec<StyleDeclaration>,
}

impl InlineStyle {
    pub fn parse(style_attr: Option<&str>) -> Self {
        Self { declarations: style_attr.map(parse_declarations).unwrap_or_default() }
    }

    pub fn get(&self, name: &str) -> Option<&StyleDeclaration> {
        let name = name.to_ascii_lowercase();
        self.declarations.iter().find(|d| d.name == name)
    }

    /// Set a property, replacing an existing declaration in place.
    pub fn set(&mut self, name: &str, value: &str, important: bool) {
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        match self.declarations.iter_mut().find(|d| d.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.important = important;
            }
            None => self.declarations.push(StyleDeclaration { name, value, important }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<StyleDeclaration> {
        let name = name.to_ascii_lowercase();
        let pos = self.declarations.iter().position(|d| d.name == name)?;
        Some(self.declarations.remove(pos))
    }

    pub fn clear(&mut self) {
        self.declarations.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn declarations(&self) -> &[StyleDeclaration] {
        &self.declarations
    }

    /// Serialized attribute value, or `None` when no declarations remain.
    pub fn to_attribute_value(&self) -> Option<String> {
        if self.declarations.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (idx, decl) in self.declarations.iter().enumerate() {
            if idx > 0 {
                out.push(' ');
            }
            out.push_str(&decl.name);
            out.push_str(": ");
            out.push_str(&decl.value);
            if decl.important {
                out.push_str(" !important");
            }
            out.push(';');
        }
        Some(out)
    }
}

/// Parse a style string into declarations.
///
/// Declarations are split on `;` and then on the first `:`, ignoring
/// delimiters inside quotes or parentheses. Declarations missing a name or a
/// value are dropped. A trailing `!important` is lifted into the flag.
pub fn parse_declarations(source: &str) -> Vec<StyleDeclaration> {
    let mut out: Vec<StyleDeclaration> = Vec::new();
    for raw in split_top_level(source, b';') {
        let Some((name, value)) = split_once_top_level(raw, b':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let (value, important) = strip_important(value.trim());
        if name.is_empty() || value.is_empty() {
            continue;
        }
        match out.iter_mut().find(|d| d.name == name) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.important = important;
            }
            None => out.push(StyleDeclaration { name, value: value.to_string(), important }),
        }
    }
    out
}

/// Strip a trailing `!important` (any case, optional inner whitespace).
pub fn strip_important(value: &str) -> (&str, bool) {
    let trimmed = value.trim_end();
    if let Some(bang) = trimmed.rfind('!') {
        let suffix = trimmed[bang + 1..].trim();
        if suffix.eq_ignore_ascii_case("important") {
            return (trimmed[..bang].trim_end(), true);
        }
    }
    (trimmed, false)
}

fn split_top_level(source: &str, delimiter: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut scanner = Scanner::default();
    let bytes = source.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if scanner.at_top_level(bytes, &mut i) && bytes[i] == delimiter {
            parts.push(&source[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&source[start..]);
    parts
}

fn split_once_top_level(source: &str, delimiter: u8) -> Option<(&str, &str)> {
    let mut scanner = Scanner::default();
    let bytes = source.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if scanner.at_top_level(bytes, &mut i) && bytes[i] == delimiter {
            return Some((&source[..i], &source[i + 1..]));
        }
        i += 1;
    }
    None
}

#[derive(Default)]
struct Scanner {
    quote: Option<u8>,
    paren_depth: usize,
}

impl Scanner {
    /// Advance quote/paren state for `bytes[*i]`. Returns true if the byte
    /// sits outside any quote or parenthesis. Escapes inside quotes skip the
    /// following byte.
    fn at_top_level(&mut self, bytes: &[u8], i: &mut usize) -> bool {
        let ch = bytes[*i];
        match self.quote {
            Some(_) if ch == b'\\' => {
                if *i + 1 < bytes.len() {
                    *i += 1;
                }
                false
            }
            Some(q) if ch == q => {
                self.quote = None;
                false
            }
            Some(_) => false,
            None => match ch {
                b'"' | b'\'' => {
                    self.quote = Some(ch);
                    false
                }
                b'(' => {
                    self.paren_depth += 1;
                    false
                }
                b')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    false
                }
                _ => self.paren_depth == 0,
            },
        }
    }
}
