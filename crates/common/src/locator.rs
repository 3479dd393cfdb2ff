// Locators: serializable descriptions of how to re-find a node in a document tree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delimiter between hops in the display form of a shadow locator.
pub const SHADOW_HOP_DELIMITER: &str = " >>> ";

/// How to re-find a specific node.
///
/// Resolving a locator produced by the synthesizer against an unchanged tree
/// yields exactly the original node. After the tree changes a locator may go
/// stale; that is expected, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "LocatorRepr", try_from = "LocatorInput")]
pub enum Locator {
    /// A CSS selector, resolved with an ordinary query first and a
    /// shadow-piercing query second.
    Css(String),
    /// An index-predicate path evaluated against the primary tree.
    XPath(String),
    /// A chain of host selectors, each resolved one hop at a time, ending in
    /// a selector scoped to the innermost shadow root.
    Shadow { host_path: Vec<String>, inner_selector: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocatorError {
    #[error("unknown locator type: {0}")]
    UnknownType(String),

    #[error("locator is missing field `{0}`")]
    MissingField(&'static str),

    #[error("locator selector is empty")]
    Empty,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Self::XPath(path.into())
    }

    /// Normalize a legacy bare-string locator. Bare strings were always CSS.
    pub fn from_legacy(selector: &str) -> Self {
        Self::Css(selector.to_string())
    }

    /// Canonical string form used in patch keys.
    ///
    /// Two locators produce the same key string if and only if they are equal.
    pub fn key_string(&self) -> String {
        serde_json::to_string(&LocatorRepr::from(self.clone())).unwrap_or_else(|_| self.to_string())
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self, Self::Shadow { .. })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(selector) => f.write_str(selector),
            Self::XPath(path) => f.write_str(path),
            Self::Shadow { host_path, inner_selector } => {
                for host in host_path {
                    write!(f, "{host}{SHADOW_HOP_DELIMITER}")?;
                }
                f.write_str(inner_selector)
            }
        }
    }
}

/// Parse the display form: `host >>> host >>> inner` is a shadow locator,
/// a leading `/` or `(` marks an XPath, anything else is CSS.
impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(LocatorError::Empty);
        }
        if value.contains(SHADOW_HOP_DELIMITER.trim()) {
            let mut hops: Vec<String> = value
                .split(SHADOW_HOP_DELIMITER.trim())
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .map(str::to_string)
                .collect();
            let inner_selector = hops.pop().ok_or(LocatorError::Empty)?;
            if hops.is_empty() {
                return Err(LocatorError::MissingField("hostPath"));
            }
            return Ok(Self::Shadow { host_path: hops, inner_selector });
        }
        if value.starts_with('/') || value.starts_with('(') {
            return Ok(Self::xpath(value));
        }
        Ok(Self::css(value))
    }
}

// ── Wire representation ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LocatorRepr {
    Css {
        value: String,
    },
    Xpath {
        value: String,
    },
    Shadow {
        #[serde(rename = "hostPath")]
        host_path: Vec<String>,
        #[serde(rename = "innerSelector")]
        inner_selector: String,
    },
}

impl From<Locator> for LocatorRepr {
    fn from(locator: Locator) -> Self {
        match locator {
            Locator::Css(value) => Self::Css { value },
            Locator::XPath(value) => Self::Xpath { value },
            Locator::Shadow { host_path, inner_selector } => {
                Self::Shadow { host_path, inner_selector }
            }
        }
    }
}

/// Everything accepted on input: the tagged shape, a legacy bare string, or a
/// legacy shadow object whose hosts are joined into one `hostSelector`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocatorInput {
    Bare(String),
    Tagged(TaggedInput),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaggedInput {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    host_path: Option<Vec<String>>,
    #[serde(default)]
    host_selector: Option<String>,
    #[serde(default)]
    inner_selector: Option<String>,
}

impl TryFrom<LocatorInput> for Locator {
    type Error = LocatorError;

    fn try_from(input: LocatorInput) -> Result<Self, Self::Error> {
        let tagged = match input {
            LocatorInput::Bare(selector) => {
                if selector.trim().is_empty() {
                    return Err(LocatorError::Empty);
                }
                return Ok(Self::from_legacy(&selector));
            }
            LocatorInput::Tagged(tagged) => tagged,
        };

        match tagged.kind.to_ascii_lowercase().as_str() {
            "css" => {
                let value = tagged.value.ok_or(LocatorError::MissingField("value"))?;
                if value.trim().is_empty() {
                    return Err(LocatorError::Empty);
                }
                Ok(Self::Css(value))
            }
            "xpath" => {
                let value = tagged.value.ok_or(LocatorError::MissingField("value"))?;
                if value.trim().is_empty() {
                    return Err(LocatorError::Empty);
                }
                Ok(Self::XPath(value))
            }
            "shadow" => {
                let inner_selector =
                    tagged.inner_selector.ok_or(LocatorError::MissingField("innerSelector"))?;
                let host_path = match (tagged.host_path, tagged.host_selector) {
                    (Some(path), _) => path,
                    (None, Some(joined)) => joined
                        .split(SHADOW_HOP_DELIMITER.trim())
                        .map(str::trim)
                        .filter(|hop| !hop.is_empty())
                        .map(str::to_string)
                        .collect(),
                    (None, None) => return Err(LocatorError::MissingField("hostPath")),
                };
                if host_path.is_empty() {
                    return Err(LocatorError::MissingField("hostPath"));
                }
                Ok(Self::Shadow { host_path, inner_selector })
            }
            other => Err(LocatorError::UnknownType(other.to_string())),
        }
    }
}
