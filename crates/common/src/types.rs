// Core domain types shared across all pagepatch crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::locator::Locator;
use crate::style::parse_declarations;

/// Prefix of the persistence key under which a scope's patch set is stored.
pub const PATCH_STORE_PREFIX: &str = "pagepatch:patches:";

/// Storage key for the patch set of `scope_key`.
pub fn storage_key(scope_key: &str) -> String {
    format!("{PATCH_STORE_PREFIX}{scope_key}")
}

/// The aspect of a node a patch mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    #[serde(alias = "text")]
    SetText,
    #[serde(alias = "html")]
    SetHtml,
    #[serde(alias = "attr")]
    SetAttribute,
    #[serde(alias = "style_append")]
    AppendStyle,
    #[serde(alias = "style_replace")]
    ReplaceStyle,
    Hide,
    Remove,
}

impl PatchKind {
    pub const ALL: [PatchKind; 7] = [
        PatchKind::SetText,
        PatchKind::SetHtml,
        PatchKind::SetAttribute,
        PatchKind::AppendStyle,
        PatchKind::ReplaceStyle,
        PatchKind::Hide,
        PatchKind::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetText => "set_text",
            Self::SetHtml => "set_html",
            Self::SetAttribute => "set_attribute",
            Self::AppendStyle => "append_style",
            Self::ReplaceStyle => "replace_style",
            Self::Hide => "hide",
            Self::Remove => "remove",
        }
    }

    /// Whether a patch of this kind needs an `attributeName`.
    pub fn requires_attribute_name(self) -> bool {
        matches!(self, Self::SetAttribute)
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "set_text" | "text" => Ok(Self::SetText),
            "set_html" | "html" => Ok(Self::SetHtml),
            "set_attribute" | "attr" => Ok(Self::SetAttribute),
            "append_style" | "style_append" => Ok(Self::AppendStyle),
            "replace_style" | "style_replace" => Ok(Self::ReplaceStyle),
            "hide" => Ok(Self::Hide),
            "remove" => Ok(Self::Remove),
            other => Err(format!("unknown patch kind `{other}`")),
        }
    }
}

/// One desired, persisted mutation targeting a located node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(default = "new_patch_id")]
    pub id: String,
    #[serde(alias = "selector")]
    pub locator: Locator,
    #[serde(alias = "type")]
    pub kind: PatchKind,
    /// Only meaningful for `SetAttribute`.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_null")]
    pub value: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_patch_id() -> String {
    Uuid::new_v4().to_string()
}

impl Patch {
    /// Create a patch with a fresh id and the current time.
    pub fn new(locator: Locator, kind: PatchKind, value: impl Into<String>) -> Self {
        Self {
            id: new_patch_id(),
            locator,
            kind,
            attribute_name: None,
            value: value.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attribute_name = Some(name.into());
        self
    }

    pub fn key(&self) -> PatchKey {
        PatchKey::new(&self.locator, self.kind, self.attribute_name.as_deref())
    }

    /// Check the fields a kind needs. A patch that fails this stays in the
    /// store but is skipped when applied.
    pub fn validate(&self) -> Result<(), PatchError> {
        let locator_empty = match &self.locator {
            Locator::Css(value) | Locator::XPath(value) => value.trim().is_empty(),
            Locator::Shadow { inner_selector, .. } => inner_selector.trim().is_empty(),
        };
        if locator_empty {
            return Err(PatchError::EmptyLocator);
        }
        match self.kind {
            PatchKind::SetAttribute
                if self.attribute_name.as_deref().map_or(true, |n| n.trim().is_empty()) =>
            {
                Err(PatchError::MissingAttributeName)
            }
            PatchKind::AppendStyle if parse_declarations(&self.value).is_empty() => {
                Err(PatchError::NoStyleDeclarations)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch locator is empty")]
    EmptyLocator,

    #[error("set_attribute patch has no attribute name")]
    MissingAttributeName,

    #[error("append_style patch has no valid declarations")]
    NoStyleDeclarations,
}

/// Identity of the (target, aspect) pair a patch describes. The store holds
/// at most one patch per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchKey {
    pub locator: String,
    pub kind: PatchKind,
    pub attribute_name: String,
}

impl PatchKey {
    pub fn new(locator: &Locator, kind: PatchKind, attribute_name: Option<&str>) -> Self {
        Self {
            locator: locator.key_string(),
            kind,
            attribute_name: attribute_name.unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.locator, self.kind, self.attribute_name)
    }
}

/// Granularity at which patches are partitioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeGranularity {
    /// Scheme, host and port.
    Origin,
    /// Origin plus pathname.
    Path,
    /// Origin, pathname and query string.
    #[default]
    Full,
}

impl ScopeGranularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Path => "path",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ScopeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeGranularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "origin" => Ok(Self::Origin),
            "path" => Ok(Self::Path),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown scope `{other}` (expected origin, path or full)")),
        }
    }
}

/// Value persisted under a scope's storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPatchSet {
    pub saved_at: DateTime<Utc>,
    pub scope: ScopeGranularity,
    pub scope_key: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

/// Document produced by export and accepted by import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchExport {
    pub scope: ScopeGranularity,
    pub scope_key: String,
    pub exported_at: DateTime<Utc>,
    pub patches: Vec<Patch>,
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
