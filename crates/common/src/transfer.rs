// Import/export documents for moving a scope's patch set between machines.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Patch, PatchExport, ScopeGranularity};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("import payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("import payload must be a JSON object")]
    NotAnObject,

    #[error("import payload field `patches` must be a list")]
    PatchesNotAList,

    #[error("patch #{index} is invalid: {reason}")]
    InvalidPatch { index: usize, reason: String },
}

/// A validated import payload. Scope fields are informational; the importing
/// session always writes into its own active scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedPatches {
    pub scope: Option<ScopeGranularity>,
    pub scope_key: Option<String>,
    pub patches: Vec<Patch>,
}

/// Validate an import payload without touching any store.
pub fn parse_import(payload: &str) -> Result<ImportedPatches, ImportError> {
    let value: Value =
        serde_json::from_str(payload.trim()).map_err(|e| ImportError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(ImportError::NotAnObject)?;

    let entries =
        object.get("patches").and_then(Value::as_array).ok_or(ImportError::PatchesNotAList)?;

    let patches = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<Patch>(entry.clone())
                .map_err(|e| ImportError::InvalidPatch { index, reason: e.to_string() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scope = object
        .get("scope")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<ScopeGranularity>().ok());
    let scope_key = object.get("scopeKey").and_then(Value::as_str).map(str::to_string);

    Ok(ImportedPatches { scope, scope_key, patches })
}

/// Build the export document for a scope's current patch set.
pub fn build_export(scope: ScopeGranularity, scope_key: &str, patches: &[Patch]) -> PatchExport {
    PatchExport {
        scope,
        scope_key: scope_key.to_string(),
        exported_at: Utc::now(),
        patches: patches.to_vec(),
    }
}
