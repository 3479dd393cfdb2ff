// Per-aspect "patched" markers stamped on nodes after a successful apply.
//
// A marker records which kind/attribute/value was applied to a node, so a
// reconciliation pass over an unchanged node is a no-op and does not feed
// the mutation loop.

use pagepatch_common::types::{Patch, PatchKind};
use sha2::{Digest, Sha256};

/// Prefix of every marker attribute.
pub const MARKER_PREFIX: &str = "data-pagepatch-";

/// Stamped on targets between edit commit and direct apply; cleared on success.
pub const PENDING_MARKER: &str = "data-pagepatch-pending";

/// Hex digits of the digest kept in a marker value.
const FINGERPRINT_LEN: usize = 16;

/// Attribute name of the marker for one aspect of a node.
pub fn marker_name(kind: PatchKind, attribute_name: Option<&str>) -> String {
    let mut name = format!("{MARKER_PREFIX}{}", kind.as_str().replace('_', "-"));
    if let Some(attr) = attribute_name.filter(|a| !a.trim().is_empty()) {
        name.push('-');
        name.extend(attr.trim().chars().map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        }));
    }
    name
}

/// Marker attribute name for `patch`'s aspect.
pub fn patch_marker_name(patch: &Patch) -> String {
    marker_name(patch.kind, patch.attribute_name.as_deref())
}

/// Short digest of what `patch` applies. Values can be large markup, so the
/// marker stores this instead of the value itself.
pub fn fingerprint(patch: &Patch) -> String {
    let mut hasher = Sha256::new();
    hasher.update(patch.kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(patch.attribute_name.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(patch.value.as_bytes());
    let digest = hasher.finalize();
    let mut hex = hex_encode(&digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
