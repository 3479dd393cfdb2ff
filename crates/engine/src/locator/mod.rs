// Locator synthesis (node -> serializable address) and resolution
// (address -> live node) over a `Document`.

pub mod resolve;
pub mod synthesize;

use thiserror::Error;

use crate::tree::NodeId;

pub use resolve::LocatorResolver;
pub use synthesize::LocatorSynthesizer;

/// Attribute namespace reserved for the tool's own markers. Attributes in it
/// are never used as locator anchors.
pub const RESERVED_ATTR_NAMESPACE: &str = "pagepatch";

/// Default cap on ancestor climbing when building structural paths.
pub const DEFAULT_MAX_CLIMB_DEPTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("node {0} is not attached to the document")]
    Detached(NodeId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("locator matched no element")]
    Unresolved,

    #[error("locator matched {matches} elements")]
    Ambiguous { matches: usize },
}
