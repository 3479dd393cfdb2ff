// pagepatch-engine: locator synthesis/resolution and the patch
// store/apply/undo engine over an in-memory document tree.

pub mod apply;
pub mod config;
pub mod locator;
pub mod session;
pub mod store;
pub mod tree;
pub mod undo;

pub use apply::driver::{run_reconciler, BootPlan, DriverReport, Page};
pub use apply::{ApplyMode, ApplyOutcome, ApplySummary, Applier, SkipReason};
pub use config::EngineConfig;
pub use locator::{LocatorResolver, LocatorSynthesizer};
pub use session::{EditCommand, Session, SessionError};
pub use store::{KeyValueStore, MemoryKv, PatchStore, SqliteKv};
pub use tree::{Document, NodeId};
