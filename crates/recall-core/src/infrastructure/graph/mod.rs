//! Recall graph backends
//!
//! - [`InMemoryRecallGraph`]: everything in process, for tests and small graphs
//! - [`SqliteRecallGraph`]: persistent store with an FTS5 keyword index
//!
//! Both load [`GraphSnapshot`] files through [`SnapshotLoader`].

mod memory;
mod snapshot;
mod sqlite;

pub use memory::InMemoryRecallGraph;
pub use snapshot::{GraphSnapshot, LoadSummary, SnapshotEpisode, SnapshotLoader};
pub use sqlite::SqliteRecallGraph;
