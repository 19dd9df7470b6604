//! Each model's operation log, and the pluggable persistence beneath it.
//!
//! # Operation Log and Journal
//!
//! The log service reads and writes two append-only records per model:
//! - The **operation log**: the ordered sequence of *transformed* operations that every client of the
//!   model eventually applies. Insertion order is logical time, and the log forms a strict version
//!   chain (see [`operation_log`]). The reconciliation engine is its only writer.
//! - The **journal**: the raw operations as clients submitted them, persisted before they are
//!   transformed. The journal also drops operations whose ID it has already seen, and assigns every
//!   operation it persists a [`JournalSequence`](crate::types::data_types::JournalSequence); that
//!   sequence is the total order in which racing operations are committed.
//!
//! # Pluggable persistence
//!
//! - Library users get to choose how exactly the two records are persisted.
//! - The log service merely requires that whatever is provided implements the abstract append +
//!   range-read functionality defined by the traits in [`pluggables`].
//! - [`mem`] provides volatile in-memory implementations.

pub mod mem;

#[allow(clippy::module_inception)]
pub mod operation_log;

pub mod pluggables;

pub use mem::{MemJournal, MemLogStore};
pub use operation_log::{OperationLog, OperationLogError};
pub use pluggables::{AppendRawOutcome, Journal, LogStore, StoreError};
