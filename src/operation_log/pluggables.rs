//! Traits for pluggable persistence of operations.
//!
//! The log service persists two kinds of records, each through its own trait:
//! 1. [`Journal`]: raw operations, exactly as clients submitted them, in arrival order. The journal is
//!    a store-and-forward record; it never transforms anything.
//! 2. [`LogStore`]: transformed operations, i.e., the entries of each model's operation log.
//!
//! Both traits are implemented by the library user for whatever persistence mechanism they want, and
//! passed to the [server builder](crate::server::ServerSpec). Every model actor gets its own clone of
//! each, so implementations must be cheap to clone and safe to use from several threads at once.
//! Volatile in-memory implementations are provided in [`mem`](super::mem).

use thiserror::Error;

use crate::types::{
    data_types::{JournalSequence, ModelID, OpID},
    operation::Operation,
};

/// Append-only storage for the transformed operation logs of every model.
pub trait LogStore<C>: Clone + Send + 'static {
    /// Durably append `op` to the end of `model`'s log. Must return only after `op` is durable.
    fn append(&mut self, model: &ModelID, op: &Operation<C>) -> Result<(), StoreError>;

    /// Read the operations of `model`'s log that come after the operation identified by `after`, in
    /// log order. An empty `after` reads the whole log.
    fn read_from(&self, model: &ModelID, after: &OpID) -> Result<Vec<Operation<C>>, StoreError>;
}

/// Append-only storage for raw, untransformed client operations.
pub trait Journal<C>: Clone + Send + 'static {
    /// Durably persist the raw operation `op` of `model`, unless an operation with the same ID has
    /// already been persisted for the model, in which case nothing is written.
    fn append_raw(
        &mut self,
        model: &ModelID,
        op: &Operation<C>,
    ) -> Result<AppendRawOutcome, StoreError>;

    /// Read the raw operations of `model` persisted after the operation identified by `after`, in
    /// arrival order. An empty `after` reads the whole journal of the model.
    fn read_from(&self, model: &ModelID, after: &OpID) -> Result<Vec<Operation<C>>, StoreError>;
}

/// The result of [`Journal::append_raw`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendRawOutcome {
    /// The operation is now durable, and was assigned this position in the model's journal order.
    Persisted(JournalSequence),

    /// An operation with the same ID had already been persisted.
    Duplicate,
}

/// Enumerates the ways reading from or writing to a [`LogStore`] or [`Journal`] may fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `read_from` was asked to read after an operation that is not stored for the model.
    #[error("operation {id:?} is not stored for model {model:?}")]
    UnknownOperation { model: ModelID, id: OpID },

    /// The persistence mechanism failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}
