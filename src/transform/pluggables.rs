//! Trait for the pluggable Transform Primitive.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Methods that a type needs to implement to serve as the log service's Transform Primitive.
///
/// Besides implementing the functions specified in the trait, implementors are expected to be *pure*:
/// every function should evaluate to the same value every time it is called with the same
/// arguments, and should be total over well-formed changes. An `Err` is treated as an unrecoverable
/// fault of the model whose log is being reconciled.
pub trait Transform: Clone + Send + 'static {
    /// The opaque change type carried in the `Payload` field of operations.
    type Change: Clone + Debug + Send + Serialize + DeserializeOwned + 'static;

    /// Transform two changes produced against the same state.
    ///
    /// # Return value
    /// A pair `(a', b')` such that `a · b'` and `b · a'` produce the same state.
    fn transform(
        &self,
        a: &Self::Change,
        b: &Self::Change,
    ) -> Result<(Self::Change, Self::Change), TransformError>;

    /// Compose a sequence of consecutive changes into a single equivalent change.
    ///
    /// Called only with non-empty sequences.
    fn compose(&self, changes: &[Self::Change]) -> Result<Self::Change, TransformError>;
}

/// Enumerates the ways in which a Transform Primitive may fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The changes could not be reconciled, e.g., because one of them is malformed or out of range for
    /// the state it claims to apply to.
    #[error("unresolvable conflict: {0}")]
    Conflict(String),

    /// `compose` was called with an empty sequence.
    #[error("cannot compose an empty sequence of changes")]
    EmptyCompose,
}
