/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pluggable Transform Primitive and the pluggable compaction strategies built on top of it.
//!
//! The log service does not know what a change to a model *is*. Library users inject that knowledge
//! by implementing [`Transform`] for their change type, and pass the implementation to the
//! [server builder](crate::server::ServerSpec). Everything the service does with a payload goes
//! through the two functions of that trait.
//!
//! ## The transform contract
//!
//! Given two changes `a` and `b` that were produced against the same model state, `transform(a, b)`
//! must return a pair `(a', b')` such that applying `a` then `b'` produces the same state as applying
//! `b` then `a'`. This is the standard "TP1" property of operational transformation, and it is the
//! only property the log service relies on for convergence.
//!
//! The service always passes the change that is being brought *forward* (a client's change, or a
//! client's pending change) as `a`, and the change it is being brought past (a committed or delivered
//! change) as `b`. Clients that reconcile incoming operations against their own in-flight changes
//! must call the primitive with the same argument order, so that tie-breaks (e.g., two inserts at the
//! same offset) resolve identically on both sides.

pub mod compaction;

pub mod pluggables;

#[cfg(test)]
pub(crate) mod testing;

pub use compaction::{Compaction, ComposePrefix, NoCompaction};
pub use pluggables::{Transform, TransformError};
