/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable strategies for compacting the `Rebased` field of Bootstrap messages.
//!
//! A fresh subscription reconstructs its model from scratch by applying every operation in its
//! Bootstrap's `Rebased` list. The server is free to replace a prefix of that list with a single
//! equivalent operation produced by [`Transform::compose`], as long as the ID of the last operation it
//! replaces is preserved: the subscription's BasisID is taken from the last element of `Rebased`, and
//! the client uses it as the basis of its next operations.
//!
//! Compaction never touches the log itself. It only changes how the log is presented to a client.

use crate::types::{data_types::OpID, operation::{Operation, Parents}};

use super::pluggables::{Transform, TransformError};

/// A strategy for compacting the operations sent in a Bootstrap.
pub trait Compaction<T: Transform>: Send + Sync + 'static {
    /// Compact `rebased`, an ordered, contiguous run of log entries.
    ///
    /// Implementations must return a sequence that, applied in order, produces the same state as
    /// `rebased`, and whose last element has the same ID as the last element of `rebased`.
    fn compact(
        &self,
        transform: &T,
        rebased: Vec<Operation<T::Change>>,
    ) -> Result<Vec<Operation<T::Change>>, TransformError>;
}

/// Sends `Rebased` exactly as it appears in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCompaction;

impl<T: Transform> Compaction<T> for NoCompaction {
    fn compact(
        &self,
        _: &T,
        rebased: Vec<Operation<T::Change>>,
    ) -> Result<Vec<Operation<T::Change>>, TransformError> {
        Ok(rebased)
    }
}

/// Composes all but the last `keep_last` entries of `Rebased` into a single operation.
///
/// The composed operation takes the ID and ParentID of the last entry it replaces, and the BasisID of
/// the first. With `keep_last == 0` the whole of `Rebased` becomes one operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComposePrefix {
    pub keep_last: usize,
}

impl<T: Transform> Compaction<T> for ComposePrefix {
    fn compact(
        &self,
        transform: &T,
        mut rebased: Vec<Operation<T::Change>>,
    ) -> Result<Vec<Operation<T::Change>>, TransformError> {
        // Composing fewer than two operations gains nothing.
        if rebased.len() < self.keep_last + 2 {
            return Ok(rebased);
        }

        let kept = rebased.split_off(rebased.len() - self.keep_last);
        let prefix = rebased;
        let changes: Vec<T::Change> = prefix.iter().map(|op| op.payload.clone()).collect();
        let composed_change = transform.compose(&changes)?;

        let (first_basis, last_id, last_parent) = match (prefix.first(), prefix.last()) {
            (Some(first), Some(last)) => (first.basis().clone(), last.id.clone(), last.parent().clone()),
            _ => (OpID::none(), OpID::none(), OpID::none()),
        };

        let mut compacted = Vec::with_capacity(kept.len() + 1);
        compacted.push(Operation::new(
            last_id,
            Parents::new(first_basis, last_parent),
            composed_change,
        ));
        compacted.extend(kept);
        Ok(compacted)
    }
}
