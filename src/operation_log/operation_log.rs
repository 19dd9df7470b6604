/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory arena of a single model's operation log, backed by a [`LogStore`].
//!
//! # The version-chain invariant
//!
//! Every entry of a model's log, except the first, has a BasisID equal to the ID of the entry that
//! immediately precedes it; the first entry has the empty BasisID. The log is therefore a single
//! version chain and never a DAG: concurrent client operations are linearized by the
//! [reconciliation engine](crate::engine) before they get here.
//!
//! [`OperationLog`] enforces this invariant on every [`append`](OperationLog::append) and checks it
//! again when a log is loaded from its store in [`open`](OperationLog::open).
//!
//! # Layout
//!
//! Entries live in a `Vec` in log order, so that the [`LogPosition`] of an entry is its index. An
//! `OpID -> LogPosition` index answers "is this ID in the log?" and "where?" in constant time, and the
//! tail pointer is simply the last element of the `Vec`.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::{
    data_types::{LogPosition, ModelID, OpID},
    operation::Operation,
};

use super::pluggables::{LogStore, StoreError};

pub struct OperationLog<C, L: LogStore<C>> {
    model: ModelID,
    store: L,
    entries: Vec<Operation<C>>,
    index: HashMap<OpID, LogPosition>,
}

impl<C: Clone, L: LogStore<C>> OperationLog<C, L> {
    /// Load the log of `model` from `store`, verifying the version-chain invariant.
    pub fn open(model: ModelID, store: L) -> Result<Self, OperationLogError> {
        let persisted = store.read_from(&model, &OpID::none())?;
        let mut log = Self {
            model,
            store,
            entries: Vec::with_capacity(persisted.len()),
            index: HashMap::with_capacity(persisted.len()),
        };
        for op in persisted {
            log.check_appendable(&op)?;
            log.push(op);
        }
        Ok(log)
    }

    pub fn model(&self) -> &ModelID {
        &self.model
    }

    /// Get the number of entries in the log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the ID of the last entry, or the empty ID if the log is empty.
    pub fn tail_id(&self) -> OpID {
        self.entries
            .last()
            .map(|op| op.id.clone())
            .unwrap_or_else(OpID::none)
    }

    /// Get the position of the last entry, or [`LogPosition::START`] if the log is empty.
    pub fn tail_position(&self) -> LogPosition {
        match self.entries.len() {
            0 => LogPosition::START,
            len => LogPosition::new(len as u64 - 1),
        }
    }

    /// Get the position of the entry identified by `id`. The empty ID is at [`LogPosition::START`].
    pub fn position(&self, id: &OpID) -> Option<LogPosition> {
        if id.is_none() {
            return Some(LogPosition::START);
        }
        self.index.get(id).copied()
    }

    /// Check whether an entry with this (non-empty) `id` is in the log.
    pub fn contains(&self, id: &OpID) -> bool {
        !id.is_none() && self.index.contains_key(id)
    }

    pub fn get(&self, position: LogPosition) -> Option<&Operation<C>> {
        position
            .index()
            .and_then(|index| self.entries.get(index as usize))
    }

    /// Get the entries that come after `position`, in log order.
    pub fn entries_after(&self, position: LogPosition) -> &[Operation<C>] {
        let start = match position.index() {
            None => 0,
            Some(index) => (index as usize + 1).min(self.entries.len()),
        };
        &self.entries[start..]
    }

    /// Durably append `op` to the log and return its position.
    ///
    /// ## Preconditions
    /// `op`'s BasisID is the ID of the current tail, and its ID is not in the log yet.
    pub fn append(&mut self, op: Operation<C>) -> Result<LogPosition, OperationLogError> {
        self.check_appendable(&op)?;
        self.store.append(&self.model, &op)?;
        Ok(self.push(op))
    }

    fn check_appendable(&self, op: &Operation<C>) -> Result<(), OperationLogError> {
        if op.id.is_none() || self.contains(&op.id) {
            return Err(OperationLogError::InvalidID { id: op.id.clone() });
        }
        let tail = self.tail_id();
        if op.basis() != &tail {
            return Err(OperationLogError::BrokenChain {
                position: self.tail_position().next(),
                expected_basis: tail,
                found_basis: op.basis().clone(),
            });
        }
        Ok(())
    }

    fn push(&mut self, op: Operation<C>) -> LogPosition {
        let position = self.tail_position().next();
        self.index.insert(op.id.clone(), position);
        self.entries.push(op);
        position
    }
}

/// Enumerates the ways in which loading or appending to an [`OperationLog`] may fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationLogError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An entry's BasisID is not the ID of the entry that precedes it.
    #[error("entry at position {position} has basis {found_basis:?}, expected {expected_basis:?}")]
    BrokenChain {
        position: LogPosition,
        expected_basis: OpID,
        found_basis: OpID,
    },

    /// An entry has the empty ID, or an ID that is already in the log.
    #[error("entry ID {id:?} is empty or already in the log")]
    InvalidID { id: OpID },

    #[error("no entry at position {position}")]
    MissingEntry { position: LogPosition },
}
