/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Engine`]: the only writer of a model's operation log.

use std::collections::{HashSet, VecDeque};

use thiserror::Error;

use crate::{
    operation_log::{
        operation_log::{OperationLog, OperationLogError},
        pluggables::{AppendRawOutcome, Journal, LogStore, StoreError},
    },
    subscription::subscription::Delivery,
    transform::{Transform, TransformError},
    types::{
        data_types::{JournalSequence, LogPosition, ModelID, OpID},
        operation::{Operation, Parents},
    },
};

/// Reconciles client operations into a single model's operation log.
///
/// An `Engine` owns the model's [`OperationLog`], a handle to the [`Journal`], and the injected
/// [`Transform`] primitive. It is owned in turn by the model's actor, which makes every call to it
/// serialized.
pub struct Engine<T: Transform, L: LogStore<T::Change>, J: Journal<T::Change>> {
    transform: T,
    log: OperationLog<T::Change, L>,
    journal: J,
}

impl<T, L, J> Engine<T, L, J>
where
    T: Transform,
    L: LogStore<T::Change>,
    J: Journal<T::Change>,
{
    pub fn new(transform: T, log: OperationLog<T::Change, L>, journal: J) -> Self {
        Self {
            transform,
            log,
            journal,
        }
    }

    pub fn model(&self) -> &ModelID {
        self.log.model()
    }

    pub fn log(&self) -> &OperationLog<T::Change, L> {
        &self.log
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Transform `change` past every delivery in `unseen`, in order, replacing each delivery with its
    /// counterpart transformed past `change`, and return the transformed `change`.
    ///
    /// `change` is always passed as the first argument of [`Transform::transform`]. Deliveries that were
    /// never rewritten are read from the log.
    pub fn rebase(
        &self,
        change: &T::Change,
        unseen: &mut VecDeque<Delivery<T::Change>>,
    ) -> Result<T::Change, EngineError> {
        let mut change = change.clone();
        for delivery in unseen.iter_mut() {
            let (change_prime, delivery_prime) = match &delivery.rewritten {
                Some(payload) => self.transform.transform(&change, payload)?,
                None => {
                    let entry = self.log.get(delivery.position).ok_or(
                        OperationLogError::MissingEntry {
                            position: delivery.position,
                        },
                    )?;
                    self.transform.transform(&change, &entry.payload)?
                }
            };
            change = change_prime;
            delivery.rewritten = Some(delivery_prime);
        }
        Ok(change)
    }

    /// Commit the raw client operation `raw`, which has already passed validation, to the log.
    ///
    /// `unseen` holds the deliveries that the client had not seen when it produced `raw`. If it is
    /// empty `raw` is appended verbatim, otherwise it is rebased past them first (see
    /// [`rebase`](Self::rebase)). `raw` is persisted to the journal before anything is transformed;
    /// if the journal or the log already holds its ID nothing happens at all.
    pub fn append(
        &mut self,
        raw: &Operation<T::Change>,
        unseen: &mut VecDeque<Delivery<T::Change>>,
    ) -> Result<AppendOutcome<T::Change>, EngineError> {
        let sequence = match self.journal_raw(raw)? {
            Some(sequence) => sequence,
            None => return Ok(AppendOutcome::Duplicate),
        };

        let rebased = !unseen.is_empty();
        let payload = self.rebase(&raw.payload, unseen)?;
        self.append_committed(raw, payload, sequence, rebased)
            .map(AppendOutcome::Committed)
    }

    /// Commit a client operation that [`catch_up`](Self::catch_up) has already rebased onto the tail.
    pub fn append_rebased(
        &mut self,
        rebased: &RebasedClientOp<T::Change>,
    ) -> Result<AppendOutcome<T::Change>, EngineError> {
        let sequence = match self.journal_raw(&rebased.raw)? {
            Some(sequence) => sequence,
            None => return Ok(AppendOutcome::Duplicate),
        };

        self.append_committed(&rebased.raw, rebased.payload.clone(), sequence, rebased.transformed)
            .map(AppendOutcome::Committed)
    }

    /// Walk the log entries after `basis` on behalf of a client that still holds `client_ops`, the
    /// ordered operations it sent but never saw acknowledged.
    ///
    /// Every entry whose ID is the next of `client_ops` is the committed form of that operation and
    /// yields an [`CatchUpStep::Ack`]. Every other entry yields a [`CatchUpStep::Deliver`]: it is
    /// transformed past all of the client operations that are not yet committed, which gives its
    /// compensating form in the client's frame and rebases the client operations in turn.
    ///
    /// # Errors
    /// - [`EngineError::UnknownBasis`] if `basis` is not in the log.
    /// - [`EngineError::InvalidClientOperations`] if one of `client_ops` has an empty or repeated ID,
    ///   if they do not form a chain through their ParentIDs, or if the client operations found in the
    ///   log are not a prefix of `client_ops`.
    /// - [`EngineError::Transform`] if the Transform Primitive fails.
    pub fn catch_up(
        &self,
        basis: &OpID,
        client_ops: &[Operation<T::Change>],
    ) -> Result<CatchUp<T::Change>, EngineError> {
        if client_ops.iter().any(|op| op.id.is_none()) {
            return Err(EngineError::InvalidClientOperations {
                reason: "operation with an empty ID".to_string(),
            });
        }
        for pair in client_ops.windows(2) {
            if pair[1].parent() != &pair[0].id {
                return Err(EngineError::InvalidClientOperations {
                    reason: format!("{:?} does not follow {:?}", pair[1].id, pair[0].id),
                });
            }
        }

        let start = self
            .log
            .position(basis)
            .ok_or_else(|| EngineError::UnknownBasis {
                basis: basis.clone(),
            })?;

        let mut remaining: VecDeque<RebasedClientOp<T::Change>> = client_ops
            .iter()
            .map(|op| RebasedClientOp {
                raw: op.clone(),
                payload: op.payload.clone(),
                transformed: false,
            })
            .collect();
        let client_ids: HashSet<&OpID> = client_ops.iter().map(|op| &op.id).collect();
        if client_ids.len() != client_ops.len() {
            return Err(EngineError::InvalidClientOperations {
                reason: "repeated operation ID".to_string(),
            });
        }
        let mut steps = Vec::new();
        let mut position = start;

        for entry in self.log.entries_after(start) {
            position = position.next();

            if remaining.front().is_some_and(|op| op.raw.id == entry.id) {
                remaining.pop_front();
                steps.push(CatchUpStep::Ack {
                    entry: entry.clone(),
                    position,
                });
                continue;
            }
            if client_ids.contains(&entry.id) {
                return Err(EngineError::InvalidClientOperations {
                    reason: format!("{:?} was committed out of order", entry.id),
                });
            }

            let compensation = if remaining.is_empty() {
                None
            } else {
                let mut compensation = entry.payload.clone();
                for op in remaining.iter_mut() {
                    let (op_prime, compensation_prime) =
                        self.transform.transform(&op.payload, &compensation)?;
                    op.payload = op_prime;
                    op.transformed = true;
                    compensation = compensation_prime;
                }
                Some(compensation)
            };
            steps.push(CatchUpStep::Deliver {
                entry: entry.clone(),
                position,
                compensation,
            });
        }

        if let Some(op) = remaining.iter().find(|op| self.log.contains(&op.raw.id)) {
            return Err(EngineError::InvalidClientOperations {
                reason: format!("{:?} was committed before {:?}", op.raw.id, basis),
            });
        }

        Ok(CatchUp {
            steps,
            rebased: remaining.into(),
        })
    }

    /// Persist `raw` to the journal, returning its journal sequence, or `None` if its ID has been seen
    /// before.
    fn journal_raw(
        &mut self,
        raw: &Operation<T::Change>,
    ) -> Result<Option<JournalSequence>, EngineError> {
        if self.log.contains(&raw.id) {
            return Ok(None);
        }
        match self.journal.append_raw(self.log.model(), raw)? {
            AppendRawOutcome::Persisted(sequence) => Ok(Some(sequence)),
            AppendRawOutcome::Duplicate => Ok(None),
        }
    }

    fn append_committed(
        &mut self,
        raw: &Operation<T::Change>,
        payload: T::Change,
        sequence: JournalSequence,
        rebased: bool,
    ) -> Result<Commit<T::Change>, EngineError> {
        let op = Operation::new(
            raw.id.clone(),
            Parents::new(self.log.tail_id(), raw.parent().clone()),
            payload,
        );
        let position = self.log.append(op.clone())?;
        Ok(Commit {
            op,
            position,
            sequence,
            rebased,
        })
    }
}

/// The result of appending a client operation.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome<C> {
    Committed(Commit<C>),

    /// The operation's ID is already in the log or the journal. Nothing was changed.
    Duplicate,
}

/// A client operation as it was committed to the log.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit<C> {
    /// The log entry: the client's ID, Parents `[previous tail, client ParentID]`.
    pub op: Operation<C>,
    pub position: LogPosition,
    pub sequence: JournalSequence,

    /// Whether the payload differs from the one the client submitted.
    pub rebased: bool,
}

/// A client operation that has been rebased onto the log's tail, but not committed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct RebasedClientOp<C> {
    /// The operation exactly as the client supplied it.
    pub raw: Operation<C>,
    pub payload: C,
    pub transformed: bool,
}

/// One step of a [catch-up walk](Engine::catch_up), in log order.
#[derive(Clone, Debug, PartialEq)]
pub enum CatchUpStep<C> {
    /// `entry` is another client's operation. It is sent as it is in the log, and the client
    /// transforms it past its in-flight operations, as it does with any other delivery.
    ///
    /// `compensation` is what that yields for the client operations the server knows of, or `None` if
    /// none of them was still pending when `entry` was committed.
    Deliver {
        entry: Operation<C>,
        position: LogPosition,
        compensation: Option<C>,
    },

    /// `entry` is the committed form of one of the client's own operations.
    Ack {
        entry: Operation<C>,
        position: LogPosition,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchUp<C> {
    pub steps: Vec<CatchUpStep<C>>,

    /// The client operations that are not in the log, rebased onto its current tail.
    pub rebased: Vec<RebasedClientOp<C>>,
}

/// Enumerates the ways in which reconciling an operation may fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error("log chain broken: {0}")]
    BrokenChain(OperationLogError),

    #[error("invalid client operations")]
    InvalidClientOperations { reason: String },

    #[error("unknown basis {basis}")]
    UnknownBasis { basis: OpID },
}

impl EngineError {
    /// Check whether this error leaves the model unusable, as opposed to only rejecting a request.
    ///
    /// Client input never causes a fault: operations that could break the log's chain, such as ones
    /// with empty IDs, are rejected before they reach the journal.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            EngineError::Transform(_) | EngineError::Store(_) | EngineError::BrokenChain(_)
        )
    }
}

impl From<OperationLogError> for EngineError {
    fn from(error: OperationLogError) -> Self {
        match error {
            OperationLogError::Store(error) => EngineError::Store(error),
            error => EngineError::BrokenChain(error),
        }
    }
}
