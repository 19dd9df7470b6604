//! Simple, volatile, in-memory implementations of [`LogStore`] and [`Journal`].
//!
//! These never leave any artifacts, which makes them suitable for tests and for deployments where the
//! log does not need to outlive the process.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::types::{
    data_types::{JournalSequence, ModelID, OpID},
    operation::Operation,
};

use super::pluggables::{AppendRawOutcome, Journal, LogStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".to_string()))
}

fn ops_after<C: Clone>(
    model: &ModelID,
    ops: Option<&Vec<Operation<C>>>,
    after: &OpID,
) -> Result<Vec<Operation<C>>, StoreError> {
    let ops = match ops {
        Some(ops) => ops,
        None if after.is_none() => return Ok(Vec::new()),
        None => {
            return Err(StoreError::UnknownOperation {
                model: model.clone(),
                id: after.clone(),
            })
        }
    };

    if after.is_none() {
        return Ok(ops.clone());
    }

    match ops.iter().position(|op| &op.id == after) {
        Some(index) => Ok(ops[index + 1..].to_vec()),
        None => Err(StoreError::UnknownOperation {
            model: model.clone(),
            id: after.clone(),
        }),
    }
}

/// An in-memory implementation of [`LogStore`].
#[derive(Clone)]
pub struct MemLogStore<C>(Arc<Mutex<HashMap<ModelID, Vec<Operation<C>>>>>);

impl<C> MemLogStore<C> {
    /// Create a new, empty `MemLogStore`.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }
}

impl<C> Default for MemLogStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone + Send + 'static> LogStore<C> for MemLogStore<C> {
    fn append(&mut self, model: &ModelID, op: &Operation<C>) -> Result<(), StoreError> {
        lock(&self.0)?
            .entry(model.clone())
            .or_default()
            .push(op.clone());
        Ok(())
    }

    fn read_from(&self, model: &ModelID, after: &OpID) -> Result<Vec<Operation<C>>, StoreError> {
        let logs = lock(&self.0)?;
        ops_after(model, logs.get(model), after)
    }
}

/// An in-memory implementation of [`Journal`].
#[derive(Clone)]
pub struct MemJournal<C>(Arc<Mutex<HashMap<ModelID, MemJournalEntries<C>>>>);

struct MemJournalEntries<C> {
    ops: Vec<Operation<C>>,
    ids: HashSet<OpID>,
}

impl<C> Default for MemJournalEntries<C> {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            ids: HashSet::new(),
        }
    }
}

impl<C> MemJournal<C> {
    /// Create a new, empty `MemJournal`.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }
}

impl<C> Default for MemJournal<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone + Send + 'static> Journal<C> for MemJournal<C> {
    fn append_raw(
        &mut self,
        model: &ModelID,
        op: &Operation<C>,
    ) -> Result<AppendRawOutcome, StoreError> {
        let mut journals = lock(&self.0)?;
        let entries = journals.entry(model.clone()).or_default();
        if !entries.ids.insert(op.id.clone()) {
            return Ok(AppendRawOutcome::Duplicate);
        }
        entries.ops.push(op.clone());
        Ok(AppendRawOutcome::Persisted(JournalSequence::new(
            entries.ops.len() as u64 - 1,
        )))
    }

    fn read_from(&self, model: &ModelID, after: &OpID) -> Result<Vec<Operation<C>>, StoreError> {
        let journals = lock(&self.0)?;
        ops_after(model, journals.get(model).map(|entries| &entries.ops), after)
    }
}
