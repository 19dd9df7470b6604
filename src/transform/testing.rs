//! A tiny insert-only text Transform Primitive used by the unit tests in this crate.

use serde::{Deserialize, Serialize};

use crate::types::operation::Operation;

use super::pluggables::{Transform, TransformError};

/// Insert `text` at character offset `pos`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Insert {
    pub(crate) pos: usize,
    pub(crate) text: String,
}

pub(crate) fn ins(pos: usize, text: &str) -> Insert {
    Insert {
        pos,
        text: text.to_string(),
    }
}

/// Transform primitive over sequences of [`Insert`]s. Any insert whose text is `"!"` is treated as
/// malformed, so that tests can provoke a model fault.
#[derive(Clone, Debug, Default)]
pub(crate) struct InsertOnly;

impl InsertOnly {
    fn transform_one(a: &Insert, b: &Insert) -> (Insert, Insert) {
        if a.pos <= b.pos {
            (a.clone(), ins(b.pos + a.text.chars().count(), &b.text))
        } else {
            (ins(a.pos + b.text.chars().count(), &a.text), b.clone())
        }
    }
}

impl Transform for InsertOnly {
    type Change = Vec<Insert>;

    fn transform(
        &self,
        a: &Vec<Insert>,
        b: &Vec<Insert>,
    ) -> Result<(Vec<Insert>, Vec<Insert>), TransformError> {
        if a.iter().chain(b.iter()).any(|i| i.text == "!") {
            return Err(TransformError::Conflict("malformed insert".to_string()));
        }

        let mut b = b.clone();
        let mut a_prime = Vec::with_capacity(a.len());
        for a_i in a {
            let mut a_i = a_i.clone();
            for b_j in b.iter_mut() {
                let (a_next, b_next) = Self::transform_one(&a_i, b_j);
                a_i = a_next;
                *b_j = b_next;
            }
            a_prime.push(a_i);
        }
        Ok((a_prime, b))
    }

    fn compose(&self, changes: &[Vec<Insert>]) -> Result<Vec<Insert>, TransformError> {
        if changes.is_empty() {
            return Err(TransformError::EmptyCompose);
        }
        Ok(changes.concat())
    }
}

pub(crate) fn apply(doc: &str, change: &[Insert]) -> String {
    let mut chars: Vec<char> = doc.chars().collect();
    for insert in change {
        let pos = insert.pos.min(chars.len());
        chars.splice(pos..pos, insert.text.chars());
    }
    chars.into_iter().collect()
}

pub(crate) fn apply_all(doc: &str, ops: &[Operation<Vec<Insert>>]) -> String {
    ops.iter().fold(doc.to_string(), |doc, op| apply(&doc, &op.payload))
}
