/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Operation`] type and its two-element parent reference, [`Parents`].
//!
//! ## Wire format
//!
//! Operations travel as JSON objects with three fields:
//!
//! ```text
//! {"ID": "b1", "Parents": ["a1", "a0"], "Payload": ...}
//! ```
//!
//! `Parents[0]` is the BasisID, and must always be present (it may be `""` for the start of the log).
//! `Parents[1]` is the ParentID and may be omitted, in which case it is read as `""`. `Parents` is
//! always written with both elements.

use serde::{
    de::{self, SeqAccess, Visitor},
    ser::SerializeSeq,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;

use super::data_types::OpID;

/// The two-element parent reference of an operation.
///
/// For an operation submitted by a client:
/// - `basis` is the ID of the last log entry the client had incorporated when it produced the
///   operation, and
/// - `parent` is the ID of the last operation the client itself submitted before this one.
///
/// For an operation in a model's log, `basis` is the ID of the entry immediately preceding it, so that
/// the log forms a single version chain.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct Parents {
    pub basis: OpID,
    pub parent: OpID,
}

impl Parents {
    pub fn new(basis: OpID, parent: OpID) -> Self {
        Self { basis, parent }
    }
}

impl Serialize for Parents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.basis)?;
        seq.serialize_element(&self.parent)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Parents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ParentsVisitor;

        impl<'de> Visitor<'de> for ParentsVisitor {
            type Value = Parents;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "an array of one or two operation IDs")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Parents, A::Error> {
                let basis: OpID = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let parent: OpID = seq.next_element()?.unwrap_or_default();
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(Parents { basis, parent })
            }
        }

        deserializer.deserialize_seq(ParentsVisitor)
    }
}

/// A single change to a model, together with its identity and causal position.
///
/// `C` is the change type of the injected [`Transform`](crate::transform::Transform) primitive. The
/// log service never looks inside it.
///
/// Once an operation has been appended to a model's log it is immutable.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Operation<C> {
    #[serde(rename = "ID")]
    pub id: OpID,
    #[serde(rename = "Parents")]
    pub parents: Parents,
    #[serde(rename = "Payload")]
    pub payload: C,
}

impl<C> Operation<C> {
    pub fn new(id: OpID, parents: Parents, payload: C) -> Self {
        Self {
            id,
            parents,
            payload,
        }
    }

    /// Get the BasisID of this operation.
    pub fn basis(&self) -> &OpID {
        &self.parents.basis
    }

    /// Get the ParentID of this operation.
    pub fn parent(&self) -> &OpID {
        &self.parents.parent
    }
}
