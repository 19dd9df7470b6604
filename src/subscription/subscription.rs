/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-(connection, model) subscription state machine.
//!
//! # States
//!
//! ```text
//!   Subscribe without Reconnect            Subscribe with Reconnect
//!               |                                     |
//!               v                                     v
//!      AwaitingBootstrap                        Reconnecting
//!               |  complete_bootstrap                 |  complete_reconnect
//!               +-------------> Active <--------------+
//!                                 |
//!                                 |  close (Unsubscribe / disconnect)
//!                                 v
//!                               Closed
//! ```
//!
//! # The subscription's logical clock
//!
//! A subscription tracks a cursor of two IDs:
//! - **BasisID**: the ID of the last log entry the subscription has been shown, and
//! - **ParentID**: the ID of the last operation the client is known to have sent.
//!
//! The cursor only ever advances, and only through log entries actually delivered to (or acknowledged
//! to) this subscription, in log order: [`accept`](Subscription::accept) for other clients' entries,
//! and [`retire_ack`](Subscription::retire_ack) for the client's own.
//!
//! # Unseen deliveries
//!
//! A client produces operations against the last entry it has *processed*, which may be behind the
//! last entry the subscription has *sent* it. The subscription therefore remembers every other-client
//! entry it has delivered since the oldest basis the client may still use (its "floor"). The
//! [reconciliation engine](crate::engine) transforms incoming operations against these deliveries,
//! and rewrites them into the client's frame as it does so; see [`Subscription::unseen_after`].
//!
//! A delivery only holds its log position until it is rewritten, so a subscription whose client never
//! appends does not keep copies of the log's payloads.

use std::collections::VecDeque;

use thiserror::Error;

use crate::types::{
    data_types::{ConnectionID, LogPosition, ModelID, OpID, SubID},
    operation::{Operation, Parents},
};

/// The lifecycle states of a [`Subscription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    AwaitingBootstrap,
    Reconnecting,
    Active,
    Closed,
}

/// An entry of another client that has been delivered to a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery<C> {
    pub position: LogPosition,

    /// The entry's payload in the frame of the subscription's client, or `None` if that is the
    /// payload of the log entry at `position`.
    pub rewritten: Option<C>,
}

impl<C> Delivery<C> {
    pub fn new(position: LogPosition) -> Self {
        Self {
            position,
            rewritten: None,
        }
    }
}

pub struct Subscription<C> {
    connection: ConnectionID,
    sub_id: SubID,
    model: ModelID,
    state: SubscriptionState,
    basis: OpID,
    basis_position: LogPosition,
    parent: OpID,
    floor: LogPosition,
    pending: VecDeque<OpID>,
    unseen: VecDeque<Delivery<C>>,
}

impl<C: Clone> Subscription<C> {
    /// Create a subscription that must be bootstrapped before it can receive notifications.
    pub fn awaiting_bootstrap(connection: ConnectionID, sub_id: SubID, model: ModelID) -> Self {
        Self {
            connection,
            sub_id,
            model,
            state: SubscriptionState::AwaitingBootstrap,
            basis: OpID::none(),
            basis_position: LogPosition::START,
            parent: OpID::none(),
            floor: LogPosition::START,
            pending: VecDeque::new(),
            unseen: VecDeque::new(),
        }
    }

    /// Create a subscription that resumes from a cursor the client already holds.
    pub fn reconnecting(
        connection: ConnectionID,
        sub_id: SubID,
        model: ModelID,
        basis: OpID,
        basis_position: LogPosition,
        parent: OpID,
    ) -> Self {
        Self {
            connection,
            sub_id,
            model,
            state: SubscriptionState::Reconnecting,
            basis,
            basis_position,
            parent,
            floor: basis_position,
            pending: VecDeque::new(),
            unseen: VecDeque::new(),
        }
    }

    pub fn connection(&self) -> ConnectionID {
        self.connection
    }

    pub fn sub_id(&self) -> &SubID {
        &self.sub_id
    }

    pub fn model(&self) -> &ModelID {
        &self.model
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn basis(&self) -> &OpID {
        &self.basis
    }

    pub fn basis_position(&self) -> LogPosition {
        self.basis_position
    }

    pub fn parent(&self) -> &OpID {
        &self.parent
    }

    /// Get the cursor as the `Parents` that the next entry delivered to this subscription must carry.
    pub fn cursor(&self) -> Parents {
        Parents::new(self.basis.clone(), self.parent.clone())
    }

    /// Get the IDs of the client's committed operations that have not been acknowledged yet.
    pub fn pending(&self) -> &VecDeque<OpID> {
        &self.pending
    }

    /// Check whether this subscription accepts deliveries, i.e., whether it is `Active` or catching up
    /// as part of a reconnect.
    pub fn is_receiving(&self) -> bool {
        matches!(
            self.state,
            SubscriptionState::Active | SubscriptionState::Reconnecting
        )
    }

    /// Finish the Bootstrap of this subscription: `basis` is the ID of the last operation sent in the
    /// Bootstrap's `Rebased` (or the empty ID if there was none), and `parent` the ID of the last
    /// client operation supplied with the Subscribe (or the empty ID).
    pub fn complete_bootstrap(
        &mut self,
        basis: OpID,
        basis_position: LogPosition,
        parent: OpID,
    ) -> Result<(), TransitionError> {
        if self.state != SubscriptionState::AwaitingBootstrap {
            return Err(TransitionError {
                from: self.state,
                to: SubscriptionState::Active,
            });
        }
        self.basis = basis;
        self.basis_position = basis_position;
        self.floor = basis_position;
        self.parent = parent;
        self.state = SubscriptionState::Active;
        Ok(())
    }

    /// Finish the catch-up of a reconnecting subscription.
    pub fn complete_reconnect(&mut self) -> Result<(), TransitionError> {
        if self.state != SubscriptionState::Reconnecting {
            return Err(TransitionError {
                from: self.state,
                to: SubscriptionState::Active,
            });
        }
        self.state = SubscriptionState::Active;
        Ok(())
    }

    /// Override the ParentID of a reconnecting subscription with the ID of the last client operation
    /// supplied with the Subscribe. Client-supplied operations are a more current source of truth than
    /// the ParentID in the Reconnect cursor.
    pub fn override_parent(&mut self, parent: OpID) {
        if self.state == SubscriptionState::Reconnecting {
            self.parent = parent;
        }
    }

    pub fn close(&mut self) {
        self.state = SubscriptionState::Closed;
        self.pending.clear();
        self.unseen.clear();
    }

    /// Check whether `op`, received from this subscription's client, is causally valid.
    ///
    /// `basis_position` is the log position of `op`'s BasisID, or `None` if it is not in the log.
    ///
    /// An operation is valid if:
    /// 1. Its ID is not empty,
    /// 2. Its ParentID is exactly the tracked ParentID, and
    /// 3. Its BasisID is an entry this subscription has been shown: the tracked BasisID, or an earlier
    ///    one that is not older than the basis of the client's previous operation.
    pub fn validate_append(
        &self,
        op: &Operation<C>,
        basis_position: Option<LogPosition>,
    ) -> Result<LogPosition, AppendRejection> {
        if self.state != SubscriptionState::Active {
            return Err(AppendRejection::NotActive { state: self.state });
        }
        if op.id.is_none() {
            return Err(AppendRejection::EmptyID);
        }
        if op.parent() != &self.parent {
            return Err(AppendRejection::ParentMismatch {
                expected: self.parent.clone(),
                found: op.parent().clone(),
            });
        }
        let position = basis_position.ok_or_else(|| AppendRejection::UnknownBasis {
            basis: op.basis().clone(),
        })?;
        if position < self.floor {
            return Err(AppendRejection::StaleBasis {
                basis: op.basis().clone(),
            });
        }
        if position > self.basis_position {
            return Err(AppendRejection::UnseenBasis {
                basis: op.basis().clone(),
            });
        }
        Ok(position)
    }

    /// Record that the client has incorporated every entry up to and including `basis_position`, and
    /// return the deliveries it has not seen yet, in log order.
    ///
    /// The engine transforms the client's next operation against the returned deliveries, replacing
    /// each with its counterpart transformed past that operation.
    pub fn unseen_after(&mut self, basis_position: LogPosition) -> &mut VecDeque<Delivery<C>> {
        while self
            .unseen
            .front()
            .is_some_and(|delivery| delivery.position <= basis_position)
        {
            self.unseen.pop_front();
        }
        if basis_position > self.floor {
            self.floor = basis_position;
        }
        &mut self.unseen
    }

    /// Register that the client operation `id` has been committed to the log and awaits its ack.
    pub fn push_pending(&mut self, id: OpID) {
        self.pending.push_back(id);
    }

    /// Stop waiting for the ack of `id` and of every operation pending after it, none of which will be
    /// committed.
    pub fn abandon_pending(&mut self, id: &OpID) {
        if let Some(index) = self.pending.iter().position(|pending| pending == id) {
            self.pending.truncate(index);
        }
    }

    /// Gate a delivery: accept `candidate`, the log entry at `position` as it is sent to this
    /// subscription, only if its `Parents` equal the current cursor. On acceptance the BasisID advances
    /// to the entry's ID.
    ///
    /// `rewritten` is the entry's payload in the client's frame, if it is not the log entry's own.
    pub fn accept(
        &mut self,
        candidate: &Operation<C>,
        position: LogPosition,
        rewritten: Option<C>,
    ) -> Result<(), GateRejection> {
        if !self.is_receiving() {
            return Err(GateRejection::NotReceiving { state: self.state });
        }
        if candidate.parents != self.cursor() {
            return Err(GateRejection::CursorMismatch {
                cursor: self.cursor(),
                found: candidate.parents.clone(),
            });
        }
        self.basis = candidate.id.clone();
        self.basis_position = position;
        self.unseen.push_back(Delivery {
            position,
            rewritten,
        });
        Ok(())
    }

    /// Retire the acknowledgement of the client's own committed operation `id`, which has log basis
    /// `log_basis` and sits at `position`.
    ///
    /// The operation must be the oldest pending one, and must directly follow the entry this
    /// subscription was last shown. On success the BasisID advances to `id`, and once nothing else is
    /// pending the ParentID becomes `id` too.
    pub fn retire_ack(
        &mut self,
        id: &OpID,
        log_basis: &OpID,
        position: LogPosition,
    ) -> Result<(), GateRejection> {
        if !self.is_receiving() {
            return Err(GateRejection::NotReceiving { state: self.state });
        }
        if self.pending.front() != Some(id) {
            return Err(GateRejection::NotPending { id: id.clone() });
        }
        if log_basis != &self.basis {
            return Err(GateRejection::CursorMismatch {
                cursor: self.cursor(),
                found: Parents::new(log_basis.clone(), id.clone()),
            });
        }
        self.pending.pop_front();
        self.basis = id.clone();
        self.basis_position = position;
        if self.pending.is_empty() {
            self.parent = id.clone();
        }
        Ok(())
    }
}

/// An attempted state transition that the state machine does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("subscription cannot move from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: SubscriptionState,
    pub to: SubscriptionState,
}

/// Reasons why an incoming client operation is ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppendRejection {
    #[error("subscription is {state:?}")]
    NotActive { state: SubscriptionState },

    #[error("operation has an empty ID")]
    EmptyID,

    #[error("parent {found:?} does not match tracked parent {expected:?}")]
    ParentMismatch { expected: OpID, found: OpID },

    #[error("basis {basis:?} is not in the log")]
    UnknownBasis { basis: OpID },

    #[error("basis {basis:?} is older than the client's previous basis")]
    StaleBasis { basis: OpID },

    #[error("basis {basis:?} has not been delivered to the subscription")]
    UnseenBasis { basis: OpID },
}

/// Reasons why a delivery is dropped for one subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("subscription is {state:?}")]
    NotReceiving { state: SubscriptionState },

    #[error("parents {found:?} do not match cursor {cursor:?}")]
    CursorMismatch { cursor: Parents, found: Parents },

    #[error("operation {id:?} is not the oldest pending operation")]
    NotPending { id: OpID },
}
