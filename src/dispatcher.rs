/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fan-out of newly committed log entries to the subscriptions of a model.
//!
//! # Dispatch cycles
//!
//! A model actor handles one command at a time. Everything a command produces for a subscription is
//! first collected in that subscription's [`Outbox`], and every outbox is [flushed](flush) once the
//! command has been handled. A dispatch cycle is therefore one command, and an ack is always flushed
//! together with the operations that preceded it in the log.
//!
//! Within an outbox, operations are grouped into [Notifications](ServerMessage::Notification). An ack
//! closes the Notification being built, so that every operation in a Notification precedes its
//! `AckID` in log order. A client therefore processes a Notification's `Operations` first, and its
//! `AckID` last.
//!
//! # Backpressure
//!
//! Flushing never blocks: messages are pushed onto the unbounded outbound queue of the subscription's
//! connection, which is drained by the connection's own writer thread. Every queued message carries
//! the liveness flag of its subscription, and the writer discards the messages of subscriptions that
//! have been closed in the meantime.

use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
};

use crate::{
    subscription::{
        registry::{RegisteredSubscription, SubscriptionRegistry},
        subscription::GateRejection,
    },
    types::{
        data_types::{ConnectionID, LogPosition, ModelID, OpID, SubID},
        operation::{Operation, Parents},
    },
    messages::ServerMessage,
};

/// A server message waiting in a connection's outbound queue.
pub struct Outbound<C> {
    live: Arc<AtomicBool>,
    message: ServerMessage<C>,
}

impl<C> Outbound<C> {
    /// Check whether the subscription this message is addressed to is still open.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn into_message(self) -> ServerMessage<C> {
        self.message
    }
}

/// The sending end of a connection's outbound queue, bound to a single subscription.
pub struct SubscriptionSender<C> {
    queue: Sender<Outbound<C>>,
    live: Arc<AtomicBool>,
}

impl<C> Clone for SubscriptionSender<C> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            live: self.live.clone(),
        }
    }
}

impl<C> SubscriptionSender<C> {
    pub fn new(queue: Sender<Outbound<C>>) -> Self {
        Self {
            queue,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Queue `message` for the connection. Returns false if the subscription is closed or the
    /// connection's writer is gone.
    pub fn send(&self, message: ServerMessage<C>) -> bool {
        self.is_live()
            && self
                .queue
                .send(Outbound {
                    live: self.live.clone(),
                    message,
                })
                .is_ok()
    }

    /// Close the subscription: every message queued for it from now on, or still waiting in the queue,
    /// is discarded.
    pub fn close(&self) {
        self.live.store(false, Ordering::Release)
    }
}

/// The messages that a single dispatch cycle has produced for a single subscription.
pub struct Outbox<C> {
    sub_id: SubID,
    model_id: ModelID,
    operations: Vec<Operation<C>>,
    ready: Vec<ServerMessage<C>>,
}

impl<C> Outbox<C> {
    pub fn new(sub_id: SubID, model_id: ModelID) -> Self {
        Self {
            sub_id,
            model_id,
            operations: Vec::new(),
            ready: Vec::new(),
        }
    }

    pub fn push_bootstrap(&mut self, rebased: Vec<Operation<C>>, client_rebased: Vec<Operation<C>>) {
        self.close_notification();
        self.ready.push(ServerMessage::Bootstrap {
            sub_id: self.sub_id.clone(),
            model_id: self.model_id.clone(),
            rebased,
            client_rebased,
        });
    }

    pub fn push_operation(&mut self, op: Operation<C>) {
        self.operations.push(op);
    }

    /// Close the Notification being built with an `AckID`. If no operation was pushed since the last
    /// ack, the Notification carries only the `AckID`.
    pub fn push_ack(&mut self, id: OpID) {
        self.ready.push(ServerMessage::Notification {
            sub_id: self.sub_id.clone(),
            model_id: self.model_id.clone(),
            ack_id: Some(id),
            operations: mem::take(&mut self.operations),
        });
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.close_notification();
        self.ready.push(ServerMessage::error(
            self.sub_id.clone(),
            self.model_id.clone(),
            message,
        ));
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.ready.is_empty()
    }

    /// Take every message of the cycle, in order.
    pub fn take(&mut self) -> Vec<ServerMessage<C>> {
        self.close_notification();
        mem::take(&mut self.ready)
    }

    fn close_notification(&mut self) {
        if !self.operations.is_empty() {
            self.ready.push(ServerMessage::Notification {
                sub_id: self.sub_id.clone(),
                model_id: self.model_id.clone(),
                ack_id: None,
                operations: mem::take(&mut self.operations),
            });
        }
    }
}

/// Offer another client's log `entry`, at `position`, to a subscription.
///
/// The candidate the subscription's gate sees has Parents `[entry's BasisID, subscription's
/// ParentID]`: the subscription accepts it only if it was last shown the entry preceding `entry`.
/// The client always gets the entry's payload as it is in the log. `rewritten` is its form in the
/// client's frame, if the server has already transformed it past operations the client holds.
pub fn deliver<C: Clone>(
    registered: &mut RegisteredSubscription<C>,
    entry: &Operation<C>,
    position: LogPosition,
    rewritten: Option<C>,
) -> Result<(), GateRejection> {
    let candidate = Operation::new(
        entry.id.clone(),
        Parents::new(entry.basis().clone(), registered.subscription.parent().clone()),
        entry.payload.clone(),
    );
    registered.subscription.accept(&candidate, position, rewritten)?;
    registered.outbox.push_operation(candidate);
    Ok(())
}

/// Acknowledge the subscription's own committed `entry`, at `position`.
pub fn acknowledge<C: Clone>(
    registered: &mut RegisteredSubscription<C>,
    entry: &Operation<C>,
    position: LogPosition,
) -> Result<(), GateRejection> {
    registered
        .subscription
        .retire_ack(&entry.id, entry.basis(), position)?;
    registered.outbox.push_ack(entry.id.clone());
    Ok(())
}

/// What [`fan_out`] did with a committed entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// The subscription whose own operation the entry is, if it was acknowledged.
    pub acked: Option<(ConnectionID, SubID)>,
    pub delivered: usize,
    pub dropped: usize,
}

/// Offer a newly committed log entry to every receiving subscription of the model: as an ack to the
/// subscription that is waiting for it, and as an operation to apply to every other one.
pub fn fan_out<C: Clone>(
    registry: &mut SubscriptionRegistry<C>,
    entry: &Operation<C>,
    position: LogPosition,
) -> FanOut {
    let mut fan_out = FanOut::default();
    for registered in registry.iter_mut() {
        if !registered.subscription.is_receiving() {
            continue;
        }

        let own = registered.subscription.pending().front() == Some(&entry.id);
        let result = if own {
            acknowledge(registered, entry, position)
        } else {
            deliver(registered, entry, position, None)
        };

        match result {
            Ok(()) if own => {
                fan_out.acked = Some((
                    registered.subscription.connection(),
                    registered.subscription.sub_id().clone(),
                ))
            }
            Ok(()) => fan_out.delivered += 1,
            Err(rejection) => {
                log::debug!(
                    "dropping {} at {} for subscription {} of connection {}: {}",
                    entry.id,
                    position,
                    registered.subscription.sub_id(),
                    registered.subscription.connection(),
                    rejection
                );
                fan_out.dropped += 1;
            }
        }
    }
    fan_out
}

/// Flush the outbox of a single subscription into its connection's queue.
pub fn flush_subscription<C: Clone>(registered: &mut RegisteredSubscription<C>) {
    for message in registered.outbox.take() {
        if !registered.sender.send(message) {
            log::debug!(
                "discarding message for closed subscription {} of connection {}",
                registered.subscription.sub_id(),
                registered.subscription.connection()
            );
            break;
        }
    }
}

/// End a dispatch cycle: flush every outbox of the model.
pub fn flush<C: Clone>(registry: &mut SubscriptionRegistry<C>) {
    for registered in registry.iter_mut() {
        flush_subscription(registered);
    }
}
