//! Definitions of log service events for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::subscription::subscription::AppendRejection;
use crate::types::data_types::{ConnectionID, JournalSequence, LogPosition, ModelID, OpID, SubID};

pub enum Event {
    // Events that change a model's log.
    CommitOperation(CommitOperationEvent),
    // Events that involve ignoring a client operation.
    RejectOperation(RejectOperationEvent),
    DropDuplicate(DropDuplicateEvent),
    // Subscription lifecycle events.
    Subscribe(SubscribeEvent),
    Bootstrap(BootstrapEvent),
    Unsubscribe(UnsubscribeEvent),
    // Delivery events.
    Ack(AckEvent),
    // Fault events.
    ModelFault(ModelFaultEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only stops after every model actor has stopped.
            let _ = event_publisher.send(event);
        }
    }
}

/// A client operation was appended to its model's log, at `position`, with BasisID `basis`.
pub struct CommitOperationEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub op: OpID,
    pub basis: OpID,
    pub position: LogPosition,
    pub sequence: JournalSequence,
    /// Whether the operation had to be transformed before it was appended.
    pub rebased: bool,
}

/// A client operation failed validation and was ignored.
pub struct RejectOperationEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub connection: ConnectionID,
    pub sub_id: SubID,
    pub op: OpID,
    pub reason: AppendRejection,
}

/// A client operation whose ID was already in the log or the journal was ignored.
pub struct DropDuplicateEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub op: OpID,
}

pub struct SubscribeEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub connection: ConnectionID,
    pub sub_id: SubID,
    pub reconnect: bool,
    pub client_ops: usize,
}

pub struct BootstrapEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub connection: ConnectionID,
    pub sub_id: SubID,
    pub rebased: usize,
    pub client_rebased: usize,
}

pub struct UnsubscribeEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub connection: ConnectionID,
    pub sub_id: SubID,
}

/// The acknowledgement of `op` was dispatched to the subscription that submitted it.
pub struct AckEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub connection: ConnectionID,
    pub sub_id: SubID,
    pub op: OpID,
}

/// A model became unusable.
pub struct ModelFaultEvent {
    pub timestamp: SystemTime,
    pub model: ModelID,
    pub cause: String,
}
