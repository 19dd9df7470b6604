/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the server's
//! [configuration](crate::server::Configuration).
//!
//! The log service logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitOperation](crate::events::CommitOperationEvent) is printed:
//!
//! ```text
//! CommitOperation, 1701329264, ZG9j, YjE, YTI, 1, 1, true
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the model's ID.
//! - The fourth and fifth values are the same abbreviation of the committed operation's ID and of its
//!   BasisID in the log.
//! - The sixth value is the position of the operation in the log, and the seventh its journal sequence.
//! - The last value says whether the operation was transformed before it was committed.

use crate::events::*;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const COMMIT_OPERATION: &str = "CommitOperation";
pub const REJECT_OPERATION: &str = "RejectOperation";
pub const DROP_DUPLICATE: &str = "DropDuplicate";

pub const SUBSCRIBE: &str = "Subscribe";
pub const BOOTSTRAP: &str = "Bootstrap";
pub const UNSUBSCRIBE: &str = "Unsubscribe";

pub const ACK: &str = "Ack";

pub const MODEL_FAULT: &str = "ModelFault";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitOperationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_operation_event: &CommitOperationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                COMMIT_OPERATION,
                secs_since_unix_epoch(commit_operation_event.timestamp),
                first_seven_base64_chars(commit_operation_event.model.as_str().as_bytes()),
                first_seven_base64_chars(commit_operation_event.op.bytes()),
                first_seven_base64_chars(commit_operation_event.basis.bytes()),
                commit_operation_event.position,
                commit_operation_event.sequence,
                commit_operation_event.rebased
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectOperationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_operation_event: &RejectOperationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                REJECT_OPERATION,
                secs_since_unix_epoch(reject_operation_event.timestamp),
                first_seven_base64_chars(reject_operation_event.model.as_str().as_bytes()),
                reject_operation_event.connection,
                first_seven_base64_chars(reject_operation_event.sub_id.as_str().as_bytes()),
                first_seven_base64_chars(reject_operation_event.op.bytes()),
                reject_operation_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for DropDuplicateEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |drop_duplicate_event: &DropDuplicateEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DROP_DUPLICATE,
                secs_since_unix_epoch(drop_duplicate_event.timestamp),
                first_seven_base64_chars(drop_duplicate_event.model.as_str().as_bytes()),
                first_seven_base64_chars(drop_duplicate_event.op.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for SubscribeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |subscribe_event: &SubscribeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                SUBSCRIBE,
                secs_since_unix_epoch(subscribe_event.timestamp),
                first_seven_base64_chars(subscribe_event.model.as_str().as_bytes()),
                subscribe_event.connection,
                first_seven_base64_chars(subscribe_event.sub_id.as_str().as_bytes()),
                subscribe_event.reconnect,
                subscribe_event.client_ops
            )
        };
        Box::new(logger)
    }
}

impl Logger for BootstrapEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |bootstrap_event: &BootstrapEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                BOOTSTRAP,
                secs_since_unix_epoch(bootstrap_event.timestamp),
                first_seven_base64_chars(bootstrap_event.model.as_str().as_bytes()),
                bootstrap_event.connection,
                first_seven_base64_chars(bootstrap_event.sub_id.as_str().as_bytes()),
                bootstrap_event.rebased,
                bootstrap_event.client_rebased
            )
        };
        Box::new(logger)
    }
}

impl Logger for UnsubscribeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |unsubscribe_event: &UnsubscribeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UNSUBSCRIBE,
                secs_since_unix_epoch(unsubscribe_event.timestamp),
                first_seven_base64_chars(unsubscribe_event.model.as_str().as_bytes()),
                unsubscribe_event.connection,
                first_seven_base64_chars(unsubscribe_event.sub_id.as_str().as_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for AckEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |ack_event: &AckEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ACK,
                secs_since_unix_epoch(ack_event.timestamp),
                first_seven_base64_chars(ack_event.model.as_str().as_bytes()),
                ack_event.connection,
                first_seven_base64_chars(ack_event.sub_id.as_str().as_bytes()),
                first_seven_base64_chars(ack_event.op.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ModelFaultEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |model_fault_event: &ModelFaultEvent| {
            log::info!(
                "{}, {}, {}, {}",
                MODEL_FAULT,
                secs_since_unix_epoch(model_fault_event.timestamp),
                first_seven_base64_chars(model_fault_event.model.as_str().as_bytes()),
                model_fault_event.cause
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
