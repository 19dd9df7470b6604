/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the JSON messages exchanged between clients and the log service.
//!
//! Every message is a single JSON object, sent in its own websocket frame. Messages are not tagged
//! with a type field: the type of a message is identified by the name of the field that carries its
//! SubID.
//!
//! | Message                               | Direction       | Example                                                                        |
//! |---------------------------------------|-----------------|--------------------------------------------------------------------------------|
//! | [Subscribe](ClientMessage::Subscribe)     | client → server | `{"Subscribe":"s1","ModelID":"m","Reconnect":{"BasisID":"a1","ParentID":"a1"}}` |
//! | [Unsubscribe](ClientMessage::Unsubscribe) | client → server | `{"Unsubscribe":"s1"}`                                                         |
//! | [Append](ClientMessage::Append)           | client → server | `{"Append":"s1","Ops":[{"ID":"b1","Parents":["a1"],"Payload":...}]}`           |
//! | [Bootstrap](ServerMessage::Bootstrap)       | server → client | `{"Bootstrap":"s1","ModelID":"m","Rebased":[...],"ClientRebased":[]}`          |
//! | [Notification](ServerMessage::Notification) | server → client | `{"Notification":"s1","ModelID":"m","AckID":"b1","Operations":[...]}`          |
//! | [Error](ServerMessage::Error)               | server → client | `{"Error":"s1","ModelID":"m","Message":"subscription does not exist"}`         |

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    data_types::{ModelID, OpID, SubID},
    operation::Operation,
};

/// Messages sent by clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged, bound(deserialize = "C: Deserialize<'de>"))]
pub enum ClientMessage<C> {
    /// Open a subscription to a model.
    ///
    /// Without `reconnect` the server answers with a [Bootstrap](ServerMessage::Bootstrap). With it,
    /// the server resumes delivery from the given cursor and sends no Bootstrap. `client_ops` are the
    /// operations the client sent before, but never saw acknowledged, in the order it sent them.
    Subscribe {
        #[serde(rename = "Subscribe")]
        sub_id: SubID,
        #[serde(rename = "ModelID")]
        model_id: ModelID,
        #[serde(rename = "ClientOps", default, skip_serializing_if = "Vec::is_empty")]
        client_ops: Vec<Operation<C>>,
        #[serde(rename = "Reconnect", default, skip_serializing_if = "Option::is_none")]
        reconnect: Option<Reconnect>,
    },

    Unsubscribe {
        #[serde(rename = "Unsubscribe")]
        sub_id: SubID,
    },

    /// Submit new operations, in the order the client produced them.
    Append {
        #[serde(rename = "Append")]
        sub_id: SubID,
        #[serde(rename = "Ops")]
        ops: Vec<Operation<C>>,
    },
}

impl<C> ClientMessage<C> {
    pub fn sub_id(&self) -> &SubID {
        match self {
            ClientMessage::Subscribe { sub_id, .. } => sub_id,
            ClientMessage::Unsubscribe { sub_id } => sub_id,
            ClientMessage::Append { sub_id, .. } => sub_id,
        }
    }
}

/// The cursor a client resumes a subscription from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconnect {
    #[serde(rename = "BasisID", default)]
    pub basis_id: OpID,
    #[serde(rename = "ParentID", default)]
    pub parent_id: OpID,
}

impl Reconnect {
    /// A `Reconnect` whose IDs are both empty is treated as if it were absent.
    pub fn is_empty(&self) -> bool {
        self.basis_id.is_none() && self.parent_id.is_none()
    }
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged, bound(deserialize = "C: Deserialize<'de>"))]
pub enum ServerMessage<C> {
    /// The whole model, for a subscription that did not ask to reconnect.
    ///
    /// `rebased` are the log's operations, possibly compacted. `client_rebased` are the client
    /// operations supplied with the Subscribe that were not in the log yet, as the server committed
    /// them; their acks follow in a Notification.
    Bootstrap {
        #[serde(rename = "Bootstrap")]
        sub_id: SubID,
        #[serde(rename = "ModelID")]
        model_id: ModelID,
        #[serde(rename = "Rebased")]
        rebased: Vec<Operation<C>>,
        #[serde(rename = "ClientRebased")]
        client_rebased: Vec<Operation<C>>,
    },

    /// Operations of other clients to apply, in log order, followed by the acknowledgement of one of
    /// the client's own operations.
    Notification {
        #[serde(rename = "Notification")]
        sub_id: SubID,
        #[serde(rename = "ModelID")]
        model_id: ModelID,
        #[serde(rename = "AckID", default, skip_serializing_if = "Option::is_none")]
        ack_id: Option<OpID>,
        #[serde(rename = "Operations", default, skip_serializing_if = "Vec::is_empty")]
        operations: Vec<Operation<C>>,
    },

    Error {
        #[serde(rename = "Error")]
        sub_id: SubID,
        #[serde(rename = "ModelID")]
        model_id: ModelID,
        #[serde(rename = "Message")]
        message: String,
    },
}

impl<C> ServerMessage<C> {
    pub fn sub_id(&self) -> &SubID {
        match self {
            ServerMessage::Bootstrap { sub_id, .. } => sub_id,
            ServerMessage::Notification { sub_id, .. } => sub_id,
            ServerMessage::Error { sub_id, .. } => sub_id,
        }
    }

    pub fn error(sub_id: SubID, model_id: ModelID, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            sub_id,
            model_id,
            message: message.into(),
        }
    }
}

/// Texts of the [Error](ServerMessage::Error) messages the server sends.
pub mod error_messages {
    pub const SUBSCRIPTION_EXISTS: &str = "subscription already exists";
    pub const SUBSCRIPTION_DOES_NOT_EXIST: &str = "subscription does not exist";
    pub const INVALID_CLIENT_OPERATIONS: &str = "invalid client operations";
    pub const MODEL_UNAVAILABLE: &str = "model unavailable";
}

pub fn decode_client_message<C: DeserializeOwned>(text: &str) -> Result<ClientMessage<C>, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

pub fn encode_server_message<C: Serialize>(message: &ServerMessage<C>) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Enumerates the ways in which converting messages to or from JSON may fail.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot decode client message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("cannot encode server message: {0}")]
    Encode(#[source] serde_json::Error),
}
