//! Tests for the JSON encoding of the messages exchanged with clients.

use log::LevelFilter;
use oplog_rs::{
    messages::{decode_client_message, encode_server_message, ClientMessage, Reconnect, ServerMessage},
    types::{
        data_types::{ModelID, OpID, SubID},
        operation::{Operation, Parents},
    },
};
use serde_json::{json, Value};

mod common;

use crate::common::{
    connection::{mock_connection, next_message},
    logging::setup_logger,
    service::start_server,
    text_ot::{self, Component, TextChange},
};

fn encode(message: &ServerMessage<TextChange>) -> Value {
    serde_json::from_str(&encode_server_message(message).unwrap()).unwrap()
}

#[test]
fn client_messages_test() {
    // 1. Subscribe, with every optional field.
    let message: ClientMessage<TextChange> = decode_client_message(
        r#"{
            "Subscribe": "s1",
            "ModelID": "m",
            "ClientOps": [{"ID": "c1", "Parents": ["a1", "a1"], "Payload": [{"Retain": 2}, {"Delete": 1}]}],
            "Reconnect": {"BasisID": "a1", "ParentID": "a1"}
        }"#,
    )
    .unwrap();
    assert_eq!(
        message,
        ClientMessage::Subscribe {
            sub_id: SubID::new("s1"),
            model_id: ModelID::new("m"),
            client_ops: vec![Operation::new(
                OpID::new("c1"),
                Parents::new(OpID::new("a1"), OpID::new("a1")),
                vec![Component::Retain(2), Component::Delete(1)],
            )],
            reconnect: Some(Reconnect {
                basis_id: OpID::new("a1"),
                parent_id: OpID::new("a1"),
            }),
        }
    );

    // 2. Subscribe, with none of them.
    let message: ClientMessage<TextChange> =
        decode_client_message(r#"{"Subscribe":"s1","ModelID":"m"}"#).unwrap();
    assert_eq!(
        message,
        ClientMessage::Subscribe {
            sub_id: SubID::new("s1"),
            model_id: ModelID::new("m"),
            client_ops: Vec::new(),
            reconnect: None,
        }
    );

    // 3. Append, where the first operation has no ParentID.
    let message: ClientMessage<TextChange> = decode_client_message(
        r#"{"Append":"s1","Ops":[{"ID":"c1","Parents":[""],"Payload":[{"Insert":"x"}]}]}"#,
    )
    .unwrap();
    assert_eq!(
        message,
        ClientMessage::Append {
            sub_id: SubID::new("s1"),
            ops: vec![Operation::new(
                OpID::new("c1"),
                Parents::new(OpID::none(), OpID::none()),
                text_ot::insert(0, "x"),
            )],
        }
    );

    // 4. Unsubscribe.
    let message: ClientMessage<TextChange> = decode_client_message(r#"{"Unsubscribe":"s1"}"#).unwrap();
    assert_eq!(message.sub_id(), &SubID::new("s1"));

    // 5. Parents must hold one or two IDs.
    assert!(decode_client_message::<TextChange>(
        r#"{"Append":"s1","Ops":[{"ID":"c1","Parents":[],"Payload":[]}]}"#
    )
    .is_err());
    assert!(decode_client_message::<TextChange>(
        r#"{"Append":"s1","Ops":[{"ID":"c1","Parents":["a","b","c"],"Payload":[]}]}"#
    )
    .is_err());
}

#[test]
fn server_messages_test() {
    let sub_id = SubID::new("s1");
    let model_id = ModelID::new("m");
    let op = Operation::new(
        OpID::new("a2"),
        Parents::new(OpID::new("a1"), OpID::none()),
        text_ot::insert(1, "y"),
    );

    // 1. ClientRebased is always present in a Bootstrap.
    assert_eq!(
        encode(&ServerMessage::Bootstrap {
            sub_id: sub_id.clone(),
            model_id: model_id.clone(),
            rebased: vec![op.clone()],
            client_rebased: Vec::new(),
        }),
        json!({
            "Bootstrap": "s1",
            "ModelID": "m",
            "Rebased": [{"ID": "a2", "Parents": ["a1", ""], "Payload": [{"Retain": 1}, {"Insert": "y"}]}],
            "ClientRebased": []
        })
    );

    // 2. AckID and Operations are omitted from a Notification when empty.
    assert_eq!(
        encode(&ServerMessage::Notification {
            sub_id: sub_id.clone(),
            model_id: model_id.clone(),
            ack_id: Some(OpID::new("c1")),
            operations: Vec::new(),
        }),
        json!({"Notification": "s1", "ModelID": "m", "AckID": "c1"})
    );
    assert_eq!(
        encode(&ServerMessage::Notification {
            sub_id: sub_id.clone(),
            model_id: model_id.clone(),
            ack_id: None,
            operations: vec![op],
        }),
        json!({
            "Notification": "s1",
            "ModelID": "m",
            "Operations": [{"ID": "a2", "Parents": ["a1", ""], "Payload": [{"Retain": 1}, {"Insert": "y"}]}]
        })
    );

    // 3. Error.
    assert_eq!(
        encode(&ServerMessage::error(sub_id, model_id, "subscription does not exist")),
        json!({"Error": "s1", "ModelID": "m", "Message": "subscription does not exist"})
    );
}

#[test]
fn empty_reconnect_is_a_fresh_subscribe_test() {
    setup_logger(LevelFilter::Debug);

    let server = start_server();
    let (stub, frames) = mock_connection();
    let mut connection = server.connect(stub);
    connection.handle_text(
        r#"{"Subscribe":"s1","ModelID":"m","Reconnect":{"BasisID":"","ParentID":""}}"#,
    );
    assert!(matches!(next_message(&frames), ServerMessage::Bootstrap { .. }));
}
