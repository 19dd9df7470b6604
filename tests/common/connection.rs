use std::{
    sync::mpsc::{self, Receiver, Sender},
    time::Duration,
};

use oplog_rs::{
    connection::Connection,
    messages::{encode_server_message, ServerMessage},
};

use super::text_ot::TextChange;

/// A mock websocket writer which passes the JSON frame of every server message to a channel.
pub(crate) struct ConnectionStub {
    frames: Sender<String>,
}

impl Connection<TextChange> for ConnectionStub {
    fn send(&mut self, message: ServerMessage<TextChange>) {
        let frame = encode_server_message(&message).unwrap();
        let _ = self.frames.send(frame);
    }
}

pub(crate) fn mock_connection() -> (ConnectionStub, Receiver<String>) {
    let (frames, receiver) = mpsc::channel();
    (ConnectionStub { frames }, receiver)
}

/// Wait for the next frame on `frames` and decode it. Panics if none arrives within 5 seconds.
pub(crate) fn next_message(frames: &Receiver<String>) -> ServerMessage<TextChange> {
    let frame = frames.recv_timeout(Duration::from_secs(5)).unwrap();
    serde_json::from_str(&frame).unwrap()
}
