//! A simulated OT client that talks to the log service in JSON frames, the way a browser client
//! would over a websocket.
//!
//! The client applies its own edits locally at once, and keeps them in an in-flight queue until the
//! server acknowledges them. Operations of other clients are transformed against the in-flight queue
//! before they are applied, and the in-flight queue is transformed against them in turn.

use std::{
    collections::VecDeque,
    sync::mpsc::Receiver,
    thread,
    time::{Duration, Instant},
};

use oplog_rs::{
    connection::ConnectionHandle,
    messages::{ClientMessage, Reconnect, ServerMessage},
    transform::Transform,
    types::{
        data_types::{ModelID, OpID, SubID},
        operation::{Operation, Parents},
    },
};
use rand::Rng;

use super::{
    connection::mock_connection,
    service::{log_of, TextServer},
    text_ot::{self, apply, TextChange, TextOT},
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Client {
    name: String,
    model: ModelID,
    sub_id: SubID,
    connection: Option<(ConnectionHandle<TextChange>, Receiver<String>)>,
    doc: String,
    basis: OpID,
    last_sent: OpID,
    in_flight: VecDeque<Operation<TextChange>>,
    next_op: usize,
    processed: Vec<OpID>,
    received: Vec<ServerMessage<TextChange>>,
}

impl Client {
    /// Connect a client named `name`, which edits `model`. The IDs of its operations are its name
    /// followed by a counter.
    pub(crate) fn new(server: &TextServer, name: &str, model: &str) -> Self {
        let mut client = Self {
            name: name.to_string(),
            model: ModelID::new(model),
            sub_id: SubID::new(format!("{name}-sub")),
            connection: None,
            doc: String::new(),
            basis: OpID::none(),
            last_sent: OpID::none(),
            in_flight: VecDeque::new(),
            next_op: 0,
            processed: Vec::new(),
            received: Vec::new(),
        };
        client.connect(server);
        client
    }

    pub(crate) fn doc(&self) -> &str {
        &self.doc
    }

    pub(crate) fn basis(&self) -> &OpID {
        &self.basis
    }

    pub(crate) fn last_sent(&self) -> &OpID {
        &self.last_sent
    }

    pub(crate) fn sub_id(&self) -> &SubID {
        &self.sub_id
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// IDs of the log entries this client has incorporated, in the order it incorporated them.
    pub(crate) fn processed(&self) -> &[OpID] {
        &self.processed
    }

    /// Every message received so far, in the order received.
    pub(crate) fn received(&self) -> &[ServerMessage<TextChange>] {
        &self.received
    }

    pub(crate) fn errors(&self) -> Vec<&str> {
        self.received
            .iter()
            .filter_map(|message| match message {
                ServerMessage::Error { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn is_online(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a new connection, replacing (and closing) the current one, if any.
    pub(crate) fn connect(&mut self, server: &TextServer) {
        let (stub, frames) = mock_connection();
        self.connection = Some((server.connect(stub), frames));
    }

    /// Close the connection. Whatever the server has not sent yet is lost.
    pub(crate) fn disconnect(&mut self) {
        self.connection = None;
    }

    /// Subscribe without a cursor, and so get bootstrapped. In-flight operations are handed to the
    /// server as `ClientOps`, rebased on the client's basis.
    pub(crate) fn subscribe(&mut self) {
        if let Some(first) = self.in_flight.front_mut() {
            first.parents.basis = self.basis.clone();
        } else {
            self.last_sent = OpID::none();
        }
        self.send(ClientMessage::Subscribe {
            sub_id: self.sub_id.clone(),
            model_id: self.model.clone(),
            client_ops: self.in_flight.iter().cloned().collect(),
            reconnect: None,
        });
    }

    /// Reconnect on a new connection, resuming from the client's cursor.
    pub(crate) fn reconnect(&mut self, server: &TextServer) {
        self.connect(server);
        self.send(ClientMessage::Subscribe {
            sub_id: self.sub_id.clone(),
            model_id: self.model.clone(),
            client_ops: self.in_flight.iter().cloned().collect(),
            reconnect: Some(Reconnect {
                basis_id: self.basis.clone(),
                parent_id: self.last_sent.clone(),
            }),
        });
    }

    pub(crate) fn unsubscribe(&mut self) {
        self.send(ClientMessage::Unsubscribe {
            sub_id: self.sub_id.clone(),
        });
    }

    /// Apply `change` locally and submit it. Returns the ID of the new operation.
    pub(crate) fn edit(&mut self, change: TextChange) -> OpID {
        self.doc = apply(&self.doc, &change);
        self.next_op += 1;
        let id = OpID::new(format!("{}{}", self.name, self.next_op));
        let op = Operation::new(
            id.clone(),
            Parents::new(self.basis.clone(), self.last_sent.clone()),
            change,
        );
        self.last_sent = id.clone();
        self.in_flight.push_back(op.clone());
        self.send(ClientMessage::Append {
            sub_id: self.sub_id.clone(),
            ops: vec![op],
        });
        id
    }

    /// Make a random insert or delete somewhere in the document.
    pub(crate) fn random_edit<R: Rng>(&mut self, rng: &mut R) -> OpID {
        let len = self.doc.chars().count();
        let change = if len > 0 && rng.gen_bool(0.3) {
            let pos = rng.gen_range(0, len);
            let max = (len - pos).min(3);
            text_ot::delete(pos, rng.gen_range(1, max + 1))
        } else {
            let pos = rng.gen_range(0, len + 1);
            let text: String = (0..rng.gen_range(1, 4))
                .map(|_| rng.gen_range(b'a', b'z' + 1) as char)
                .collect();
            text_ot::insert(pos, &text)
        };
        assert!(text_ot::fits(&self.doc, &change));
        self.edit(change)
    }

    /// Send `message` as a JSON frame. Does nothing while offline.
    pub(crate) fn send(&mut self, message: ClientMessage<TextChange>) {
        let frame = serde_json::to_string(&message).unwrap();
        self.send_text(&frame);
    }

    pub(crate) fn send_text(&mut self, frame: &str) {
        if let Some((connection, _)) = self.connection.as_mut() {
            connection.handle_text(frame);
        }
    }

    /// Handle every frame received so far. Returns the number of frames handled.
    pub(crate) fn process(&mut self) -> usize {
        let frames: Vec<String> = match &self.connection {
            Some((_, frames)) => frames.try_iter().collect(),
            None => Vec::new(),
        };
        for frame in &frames {
            let message: ServerMessage<TextChange> = serde_json::from_str(frame).unwrap();
            self.handle(message);
        }
        frames.len()
    }

    /// Process frames until `condition` holds. Panics if it does not hold within 10 seconds.
    pub(crate) fn process_until(&mut self, condition: impl Fn(&Client) -> bool) {
        let start = Instant::now();
        loop {
            self.process();
            if condition(self) {
                return;
            }
            assert!(
                start.elapsed() < WAIT_TIMEOUT,
                "client {} timed out waiting, received: {:?}",
                self.name,
                self.received
            );
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Process frames until `count` messages have been received in total.
    pub(crate) fn process_until_received(&mut self, count: usize) {
        self.process_until(|client| client.received.len() >= count)
    }

    fn handle(&mut self, message: ServerMessage<TextChange>) {
        match &message {
            ServerMessage::Bootstrap {
                rebased,
                client_rebased,
                ..
            } => {
                self.doc = rebased
                    .iter()
                    .fold(String::new(), |doc, op| apply(&doc, &op.payload));
                self.basis = rebased.last().map(|op| op.id.clone()).unwrap_or_default();
                self.processed = rebased.iter().map(|op| op.id.clone()).collect();

                for op in client_rebased {
                    self.doc = apply(&self.doc, &op.payload);
                }
                self.in_flight = client_rebased.iter().cloned().collect();
            }

            ServerMessage::Notification {
                ack_id, operations, ..
            } => {
                for op in operations {
                    let mut change = op.payload.clone();
                    for pending in self.in_flight.iter_mut() {
                        let (pending_prime, change_prime) =
                            TextOT.transform(&pending.payload, &change).unwrap();
                        pending.payload = pending_prime;
                        change = change_prime;
                    }
                    self.doc = apply(&self.doc, &change);
                    self.basis = op.id.clone();
                    self.processed.push(op.id.clone());
                }

                if let Some(ack_id) = ack_id {
                    let acked = self
                        .in_flight
                        .pop_front()
                        .unwrap_or_else(|| panic!("client {} got ack {} with nothing in flight", self.name, ack_id));
                    assert_eq!(&acked.id, ack_id, "client {} got acks out of order", self.name);
                    self.basis = ack_id.clone();
                    self.processed.push(ack_id.clone());
                }
            }

            ServerMessage::Error { .. } => (),
        }
        self.received.push(message);
    }
}

/// Process the frames of every online client until all of them have their operations acknowledged
/// and have incorporated the whole log of their model. Panics if that does not happen within 10
/// seconds.
pub(crate) fn settle(server: &TextServer, clients: &mut [&mut Client]) {
    let start = Instant::now();
    loop {
        let mut settled = true;
        for client in clients.iter_mut().filter(|client| client.is_online()) {
            client.process();
            let tail = log_of(server, client.model.as_str())
                .last()
                .map(|op| op.id.clone())
                .unwrap_or_default();
            settled &= client.in_flight.is_empty() && client.basis == tail;
        }
        if settled {
            return;
        }
        assert!(start.elapsed() < WAIT_TIMEOUT, "clients did not settle");
        thread::sleep(Duration::from_millis(5));
    }
}
