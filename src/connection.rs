/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable client connections, and the handle through which their messages reach the models.
//!
//! The log service does not deal with websockets itself. Instead, the library user splits each client
//! socket into two halves:
//! 1. The outbound half implements [`Connection`], which the service uses to send
//!    [server messages](ServerMessage) to the client.
//! 2. The inbound half feeds every frame it receives to the [`ConnectionHandle`] that
//!    [`Server::connect`](crate::server::Server::connect) returned for the connection.
//!
//! A connection may multiplex subscriptions to any number of models. Its SubIDs are scoped to it.
//!
//! ## Outbound queue
//!
//! Every connection has an unbounded outbound queue, drained by a writer thread that calls
//! [`Connection::send`]. Model actors only ever push onto this queue, so a slow client never holds up
//! a model. Once a subscription is closed, whatever is still queued for it is discarded.
//!
//! ## Closing
//!
//! Dropping a `ConnectionHandle` (or calling [`close`](ConnectionHandle::close)) closes every
//! subscription of the connection at once, and stops its writer thread.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::dispatcher::{Outbound, SubscriptionSender};
use crate::messages::{decode_client_message, error_messages, ClientMessage, ServerMessage};
use crate::model::ModelCommand;
use crate::server::Router;
use crate::types::data_types::{ConnectionID, ModelID, SubID};

/// The outbound half of a client connection.
pub trait Connection<C>: Send + 'static {
    /// Send `message` to the client. Called from the connection's writer thread only, in the order
    /// the messages were produced for each subscription.
    fn send(&mut self, message: ServerMessage<C>);
}

/// The inbound half of a client connection, as seen by the log service.
pub struct ConnectionHandle<C> {
    id: ConnectionID,
    router: Arc<Mutex<Router<C>>>,
    outbound: Sender<Outbound<C>>,
    subscriptions: HashMap<SubID, (ModelID, SubscriptionSender<C>)>,
    models: HashMap<ModelID, Sender<ModelCommand<C>>>,
    writer: Option<JoinHandle<()>>,
    writer_shutdown: Sender<()>,
}

impl<C: serde::de::DeserializeOwned + Send + 'static> ConnectionHandle<C> {
    pub(crate) fn new<N: Connection<C>>(
        id: ConnectionID,
        router: Arc<Mutex<Router<C>>>,
        connection: N,
        poll_interval: Duration,
    ) -> Self {
        let (outbound, outbound_receiver) = mpsc::channel();
        let (writer_shutdown, writer_shutdown_receiver) = mpsc::channel();
        let writer = start_writer(connection, outbound_receiver, writer_shutdown_receiver, poll_interval);

        Self {
            id,
            router,
            outbound,
            subscriptions: HashMap::new(),
            models: HashMap::new(),
            writer: Some(writer),
            writer_shutdown,
        }
    }

    pub fn id(&self) -> ConnectionID {
        self.id
    }

    /// Handle a raw JSON frame received from the client. Frames that cannot be decoded carry no
    /// usable SubID to report an error against, and are logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        match decode_client_message(text) {
            Ok(message) => self.handle(message),
            Err(error) => log::warn!("dropping frame from connection {}: {}", self.id, error),
        }
    }

    /// Route `message` to the actor of the model it concerns.
    pub fn handle(&mut self, message: ClientMessage<C>) {
        match message {
            ClientMessage::Subscribe {
                sub_id,
                model_id,
                client_ops,
                reconnect,
            } => {
                if self.subscriptions.contains_key(&sub_id) {
                    self.send_error(sub_id, model_id, error_messages::SUBSCRIPTION_EXISTS);
                    return;
                }

                let sender = SubscriptionSender::new(self.outbound.clone());
                let command = ModelCommand::Subscribe {
                    connection: self.id,
                    sub_id: sub_id.clone(),
                    client_ops,
                    reconnect,
                    sender: sender.clone(),
                };
                if self.route(&model_id, command) {
                    self.subscriptions.insert(sub_id, (model_id, sender));
                } else {
                    self.send_error(sub_id, model_id, error_messages::MODEL_UNAVAILABLE);
                }
            }

            ClientMessage::Unsubscribe { sub_id } => match self.subscriptions.remove(&sub_id) {
                Some((model_id, sender)) => {
                    sender.close();
                    let command = ModelCommand::Unsubscribe {
                        connection: self.id,
                        sub_id,
                    };
                    self.route(&model_id, command);
                }
                None => self.send_error(
                    sub_id,
                    ModelID::default(),
                    error_messages::SUBSCRIPTION_DOES_NOT_EXIST,
                ),
            },

            ClientMessage::Append { sub_id, ops } => {
                let Some((model_id, sender)) = self.subscriptions.get(&sub_id) else {
                    self.send_error(
                        sub_id,
                        ModelID::default(),
                        error_messages::SUBSCRIPTION_DOES_NOT_EXIST,
                    );
                    return;
                };
                let model_id = model_id.clone();
                let command = ModelCommand::Append {
                    connection: self.id,
                    sub_id: sub_id.clone(),
                    ops,
                    sender: sender.clone(),
                };
                if !self.route(&model_id, command) {
                    self.send_error(sub_id, model_id, error_messages::MODEL_UNAVAILABLE);
                }
            }
        }
    }

    /// Close every subscription of this connection and stop its writer thread.
    pub fn close(self) {}

    /// Send `command` to the actor of `model_id`, starting the actor if needed. Returns false if the
    /// server is shutting down.
    fn route(&mut self, model_id: &ModelID, command: ModelCommand<C>) -> bool {
        if !self.models.contains_key(model_id) {
            let commands = match self.router.lock() {
                Ok(mut router) => router.commands(model_id),
                Err(_) => None,
            };
            match commands {
                Some(commands) => {
                    self.models.insert(model_id.clone(), commands);
                }
                None => return false,
            }
        }

        match self.models.get(model_id) {
            Some(commands) => commands.send(command).is_ok(),
            None => false,
        }
    }

    fn send_error(&self, sub_id: SubID, model_id: ModelID, message: &str) {
        SubscriptionSender::new(self.outbound.clone()).send(ServerMessage::error(sub_id, model_id, message));
    }
}

impl<C> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        for (_, sender) in self.subscriptions.values() {
            sender.close();
        }
        for commands in self.models.values() {
            let _ = commands.send(ModelCommand::Disconnect {
                connection: self.id,
            });
        }

        let _ = self.writer_shutdown.send(());
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                log::error!("writer thread of connection {} panicked", self.id);
            }
        }
    }
}

fn start_writer<C: Send + 'static, N: Connection<C>>(
    mut connection: N,
    outbound: Receiver<Outbound<C>>,
    shutdown_signal: Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match outbound.recv_timeout(poll_interval) {
            Ok(item) if item.is_live() => connection.send(item.into_message()),
            Ok(_) => (),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
