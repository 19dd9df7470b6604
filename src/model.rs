/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The per-model actor: the serialization point of everything that happens to a model.
//!
//! Every model runs on its own thread, which owns the model's [`Engine`] (and through it, the
//! model's operation log) and its [`SubscriptionRegistry`]. Connections talk to the actor only by
//! sending it [`ModelCommand`]s, which it handles strictly one at a time, in mailbox order. Models
//! never share state or locks with each other, so a slow or faulted model has no effect on the
//! others.
//!
//! Each command is one dispatch cycle: every message it produces for a subscription is collected in
//! that subscription's outbox, and all outboxes are flushed once the command has been handled.
//!
//! ## Faults
//!
//! If the Transform Primitive or the persistence layer fails, the model is *faulted*: every
//! subscription of the model receives an Error, and every later Subscribe or Append is answered with
//! Error "model unavailable: <cause>". The model stays faulted until the server is restarted.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::dispatcher::{self, SubscriptionSender};
use crate::engine::{AppendOutcome, CatchUp, CatchUpStep, Commit, Engine, EngineError, RebasedClientOp};
use crate::events::*;
use crate::messages::{error_messages, Reconnect, ServerMessage};
use crate::operation_log::{Journal, LogStore, OperationLog};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transform::{Compaction, Transform};
use crate::types::data_types::{ConnectionID, LogPosition, ModelID, OpID, SubID};
use crate::types::operation::Operation;

/// Requests that connections make of a model's actor.
pub(crate) enum ModelCommand<C> {
    Subscribe {
        connection: ConnectionID,
        sub_id: SubID,
        client_ops: Vec<Operation<C>>,
        reconnect: Option<Reconnect>,
        sender: SubscriptionSender<C>,
    },
    Unsubscribe {
        connection: ConnectionID,
        sub_id: SubID,
    },
    Append {
        connection: ConnectionID,
        sub_id: SubID,
        ops: Vec<Operation<C>>,
        sender: SubscriptionSender<C>,
    },
    /// The connection has closed: remove all of its subscriptions.
    Disconnect { connection: ConnectionID },
}

/// A handle to a running model actor.
pub(crate) struct ModelHandle<C> {
    commands: Sender<ModelCommand<C>>,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl<C> ModelHandle<C> {
    pub(crate) fn commands(&self) -> Sender<ModelCommand<C>> {
        self.commands.clone()
    }

    /// Stop the actor and wait for its thread to exit.
    pub(crate) fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("model actor thread panicked");
            }
        }
    }
}

/// Everything a model actor needs besides its own state. Shared by the actors of all models.
pub(crate) struct ModelContext<T: Transform, L, J> {
    pub(crate) transform: T,
    pub(crate) log_store: L,
    pub(crate) journal: J,
    pub(crate) compaction: Arc<dyn Compaction<T>>,
    pub(crate) idle_poll_interval: Duration,
    pub(crate) event_publisher: Option<Sender<Event>>,
}

impl<T: Transform, L: Clone, J: Clone> Clone for ModelContext<T, L, J> {
    fn clone(&self) -> Self {
        Self {
            transform: self.transform.clone(),
            log_store: self.log_store.clone(),
            journal: self.journal.clone(),
            compaction: self.compaction.clone(),
            idle_poll_interval: self.idle_poll_interval,
            event_publisher: self.event_publisher.clone(),
        }
    }
}

pub(crate) struct ModelActor<T: Transform, L: LogStore<T::Change>, J: Journal<T::Change>> {
    model: ModelID,
    engine: Option<Engine<T, L, J>>,
    registry: SubscriptionRegistry<T::Change>,
    fault: Option<String>,
    compaction: Arc<dyn Compaction<T>>,
    commands: Receiver<ModelCommand<T::Change>>,
    shutdown_signal: Receiver<()>,
    idle_poll_interval: Duration,
    event_publisher: Option<Sender<Event>>,
}

impl<T, L, J> ModelActor<T, L, J>
where
    T: Transform,
    L: LogStore<T::Change>,
    J: Journal<T::Change>,
{
    /// Spawn the actor of `model` on its own thread.
    pub(crate) fn start(model: ModelID, context: ModelContext<T, L, J>) -> ModelHandle<T::Change> {
        let (commands, command_receiver) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();

        let thread = thread::spawn(move || {
            let mut actor = ModelActor::new(model, context, command_receiver, shutdown_receiver);
            actor.run()
        });

        ModelHandle {
            commands,
            shutdown,
            thread: Some(thread),
        }
    }

    fn new(
        model: ModelID,
        context: ModelContext<T, L, J>,
        commands: Receiver<ModelCommand<T::Change>>,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        let mut actor = Self {
            model: model.clone(),
            engine: None,
            registry: SubscriptionRegistry::new(),
            fault: None,
            compaction: context.compaction,
            commands,
            shutdown_signal,
            idle_poll_interval: context.idle_poll_interval,
            event_publisher: context.event_publisher,
        };

        match OperationLog::open(model, context.log_store) {
            Ok(log) => {
                warn_about_orphans(&log, &context.journal);
                actor.engine = Some(Engine::new(context.transform, log, context.journal));
            }
            Err(error) => actor.fault(EngineError::from(error)),
        }
        actor
    }

    fn run(&mut self) {
        loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match self.commands.recv_timeout(self.idle_poll_interval) {
                Ok(command) => {
                    self.handle(command);
                    dispatcher::flush(&mut self.registry);
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn handle(&mut self, command: ModelCommand<T::Change>) {
        match command {
            ModelCommand::Subscribe {
                connection,
                sub_id,
                client_ops,
                reconnect,
                sender,
            } => self.on_subscribe(connection, sub_id, client_ops, reconnect, sender),
            ModelCommand::Unsubscribe { connection, sub_id } => {
                if self.registry.remove(connection, &sub_id).is_some() {
                    self.publish_unsubscribe(connection, sub_id);
                }
            }
            ModelCommand::Append {
                connection,
                sub_id,
                ops,
                sender,
            } => self.on_append(connection, sub_id, ops, sender),
            ModelCommand::Disconnect { connection } => {
                for removed in self.registry.remove_connection(connection) {
                    self.publish_unsubscribe(connection, removed.subscription.sub_id().clone());
                }
            }
        }
    }

    fn on_subscribe(
        &mut self,
        connection: ConnectionID,
        sub_id: SubID,
        client_ops: Vec<Operation<T::Change>>,
        reconnect: Option<Reconnect>,
        sender: SubscriptionSender<T::Change>,
    ) {
        if let Some(cause) = &self.fault {
            sender.send(ServerMessage::error(
                sub_id,
                self.model.clone(),
                model_unavailable(cause),
            ));
            return;
        }
        if self.registry.contains(connection, &sub_id) {
            sender.send(ServerMessage::error(
                sub_id,
                self.model.clone(),
                error_messages::SUBSCRIPTION_EXISTS,
            ));
            return;
        }

        let reconnect = reconnect.filter(|reconnect| !reconnect.is_empty());
        Event::publish(
            &self.event_publisher,
            Event::Subscribe(SubscribeEvent {
                timestamp: SystemTime::now(),
                model: self.model.clone(),
                connection,
                sub_id: sub_id.clone(),
                reconnect: reconnect.is_some(),
                client_ops: client_ops.len(),
            }),
        );

        let reply = sender.clone();
        let result = match reconnect {
            Some(reconnect) => self.reconnect(connection, sub_id.clone(), client_ops, reconnect, sender),
            None => self.bootstrap(connection, sub_id.clone(), client_ops, sender),
        };
        match result {
            Ok(()) => (),
            Err(error) if error.is_fault() => self.fault(error),
            Err(error) => {
                log::debug!(
                    "rejecting subscribe {} of connection {} to {}: {:?}",
                    sub_id,
                    connection,
                    self.model,
                    error
                );
                reply.send(ServerMessage::error(sub_id, self.model.clone(), error.to_string()));
            }
        }
    }

    /// Register a fresh subscription and produce its Bootstrap.
    ///
    /// Client operations supplied with the Subscribe are rebased from the basis of the first of them
    /// onto the log's tail and committed. The Bootstrap carries the log as it was before they were
    /// committed in `Rebased`, and their committed forms in `ClientRebased`; their acks follow in the
    /// same cycle.
    fn bootstrap(
        &mut self,
        connection: ConnectionID,
        sub_id: SubID,
        client_ops: Vec<Operation<T::Change>>,
        sender: SubscriptionSender<T::Change>,
    ) -> Result<(), EngineError> {
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };

        let catch_up = match client_ops.first() {
            Some(first) => engine.catch_up(first.basis(), &client_ops)?,
            None => CatchUp {
                steps: Vec::new(),
                rebased: Vec::new(),
            },
        };
        let log = engine.log();
        let rebased = self.compaction.compact(
            engine.transform(),
            log.entries_after(LogPosition::START).to_vec(),
        )?;
        let basis = log.tail_id();
        let basis_position = log.tail_position();
        let parent = client_ops
            .last()
            .map(|op| op.id.clone())
            .unwrap_or_else(OpID::none);

        let subscription = Subscription::awaiting_bootstrap(connection, sub_id.clone(), self.model.clone());
        if let Err(error) = self.registry.insert(subscription, sender) {
            log::warn!("{}", error);
            return Ok(());
        }

        let committed = self.commit_rebased(&catch_up.rebased, None)?;

        let Some(registered) = self.registry.get_mut(connection, &sub_id) else {
            return Ok(());
        };
        if let Err(error) = registered
            .subscription
            .complete_bootstrap(basis, basis_position, parent)
        {
            log::warn!("{}", error);
            return Ok(());
        }
        Event::publish(
            &self.event_publisher,
            Event::Bootstrap(BootstrapEvent {
                timestamp: SystemTime::now(),
                model: self.model.clone(),
                connection,
                sub_id: sub_id.clone(),
                rebased: rebased.len(),
                client_rebased: committed.len(),
            }),
        );
        registered.outbox.push_bootstrap(
            rebased,
            committed.iter().map(|commit| commit.op.clone()).collect(),
        );

        for commit in &committed {
            registered.subscription.push_pending(commit.op.id.clone());
        }
        for commit in &committed {
            match dispatcher::acknowledge(registered, &commit.op, commit.position) {
                Ok(()) => publish_ack(&self.event_publisher, &self.model, connection, &sub_id, &commit.op.id),
                Err(rejection) => log::warn!("cannot acknowledge {}: {}", commit.op.id, rejection),
            }
        }
        Ok(())
    }

    /// Register a subscription that resumes from a cursor the client holds, and catch it up: acks for
    /// its operations that made it into the log, every other entry after the cursor, then the commit
    /// (and ack) of its operations that did not.
    ///
    /// Entries are sent as they are in the log, exactly like ordinary deliveries. The subscription
    /// remembers their compensating forms, against which the client's next operations are rebased.
    fn reconnect(
        &mut self,
        connection: ConnectionID,
        sub_id: SubID,
        client_ops: Vec<Operation<T::Change>>,
        reconnect: Reconnect,
        sender: SubscriptionSender<T::Change>,
    ) -> Result<(), EngineError> {
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };

        let catch_up = engine.catch_up(&reconnect.basis_id, &client_ops)?;
        let basis_position = engine
            .log()
            .position(&reconnect.basis_id)
            .ok_or_else(|| EngineError::UnknownBasis {
                basis: reconnect.basis_id.clone(),
            })?;

        let mut subscription = Subscription::reconnecting(
            connection,
            sub_id.clone(),
            self.model.clone(),
            reconnect.basis_id,
            basis_position,
            reconnect.parent_id,
        );
        if let Some(last) = client_ops.last() {
            subscription.override_parent(last.id.clone());
        }
        let registered = match self.registry.insert(subscription, sender) {
            Ok(registered) => registered,
            Err(error) => {
                log::warn!("{}", error);
                return Ok(());
            }
        };

        for step in &catch_up.steps {
            if let CatchUpStep::Ack { entry, .. } = step {
                registered.subscription.push_pending(entry.id.clone());
            }
        }
        for rebased in &catch_up.rebased {
            registered.subscription.push_pending(rebased.raw.id.clone());
        }

        for step in catch_up.steps {
            let result = match &step {
                CatchUpStep::Deliver {
                    entry,
                    position,
                    compensation,
                } => dispatcher::deliver(registered, entry, *position, compensation.clone()),
                CatchUpStep::Ack { entry, position } => {
                    dispatcher::acknowledge(registered, entry, *position).map(|()| {
                        publish_ack(&self.event_publisher, &self.model, connection, &sub_id, &entry.id)
                    })
                }
            };
            if let Err(rejection) = result {
                log::warn!("catch-up of subscription {} interrupted: {}", sub_id, rejection);
            }
        }

        self.commit_rebased(&catch_up.rebased, Some((connection, &sub_id)))?;

        if let Some(registered) = self.registry.get_mut(connection, &sub_id) {
            if let Err(error) = registered.subscription.complete_reconnect() {
                log::warn!("{}", error);
            }
        }
        Ok(())
    }

    fn on_append(
        &mut self,
        connection: ConnectionID,
        sub_id: SubID,
        ops: Vec<Operation<T::Change>>,
        sender: SubscriptionSender<T::Change>,
    ) {
        if let Some(cause) = &self.fault {
            sender.send(ServerMessage::error(
                sub_id,
                self.model.clone(),
                model_unavailable(cause),
            ));
            return;
        }
        // The connection still knows SubIDs whose Subscribe this model rejected.
        if !self.registry.contains(connection, &sub_id) {
            log::debug!(
                "append to unknown subscription {} of connection {}",
                sub_id,
                connection
            );
            sender.send(ServerMessage::error(
                sub_id,
                self.model.clone(),
                error_messages::SUBSCRIPTION_DOES_NOT_EXIST,
            ));
            return;
        }

        for raw in ops {
            let (Some(engine), Some(registered)) =
                (self.engine.as_mut(), self.registry.get_mut(connection, &sub_id))
            else {
                return;
            };

            if engine.log().contains(&raw.id) {
                publish_drop_duplicate(&self.event_publisher, &self.model, &raw.id);
                continue;
            }

            let basis_position = engine.log().position(raw.basis());
            let basis_position = match registered
                .subscription
                .validate_append(&raw, basis_position)
            {
                Ok(basis_position) => basis_position,
                Err(reason) => {
                    log::debug!("ignoring {} from subscription {}: {}", raw.id, sub_id, reason);
                    Event::publish(
                        &self.event_publisher,
                        Event::RejectOperation(RejectOperationEvent {
                            timestamp: SystemTime::now(),
                            model: self.model.clone(),
                            connection,
                            sub_id: sub_id.clone(),
                            op: raw.id.clone(),
                            reason,
                        }),
                    );
                    continue;
                }
            };

            let unseen = registered.subscription.unseen_after(basis_position);
            match engine.append(&raw, unseen) {
                Ok(AppendOutcome::Committed(commit)) => {
                    registered.subscription.push_pending(commit.op.id.clone());
                    self.publish_and_fan_out(&commit);
                }
                Ok(AppendOutcome::Duplicate) => {
                    publish_drop_duplicate(&self.event_publisher, &self.model, &raw.id)
                }
                Err(error) => {
                    self.fault(error);
                    return;
                }
            }
        }
    }

    /// Commit client operations that have already been rebased onto the tail. If `owner` is given,
    /// the operations are expected in its pending list; an operation that turns out to be a duplicate
    /// is removed from it, together with every operation after it, which is not committed either.
    fn commit_rebased(
        &mut self,
        rebased: &[RebasedClientOp<T::Change>],
        owner: Option<(ConnectionID, &SubID)>,
    ) -> Result<Vec<Commit<T::Change>>, EngineError> {
        let mut committed = Vec::with_capacity(rebased.len());
        for op in rebased {
            let Some(engine) = self.engine.as_mut() else {
                break;
            };
            match engine.append_rebased(op)? {
                AppendOutcome::Committed(commit) => {
                    self.publish_and_fan_out(&commit);
                    committed.push(commit);
                }
                AppendOutcome::Duplicate => {
                    publish_drop_duplicate(&self.event_publisher, &self.model, &op.raw.id);
                    if let Some(registered) =
                        owner.and_then(|(connection, sub_id)| self.registry.get_mut(connection, sub_id))
                    {
                        registered.subscription.abandon_pending(&op.raw.id);
                    }
                    break;
                }
            }
        }
        Ok(committed)
    }

    fn publish_and_fan_out(&mut self, commit: &Commit<T::Change>) {
        Event::publish(
            &self.event_publisher,
            Event::CommitOperation(CommitOperationEvent {
                timestamp: SystemTime::now(),
                model: self.model.clone(),
                op: commit.op.id.clone(),
                basis: commit.op.basis().clone(),
                position: commit.position,
                sequence: commit.sequence,
                rebased: commit.rebased,
            }),
        );

        let fan_out = dispatcher::fan_out(&mut self.registry, &commit.op, commit.position);
        if let Some((connection, sub_id)) = fan_out.acked {
            publish_ack(&self.event_publisher, &self.model, connection, &sub_id, &commit.op.id);
        }
    }

    /// Make the model unusable, and tell every subscription why.
    fn fault(&mut self, error: EngineError) {
        let cause = error.to_string();
        log::warn!("model {} faulted: {}", self.model, cause);
        Event::publish(
            &self.event_publisher,
            Event::ModelFault(ModelFaultEvent {
                timestamp: SystemTime::now(),
                model: self.model.clone(),
                cause: cause.clone(),
            }),
        );

        let message = model_unavailable(&cause);
        for registered in self.registry.iter_mut() {
            registered.outbox.push_error(message.clone());
        }
        self.engine = None;
        self.fault = Some(cause);
    }

    fn publish_unsubscribe(&self, connection: ConnectionID, sub_id: SubID) {
        Event::publish(
            &self.event_publisher,
            Event::Unsubscribe(UnsubscribeEvent {
                timestamp: SystemTime::now(),
                model: self.model.clone(),
                connection,
                sub_id,
            }),
        );
    }
}

fn model_unavailable(cause: &str) -> String {
    format!("{}: {}", error_messages::MODEL_UNAVAILABLE, cause)
}

fn publish_ack(
    event_publisher: &Option<Sender<Event>>,
    model: &ModelID,
    connection: ConnectionID,
    sub_id: &SubID,
    op: &OpID,
) {
    Event::publish(
        event_publisher,
        Event::Ack(AckEvent {
            timestamp: SystemTime::now(),
            model: model.clone(),
            connection,
            sub_id: sub_id.clone(),
            op: op.clone(),
        }),
    );
}

fn publish_drop_duplicate(event_publisher: &Option<Sender<Event>>, model: &ModelID, op: &OpID) {
    Event::publish(
        event_publisher,
        Event::DropDuplicate(DropDuplicateEvent {
            timestamp: SystemTime::now(),
            model: model.clone(),
            op: op.clone(),
        }),
    );
}

/// Warn about raw operations that were journaled but never reached the log, e.g., because the
/// process stopped between the two writes. They are not replayed: without the subscription that
/// submitted them, the frame they were produced in is unknown.
fn warn_about_orphans<C: Clone, L: LogStore<C>, J: Journal<C>>(log: &OperationLog<C, L>, journal: &J) {
    let raw = match journal.read_from(log.model(), &OpID::none()) {
        Ok(raw) => raw,
        Err(error) => {
            log::warn!("cannot read journal of model {}: {}", log.model(), error);
            return;
        }
    };

    let mut seen = HashSet::new();
    for op in raw.iter().filter(|op| !log.contains(&op.id)) {
        if seen.insert(&op.id) {
            log::warn!(
                "model {} has journaled operation {} that is not in its log",
                log.model(),
                op.id
            );
        }
    }
}
