/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a log service.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the server](ServerSpec) with:
//!   1. `ServerSpec::builder` to construct a `ServerSpecBuilder`,
//!   2. The setters of the `ServerSpecBuilder`, and
//!   3. The `ServerSpecBuilder::build` method to construct a [ServerSpec],
//! - The function to [start](ServerSpec::start) a [Server] given its specification,
//! - [The type](Server) which keeps the server alive, and which
//!   [registers client connections](Server::connect).
//!
//! ## Models and actors
//!
//! Every model that a client subscribes to gets its own actor thread, started the first time any
//! connection refers to the model. The actor loads the model's log from the [`LogStore`], and from
//! then on is the only thread that reads or writes it. Connections find a model's actor through a
//! shared routing table; the table only maps ModelIDs to actor mailboxes and is never held while a
//! model does any work.
//!
//! ## Starting a server
//!
//! Here is an example that demonstrates how to build and start running a server using the builder
//! pattern:
//!
//! ```ignore
//! let server =
//!     ServerSpec::builder()
//!     .transform(transform)
//!     .log_store(log_store)
//!     .journal(journal)
//!     .configuration(configuration)
//!     .on_commit_operation(commit_handler)
//!     .build()
//!     .start();
//!
//! let mut connection = server.connect(socket_writer);
//! connection.handle_text(r#"{"Subscribe":"s1","ModelID":"doc"}"#);
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a server:
//! - `.transform(...)`
//! - `.log_store(...)`
//! - `.journal(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! - `.compaction(...)`, to choose how Bootstraps are [compacted](crate::transform::compaction).
//!   Defaults to [`NoCompaction`].
//!
//! The remaining optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_commit_operation(...)`
//! - `.on_reject_operation(...)`
//! - `.on_drop_duplicate(...)`
//! - `.on_subscribe(...)`
//! - `.on_bootstrap(...)`
//! - `.on_unsubscribe(...)`
//! - `.on_ack(...)`
//! - `.on_model_fault(...)`
//!
//! The server's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .log_events(true)
//!     .idle_poll_interval(Duration::from_millis(20))
//!     .build()
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::connection::{Connection, ConnectionHandle};
use crate::event_bus::*;
use crate::events::*;
use crate::model::{ModelActor, ModelCommand, ModelContext, ModelHandle};
use crate::operation_log::{Journal, LogStore, StoreError};
use crate::transform::{Compaction, NoCompaction, Transform};
use crate::types::data_types::{ConnectionID, ModelID, OpID};
use crate::types::operation::Operation;

/// Stores the user-defined parameters required to start the server, that is:
/// 1. The "Log Events" flag, if set to "true" then logs should be printed.
/// 2. The idle poll interval: how long an idle thread of the server (a model actor, a connection's
///    writer, or the event bus) waits for work before it checks whether it should shut down.
///
/// ## Log Events
///
/// The log service logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.log_events(...)`

    Optional:
    - `.idle_poll_interval(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
    #[builder(
        default = Duration::from_millis(50),
        setter(doc = "Set how long idle threads wait for work before checking for shutdown. Optional, defaults to 50ms.")
    )]
    pub idle_poll_interval: Duration,
}

/// Stores all necessary parameters and trait implementations required to run the [Server].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ServerSpec]. On the builder call the following methods to construct a valid [ServerSpec].

    Required:
    - `.transform(...)`
    - `.log_store(...)`
    - `.journal(...)`
    - `.configuration(...)`

    Optional:
    - `.compaction(...)`
    - `.on_commit_operation(...)`
    - `.on_reject_operation(...)`
    - `.on_drop_duplicate(...)`
    - `.on_subscribe(...)`
    - `.on_bootstrap(...)`
    - `.on_unsubscribe(...)`
    - `.on_ack(...)`
    - `.on_model_fault(...)`
"))]
pub struct ServerSpec<T: Transform, L: LogStore<T::Change>, J: Journal<T::Change>> {
    // Required parameters
    #[builder(setter(doc = "Set the Transform Primitive of the operations' payloads. The argument must implement the [Transform](crate::transform::Transform) trait. Required."))]
    transform: T,
    #[builder(setter(doc = "Set the storage of the models' operation logs. The argument must implement the [LogStore](crate::operation_log::LogStore) trait. Required."))]
    log_store: L,
    #[builder(setter(doc = "Set the storage of raw client operations. The argument must implement the [Journal](crate::operation_log::Journal) trait. Required."))]
    journal: J,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a server. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default = Arc::new(NoCompaction) as Arc<dyn Compaction<T>>, setter(transform = |compaction: impl Compaction<T>| Arc::new(compaction) as Arc<dyn Compaction<T>>,
    doc = "Set the strategy used to compact the operations sent in Bootstraps. Optional, defaults to [NoCompaction]."))]
    compaction: Arc<dyn Compaction<T>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitOperationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitOperationEvent>),
    doc = "Register a handler closure to be invoked after a client operation is appended to its model's log. Optional."))]
    on_commit_operation: Option<HandlerPtr<CommitOperationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectOperationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectOperationEvent>),
    doc = "Register a handler closure to be invoked after a client operation fails validation and is ignored. Optional."))]
    on_reject_operation: Option<HandlerPtr<RejectOperationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DropDuplicateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DropDuplicateEvent>),
    doc = "Register a handler closure to be invoked after a client operation with an already known ID is ignored. Optional."))]
    on_drop_duplicate: Option<HandlerPtr<DropDuplicateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubscribeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SubscribeEvent>),
    doc = "Register a handler closure to be invoked after a model accepts a Subscribe. Optional."))]
    on_subscribe: Option<HandlerPtr<SubscribeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BootstrapEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BootstrapEvent>),
    doc = "Register a handler closure to be invoked after a Bootstrap is produced for a subscription. Optional."))]
    on_bootstrap: Option<HandlerPtr<BootstrapEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UnsubscribeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UnsubscribeEvent>),
    doc = "Register a handler closure to be invoked after a subscription is removed. Optional."))]
    on_unsubscribe: Option<HandlerPtr<UnsubscribeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AckEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AckEvent>),
    doc = "Register a handler closure to be invoked after an ack is dispatched to a subscription. Optional."))]
    on_ack: Option<HandlerPtr<AckEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ModelFaultEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ModelFaultEvent>),
    doc = "Register a handler closure to be invoked after a model faults. Optional."))]
    on_model_fault: Option<HandlerPtr<ModelFaultEvent>>,
}

impl<T, L, J> ServerSpec<T, L, J>
where
    T: Transform,
    L: LogStore<T::Change>,
    J: Journal<T::Change>,
{
    /// Starts the event bus, and returns a [Server] that starts model actors as connections need them.
    pub fn start(self) -> Server<T::Change, L> {
        let idle_poll_interval = self.configuration.idle_poll_interval;

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_commit_operation,
            self.on_reject_operation,
            self.on_drop_duplicate,
            self.on_subscribe,
            self.on_bootstrap,
            self.on_unsubscribe,
            self.on_ack,
            self.on_model_fault,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                    idle_poll_interval,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        let context = ModelContext {
            transform: self.transform,
            log_store: self.log_store.clone(),
            journal: self.journal,
            compaction: self.compaction,
            idle_poll_interval,
            event_publisher,
        };
        let router = Router {
            models: HashMap::new(),
            spawn: Box::new(move |model: &ModelID| ModelActor::start(model.clone(), context.clone())),
            open: true,
        };

        Server {
            log_store: self.log_store,
            router: Arc::new(Mutex::new(router)),
            next_connection: AtomicU64::new(0),
            idle_poll_interval,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// Maps each ModelID to the mailbox of the model's actor, starting actors on first use.
pub(crate) struct Router<C> {
    models: HashMap<ModelID, ModelHandle<C>>,
    spawn: Box<dyn Fn(&ModelID) -> ModelHandle<C> + Send>,
    open: bool,
}

impl<C> Router<C> {
    /// Get the mailbox of `model`'s actor, or `None` if the server is shutting down.
    pub(crate) fn commands(&mut self, model: &ModelID) -> Option<Sender<ModelCommand<C>>> {
        if !self.open {
            return None;
        }
        if !self.models.contains_key(model) {
            let handle = (self.spawn)(model);
            self.models.insert(model.clone(), handle);
        }
        self.models.get(model).map(ModelHandle::commands)
    }

    fn shutdown(&mut self) {
        self.open = false;
        for (_, handle) in self.models.drain() {
            handle.shutdown();
        }
    }
}

/// A handle to the background threads of a log service. When this value is dropped, all model actors
/// and the event bus are gracefully shut down.
pub struct Server<C, L: LogStore<C>> {
    log_store: L,
    router: Arc<Mutex<Router<C>>>,
    next_connection: AtomicU64,
    idle_poll_interval: Duration,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<C, L> Server<C, L>
where
    C: Clone + serde::de::DeserializeOwned + Send + 'static,
    L: LogStore<C>,
{
    /// Register a client connection. Messages the server produces for the client are sent through
    /// `connection`; messages received from the client must be fed to the returned handle.
    pub fn connect<N: Connection<C>>(&self, connection: N) -> ConnectionHandle<C> {
        let id = ConnectionID::new(self.next_connection.fetch_add(1, Ordering::Relaxed));
        ConnectionHandle::new(id, self.router.clone(), connection, self.idle_poll_interval)
    }

    /// Read the committed log of `model` from the [`LogStore`].
    pub fn log(&self, model: &ModelID) -> Result<Vec<Operation<C>>, StoreError> {
        self.log_store.read_from(model, &OpID::none())
    }
}

impl<C, L: LogStore<C>> Drop for Server<C, L> {
    fn drop(&mut self) {
        // Model actors publish events, so they are stopped before the event bus.
        match self.router.lock() {
            Ok(mut router) => router.shutdown(),
            Err(poisoned) => poisoned.into_inner().shutdown(),
        }

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| {
                let _ = shutdown.send(());
            });
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("event bus thread panicked");
            }
        }
    }
}
