/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A log service that keeps collaboratively edited models consistent using operational
//! transformation.
//!
//! Many clients edit the same model at once. Each client applies its own edits locally right away,
//! and sends them to the log service as [operations](types::operation::Operation). The log service
//! linearizes the operations of all clients into a single [operation log](operation_log) per model,
//! transforming operations that were produced concurrently, and sends every client exactly the
//! operations it needs to converge to the same state as everyone else.
//!
//! The main components are:
//! - [Transform Primitive](transform): the pluggable, payload-specific transform and compose
//!   functions.
//! - [Operation Log](operation_log): the per-model version chain of transformed operations, and the
//!   pluggable persistence beneath it.
//! - [Reconciliation Engine](engine): rebases incoming client operations and appends them to the log.
//! - [Subscription Registry](subscription): the per-(connection, model) cursors that validate what
//!   each client sends and receives.
//! - [Notification Dispatcher](dispatcher): fans out each committed operation to every subscription
//!   of its model.
//! - [Server](server): one actor thread per model, and the routing of [connections](connection)
//!   to them.
//!
//! Messages are exchanged as [JSON](messages), one message per websocket frame. The websocket itself
//! is the library user's concern.

pub mod connection;

pub mod dispatcher;

pub mod engine;

pub(crate) mod event_bus;

pub mod events;

pub(crate) mod logging;

pub mod messages;

pub(crate) mod model;

pub mod operation_log;

pub mod server;

pub mod subscription;

pub mod transform;

pub mod types;
