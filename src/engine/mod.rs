//! The reconciliation engine, which linearizes concurrent client operations into a model's log.
//!
//! # Committing a client operation
//!
//! A client produces each operation against the last log entry it had incorporated, its BasisID. By
//! the time the operation reaches the model's actor, the log may have grown past that entry. The
//! engine deals with this the way a Jupiter-style OT server does:
//!
//! 1. The issuing [subscription](crate::subscription) remembers, in its client's frame, every other
//!    client's entry it has delivered since the client's last known basis ("unseen deliveries").
//! 2. Deliveries at or before the operation's BasisID are forgotten: the client has seen them.
//! 3. The operation is transformed past each remaining delivery in turn, and each delivery is
//!    replaced by its counterpart transformed past the operation. The client performs the same
//!    transformations on its side when those deliveries reach it, so both sides agree on the result.
//! 4. The result is appended to the log with the client's ID and Parents `[tail, client ParentID]`.
//!    If nothing had to be transformed the operation is appended verbatim.
//!
//! A rebased operation is **not** given a new ID: it keeps the one its client assigned, and only its
//! Parents and Payload change. The ack a client receives is therefore the ID it sent, and an
//! operation resubmitted after a reconnect is recognized as a duplicate by that same ID.
//!
//! Operations that race against the same basis are committed in the order in which the
//! [`Journal`](crate::operation_log::Journal) persists them, since the journal is written first and
//! the actor handles one request at a time. The first is appended verbatim, the second transformed
//! against it.
//!
//! # Catching up
//!
//! A client that subscribes while still holding operations it never saw acknowledged is brought up to
//! date with [`Engine::catch_up`], which separates the operations that did make it into the log from
//! those that did not, and rebases the latter onto the tail. The other entries are sent to the client
//! as they are in the log; the client transforms them past its in-flight operations, including any it
//! made after it subscribed, just as it does with every other delivery.

pub mod reconciliation;

pub use reconciliation::{
    AppendOutcome, CatchUp, CatchUpStep, Commit, Engine, EngineError, RebasedClientOp,
};
