//! Subscriptions: per-(connection, model) delivery cursors, and the registry that holds them.
//!
//! A [`Subscription`](subscription::Subscription) is created when a client sends a Subscribe, and
//! lives until the client sends an Unsubscribe or its connection closes. Every subscription is owned
//! by exactly one connection and belongs to exactly one model; its state is only ever touched by that
//! model's actor.
//!
//! The subscription is where causal validation happens, in both directions:
//! - Client → server: [`validate_append`](subscription::Subscription::validate_append) decides whether
//!   an incoming operation was produced against a state the client could actually have had.
//! - Server → client: the delivery gate, [`accept`](subscription::Subscription::accept), only lets a
//!   log entry through if it extends the subscription's cursor exactly.

pub mod registry;

#[allow(clippy::module_inception)]
pub mod subscription;

pub use registry::{RegisteredSubscription, RegistryError, SubscriptionRegistry};
pub use subscription::{
    AppendRejection, Delivery, GateRejection, Subscription, SubscriptionState, TransitionError,
};
