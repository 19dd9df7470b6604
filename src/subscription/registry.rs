//! The per-model registry of subscriptions.

use thiserror::Error;

use crate::{
    dispatcher::{Outbox, SubscriptionSender},
    types::data_types::{ConnectionID, SubID},
};

use super::subscription::Subscription;

/// A subscription together with its dispatch state.
pub struct RegisteredSubscription<C> {
    pub subscription: Subscription<C>,
    pub outbox: Outbox<C>,
    pub sender: SubscriptionSender<C>,
}

/// All subscriptions of a single model, keyed by `(ConnectionID, SubID)`, in creation order.
///
/// Each registry is owned by its model's actor; no registry is shared between models.
pub struct SubscriptionRegistry<C> {
    subscriptions: Vec<RegisteredSubscription<C>>,
}

impl<C: Clone> SubscriptionRegistry<C> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn contains(&self, connection: ConnectionID, sub_id: &SubID) -> bool {
        self.index_of(connection, sub_id).is_some()
    }

    /// Register `subscription`, which sends its messages through `sender`.
    pub fn insert(
        &mut self,
        subscription: Subscription<C>,
        sender: SubscriptionSender<C>,
    ) -> Result<&mut RegisteredSubscription<C>, RegistryError> {
        if self.contains(subscription.connection(), subscription.sub_id()) {
            return Err(RegistryError::AlreadyExists {
                connection: subscription.connection(),
                sub_id: subscription.sub_id().clone(),
            });
        }

        let outbox = Outbox::new(subscription.sub_id().clone(), subscription.model().clone());
        self.subscriptions.push(RegisteredSubscription {
            subscription,
            outbox,
            sender,
        });
        let last = self.subscriptions.len() - 1;
        Ok(&mut self.subscriptions[last])
    }

    pub fn get(&self, connection: ConnectionID, sub_id: &SubID) -> Option<&RegisteredSubscription<C>> {
        self.index_of(connection, sub_id)
            .map(|index| &self.subscriptions[index])
    }

    pub fn get_mut(
        &mut self,
        connection: ConnectionID,
        sub_id: &SubID,
    ) -> Option<&mut RegisteredSubscription<C>> {
        self.index_of(connection, sub_id)
            .map(|index| &mut self.subscriptions[index])
    }

    /// Remove a subscription and close it. Nothing queued for it is delivered afterwards.
    pub fn remove(
        &mut self,
        connection: ConnectionID,
        sub_id: &SubID,
    ) -> Option<RegisteredSubscription<C>> {
        let index = self.index_of(connection, sub_id)?;
        let mut removed = self.subscriptions.remove(index);
        Self::close(&mut removed);
        Some(removed)
    }

    /// Remove and close every subscription of `connection`.
    pub fn remove_connection(&mut self, connection: ConnectionID) -> Vec<RegisteredSubscription<C>> {
        let (mut removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .partition(|registered| registered.subscription.connection() == connection);
        self.subscriptions = kept;
        removed.iter_mut().for_each(Self::close);
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSubscription<C>> {
        self.subscriptions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredSubscription<C>> {
        self.subscriptions.iter_mut()
    }

    fn index_of(&self, connection: ConnectionID, sub_id: &SubID) -> Option<usize> {
        self.subscriptions.iter().position(|registered| {
            registered.subscription.connection() == connection
                && registered.subscription.sub_id() == sub_id
        })
    }

    fn close(registered: &mut RegisteredSubscription<C>) {
        registered.subscription.close();
        registered.sender.close();
    }
}

impl<C: Clone> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {connection} already has subscription {sub_id}")]
    AlreadyExists {
        connection: ConnectionID,
        sub_id: SubID,
    },
}
