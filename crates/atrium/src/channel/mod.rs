//! Project-scoped messaging channel.
//!
//! The transport itself is opaque: anything implementing
//! [`ChannelTransport`] can carry traffic (the in-process [`ChannelHub`] is
//! provided; a websocket transport would slot in behind the same trait).
//! Delivery is fire-and-forget with no acknowledgment; per-sender FIFO is
//! assumed from the transport, with no ordering guarantee across senders.
//!
//! Subscriptions are scoped: a [`Subscription`] owns its registration and
//! releases it when dropped, so tearing down and re-opening a session can
//! never accumulate duplicate handlers.

mod hub;

pub use hub::ChannelHub;

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use atrium_protocol::ProjectMessage;

use crate::error::TransportError;

/// Identity of one subscription endpoint on a transport.
pub type SubscriberId = Uuid;

/// Opaque message transport scoped by project.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Deliver `message` to every subscription on `project_id` except those
    /// owned by the sender (`origin`). Fire-and-forget.
    async fn send(
        &self,
        project_id: &str,
        origin: SubscriberId,
        message: ProjectMessage,
    ) -> Result<(), TransportError>;

    /// Register a subscription owned by `owner`. Returns the assigned
    /// subscription id and the receiving end.
    fn subscribe(
        &self,
        project_id: &str,
        owner: SubscriberId,
    ) -> (SubscriberId, mpsc::Receiver<ProjectMessage>);

    /// Release a previously-registered subscription.
    fn unsubscribe(&self, project_id: &str, subscription: SubscriberId);
}

/// A logical channel scoped to one project, held by one workspace instance.
#[derive(Clone)]
pub struct ProjectChannel {
    transport: Arc<dyn ChannelTransport>,
    project_id: String,
    origin: SubscriberId,
}

impl ProjectChannel {
    /// Establish a channel for `project_id` over `transport`.
    pub fn connect(transport: Arc<dyn ChannelTransport>, project_id: impl Into<String>) -> Self {
        Self {
            transport,
            project_id: project_id.into(),
            origin: Uuid::new_v4(),
        }
    }

    /// The project this channel is scoped to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Emit a message to all other participants.
    pub async fn send(&self, message: ProjectMessage) -> Result<(), TransportError> {
        self.transport
            .send(&self.project_id, self.origin, message)
            .await
    }

    /// Register a scoped subscription for this channel's project.
    ///
    /// Messages sent through this same channel instance are not delivered
    /// back to its own subscriptions.
    pub fn subscribe(&self) -> Subscription {
        let (id, rx) = self.transport.subscribe(&self.project_id, self.origin);
        debug!(
            "subscription {} registered on project channel {}",
            id, self.project_id
        );
        Subscription {
            transport: Arc::clone(&self.transport),
            project_id: self.project_id.clone(),
            id,
            rx,
            released: false,
        }
    }
}

/// A scoped subscription handle.
///
/// Holds the registration for its lifetime; dropping (or [`close`]-ing) it
/// releases the registration on the transport.
///
/// [`close`]: Subscription::close
pub struct Subscription {
    transport: Arc<dyn ChannelTransport>,
    project_id: String,
    id: SubscriberId,
    rx: mpsc::Receiver<ProjectMessage>,
    released: bool,
}

impl Subscription {
    /// Receive the next message, in delivery order.
    ///
    /// Returns `None` once the subscription is released or the transport is
    /// gone.
    pub async fn recv(&mut self) -> Option<ProjectMessage> {
        self.rx.recv().await
    }

    /// Release the registration ahead of drop.
    pub fn close(&mut self) {
        if !self.released {
            self.released = true;
            self.rx.close();
            self.transport.unsubscribe(&self.project_id, self.id);
            debug!(
                "released subscription {} on project channel {}",
                self.id, self.project_id
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
