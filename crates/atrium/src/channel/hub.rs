//! In-process channel transport.

use async_trait::async_trait;
use dashmap::DashMap;
use log::warn;
use tokio::sync::mpsc;

use atrium_protocol::ProjectMessage;

use super::{ChannelTransport, SubscriberId};
use crate::error::TransportError;

/// Size of the per-subscription message buffer.
const MESSAGE_BUFFER_SIZE: usize = 64;

/// In-process transport connecting every workspace in one process.
///
/// Keeps one room per project id, each holding the registered subscription
/// senders. Delivery awaits each subscriber's buffer, preserving per-sender
/// FIFO per subscription.
#[derive(Default)]
pub struct ChannelHub {
    rooms: DashMap<String, Vec<Registration>>,
}

struct Registration {
    owner: SubscriberId,
    id: SubscriberId,
    tx: mpsc::Sender<ProjectMessage>,
}

impl ChannelHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a project (for diagnostics).
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.rooms
            .get(project_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChannelTransport for ChannelHub {
    async fn send(
        &self,
        project_id: &str,
        origin: SubscriberId,
        message: ProjectMessage,
    ) -> Result<(), TransportError> {
        // Snapshot the targets so no dashmap guard is held across awaits.
        let targets: Vec<mpsc::Sender<ProjectMessage>> = self
            .rooms
            .get(project_id)
            .map(|subs| {
                subs.iter()
                    .filter(|reg| reg.owner != origin)
                    .map(|reg| reg.tx.clone())
                    .collect()
            })
            .unwrap_or_default();

        for tx in targets {
            if tx.send(message.clone()).await.is_err() {
                warn!("dropping message for a closed subscription on {project_id}");
            }
        }
        Ok(())
    }

    fn subscribe(
        &self,
        project_id: &str,
        owner: SubscriberId,
    ) -> (SubscriberId, mpsc::Receiver<ProjectMessage>) {
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER_SIZE);
        let id = SubscriberId::new_v4();
        self.rooms
            .entry(project_id.to_string())
            .or_default()
            .push(Registration { owner, id, tx });
        (id, rx)
    }

    fn unsubscribe(&self, project_id: &str, subscription: SubscriberId) {
        let now_empty = match self.rooms.get_mut(project_id) {
            Some(mut subs) => {
                subs.retain(|reg| reg.id != subscription);
                subs.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.rooms
                .remove_if(project_id, |_, subs| subs.is_empty());
        }
    }
}
