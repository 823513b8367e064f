use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use bookclub_types::events::GatewayEvent;

/// Tracks which users currently hold a live connection and relays targeted
/// events to them. At most one connection is tracked per user; a newer
/// connection replaces the older association.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Per-user targeted send channels: user_id -> (socket_id, sender)
    connections: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection for a user. Returns the generated socket id and
    /// the receiving end of the user's event channel. Replaces any previous
    /// connection for the same user.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let socket_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(user_id, (socket_id, tx));
        (socket_id, rx)
    }

    /// Unregister a connection, but only if socket_id still owns the slot.
    /// A disconnect racing a reconnect must not clobber the newer connection.
    pub async fn unregister(&self, user_id: Uuid, socket_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some((current, _)) = connections.get(&user_id) {
            if *current == socket_id {
                connections.remove(&user_id);
            }
        }
    }

    /// Deliver an event to the user's current connection, if any.
    /// Returns whether a connection was found; an absent receiver means the
    /// event is silently dropped (no store-and-forward).
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookclub_types::models::ChatMessage;

    fn message(sender: Uuid, receiver: Uuid, text: &str) -> GatewayEvent {
        GatewayEvent::PrivateMessageReceived {
            message: ChatMessage {
                sender,
                receiver,
                text: text.into(),
            },
        }
    }

    #[tokio::test]
    async fn delivers_only_to_the_receiver() {
        let dispatcher = Dispatcher::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let bystander = Uuid::new_v4();

        let (_, mut receiver_rx) = dispatcher.register(receiver).await;
        let (_, mut bystander_rx) = dispatcher.register(bystander).await;

        assert!(dispatcher.send_to_user(receiver, message(sender, receiver, "hi")).await);

        let delivered = receiver_rx.recv().await.unwrap();
        let GatewayEvent::PrivateMessageReceived { message } = delivered else {
            panic!("unexpected event");
        };
        assert_eq!(message.text, "hi");
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_receiver_drops_silently() {
        let dispatcher = Dispatcher::new();
        let sender = Uuid::new_v4();
        let offline = Uuid::new_v4();

        assert!(!dispatcher.send_to_user(offline, message(sender, offline, "lost")).await);
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_clobber_reconnect() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_socket, _old_rx) = dispatcher.register(user).await;
        let (_new_socket, mut new_rx) = dispatcher.register(user).await;

        // The old connection's cleanup arrives after the reconnect
        dispatcher.unregister(user, old_socket).await;

        assert!(dispatcher.is_online(user).await);
        assert!(dispatcher.send_to_user(user, message(user, user, "still here")).await);
        assert!(new_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unregister_removes_the_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (socket_id, _rx) = dispatcher.register(user).await;
        dispatcher.unregister(user, socket_id).await;

        assert!(!dispatcher.is_online(user).await);
        assert!(!dispatcher.send_to_user(user, message(user, user, "gone")).await);
    }
}
