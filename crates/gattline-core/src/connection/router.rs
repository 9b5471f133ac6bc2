// ── Notification routing ──
//
// Maps identity keys to subscriber channels. Change events never touch
// the command queue: they are looked up here and forwarded, or dropped.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::command::{CallerTag, Command};
use crate::model::IdentityKey;

/// One change event delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub collection: Uuid,
    pub item: Uuid,
    pub tag: Option<CallerTag>,
    pub payload: Bytes,
}

pub(crate) type Subscriber = mpsc::UnboundedSender<Notification>;

/// Notifications for one subscription.
///
/// Ends (`recv` returns `None`) when the subscription is disabled or the
/// connection drops to idle.
#[derive(Debug)]
pub struct NotificationStream {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl NotificationStream {
    pub(crate) fn channel() -> (Subscriber, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl Stream for NotificationStream {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ── Router ──────────────────────────────────────────────────────────

struct Subscription {
    command: Command,
    sender: Subscriber,
    /// Cleared when a disable is queued; events stop flowing immediately.
    active: bool,
}

#[derive(Default)]
pub(crate) struct NotificationRouter {
    subscriptions: HashMap<IdentityKey, Subscription>,
}

impl NotificationRouter {
    /// Register `sender` for `key`, replacing any earlier subscriber.
    pub fn insert(&mut self, key: IdentityKey, command: Command, sender: Subscriber) {
        debug!(%key, "subscription added");
        self.subscriptions.insert(
            key,
            Subscription {
                command,
                sender,
                active: true,
            },
        );
    }

    fn matching(&self, collection: Uuid, item: Uuid, instance: Option<u16>) -> Option<IdentityKey> {
        self.subscriptions
            .keys()
            .filter(|k| k.collection == collection && k.item == item)
            .filter(|k| instance.is_none_or(|i| k.instance == i))
            .min()
            .copied()
    }

    /// Stop delivering for the matching subscription without removing it.
    pub fn suspend(&mut self, collection: Uuid, item: Uuid, instance: Option<u16>) {
        if let Some(key) = self.matching(collection, item, instance) {
            if let Some(sub) = self.subscriptions.get_mut(&key) {
                sub.active = false;
            }
        }
    }

    /// Remove the matching subscription, returning its key.
    pub fn remove(&mut self, collection: Uuid, item: Uuid, instance: Option<u16>) -> Option<IdentityKey> {
        let key = self.matching(collection, item, instance)?;
        self.subscriptions.remove(&key);
        debug!(%key, "subscription removed");
        Some(key)
    }

    /// Forward a change event. Returns whether a subscriber received it.
    pub fn route(&mut self, key: &IdentityKey, payload: Bytes) -> bool {
        let Some(sub) = self.subscriptions.get(key) else {
            trace!(%key, "change event without subscriber dropped");
            return false;
        };
        if !sub.active {
            trace!(%key, "change event for closing subscription dropped");
            return false;
        }

        let notification = Notification {
            collection: sub.command.collection(),
            item: sub.command.item(),
            tag: sub.command.tag(),
            payload,
        };
        if sub.sender.send(notification).is_err() {
            debug!(%key, "subscriber gone, subscription dropped");
            self.subscriptions.remove(key);
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drop every subscription; their streams end.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::uuid_from_short;
    use pretty_assertions::assert_eq;

    const COLLECTION: u16 = 0x180d;
    const ITEM: u16 = 0x2a37;

    fn key(instance: u16) -> IdentityKey {
        IdentityKey::new(uuid_from_short(COLLECTION), uuid_from_short(ITEM), instance)
    }

    fn subscribe(router: &mut NotificationRouter, instance: u16, tag: u64) -> NotificationStream {
        let (tx, stream) = NotificationStream::channel();
        let cmd = Command::enable_notify(uuid_from_short(COLLECTION), uuid_from_short(ITEM))
            .with_tag(tag);
        router.insert(key(instance), cmd, tx);
        stream
    }

    #[test]
    fn routes_payload_with_tag() {
        let mut router = NotificationRouter::default();
        let mut stream = subscribe(&mut router, 0, 42);

        assert!(router.route(&key(0), Bytes::from_static(&[0x06, 0x48])));
        assert_eq!(
            stream.try_recv().unwrap(),
            Notification {
                collection: uuid_from_short(COLLECTION),
                item: uuid_from_short(ITEM),
                tag: Some(42),
                payload: Bytes::from_static(&[0x06, 0x48]),
            }
        );
    }

    #[test]
    fn instances_are_kept_apart() {
        let mut router = NotificationRouter::default();
        let mut first = subscribe(&mut router, 0, 1);
        let mut second = subscribe(&mut router, 1, 2);

        router.route(&key(1), Bytes::from_static(b"b"));
        assert!(first.try_recv().is_none());
        assert_eq!(second.try_recv().unwrap().tag, Some(2));
    }

    #[test]
    fn unknown_key_is_dropped() {
        let mut router = NotificationRouter::default();
        assert!(!router.route(&key(0), Bytes::from_static(b"x")));
    }

    #[test]
    fn suspended_subscription_drops_events() {
        let mut router = NotificationRouter::default();
        let mut stream = subscribe(&mut router, 0, 1);
        router.suspend(uuid_from_short(COLLECTION), uuid_from_short(ITEM), None);

        assert!(!router.route(&key(0), Bytes::from_static(b"x")));
        assert!(stream.try_recv().is_none());
        // Still registered, only muted.
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn remove_returns_key_once() {
        let mut router = NotificationRouter::default();
        let _stream = subscribe(&mut router, 3, 1);

        let removed = router.remove(uuid_from_short(COLLECTION), uuid_from_short(ITEM), None);
        assert_eq!(removed, Some(key(3)));
        assert_eq!(
            router.remove(uuid_from_short(COLLECTION), uuid_from_short(ITEM), None),
            None
        );
    }

    #[tokio::test]
    async fn dropped_receiver_prunes_subscription() {
        let mut router = NotificationRouter::default();
        drop(subscribe(&mut router, 0, 1));

        assert!(!router.route(&key(0), Bytes::from_static(b"x")));
        assert_eq!(router.len(), 0);
    }

    #[tokio::test]
    async fn clear_ends_streams() {
        let mut router = NotificationRouter::default();
        let mut stream = subscribe(&mut router, 0, 1);
        router.clear();
        assert!(stream.recv().await.is_none());
    }
}
