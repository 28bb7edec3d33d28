// Read receipt flow tests
//
// Runs the services against the in-memory store:
// 1. Mark-read idempotence and monotonicity
// 2. Unseen counts and the global badge
// 3. Live badge and seen-by observers

use read_receipt_service::error::AppError;
use read_receipt_service::models::UserProfile;
use read_receipt_service::services::conversation_service::ConversationService;
use read_receipt_service::services::live::{self, BadgeSnapshot, SeenBySnapshot};
use read_receipt_service::services::message_service::MessageService;
use read_receipt_service::services::read_service::{MarkReadOutcome, ReadService};
use read_receipt_service::store::{MemoryReceiptStore, ReceiptStore};
use read_receipt_service::websocket::{ConnectionRegistry, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryReceiptStore>,
    registry: ConnectionRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryReceiptStore::new()),
            registry: ConnectionRegistry::new(),
        }
    }

    fn dyn_store(&self) -> Arc<dyn ReceiptStore> {
        self.store.clone()
    }

    async fn user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .upsert_user(UserProfile {
                id,
                username: name.to_string(),
                image_url: None,
            })
            .await
            .unwrap();
        id
    }

    async fn conversation(&self, creator: Uuid, others: &[Uuid]) -> Uuid {
        let name = (others.len() > 1).then(|| "group".to_string());
        ConversationService::create(
            self.store.as_ref(),
            &self.registry,
            creator,
            name,
            others.to_vec(),
        )
        .await
        .unwrap()
        .id
    }

    async fn send(&self, sender: Uuid, conversation_id: Uuid) -> Uuid {
        MessageService::send(
            self.store.as_ref(),
            &self.registry,
            sender,
            conversation_id,
            "hello".into(),
        )
        .await
        .unwrap()
        .id
    }

    async fn mark_read(&self, user: Uuid, conversation_id: Uuid, message_id: Uuid) -> MarkReadOutcome {
        ReadService::mark_read(
            self.store.as_ref(),
            &self.registry,
            user,
            conversation_id,
            message_id,
        )
        .await
        .unwrap()
    }

    async fn unseen(&self, user: Uuid, conversation_id: Uuid) -> u64 {
        ConversationService::list(self.store.as_ref(), user)
            .await
            .unwrap()
            .conversations
            .into_iter()
            .find(|s| s.conversation.id == conversation_id)
            .map(|s| s.unseen_count)
            .unwrap()
    }

    async fn last_seen(&self, user: Uuid, conversation_id: Uuid) -> Option<Uuid> {
        self.store
            .member(conversation_id, user)
            .await
            .unwrap()
            .unwrap()
            .last_seen_message_id()
    }
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, mut done: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if done(&current) {
                    return current.clone();
                }
            }
            rx.changed().await.expect("observer stopped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

#[tokio::test]
async fn test_mark_newest_clears_unseen() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let c = h.conversation(alice, &[bob]).await;

    h.send(alice, c).await;
    let newest = h.send(alice, c).await;
    assert_eq!(h.unseen(bob, c).await, 2);

    assert_eq!(h.mark_read(bob, c, newest).await, MarkReadOutcome::Advanced);
    assert_eq!(h.unseen(bob, c).await, 0);
}

#[tokio::test]
async fn test_repeated_mark_read_is_a_noop() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let c = h.conversation(alice, &[bob]).await;
    let m = h.send(alice, c).await;

    h.mark_read(bob, c, m).await;
    let before = h.last_seen(bob, c).await;
    assert_eq!(h.mark_read(bob, c, m).await, MarkReadOutcome::Unchanged);
    assert_eq!(h.last_seen(bob, c).await, before);
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let c = h.conversation(alice, &[bob]).await;
    let old = h.send(alice, c).await;
    let new = h.send(alice, c).await;

    // old then new
    h.mark_read(bob, c, old).await;
    h.mark_read(bob, c, new).await;
    assert_eq!(h.last_seen(bob, c).await, Some(new));

    // new then old
    h.mark_read(alice, c, new).await;
    assert_eq!(h.mark_read(alice, c, old).await, MarkReadOutcome::Unchanged);
    assert_eq!(h.last_seen(alice, c).await, Some(new));
}

#[tokio::test]
async fn test_unseen_counts_only_newer_messages_from_others() {
    let h = Harness::new();
    let me = h.user("Me").await;
    let other = h.user("Other").await;
    let c = h.conversation(me, &[other]).await;

    // oldest first: m0, m1 (watermark), m2 by other, m3 by me, m4 by other
    h.send(other, c).await;
    let m1 = h.send(other, c).await;
    h.send(other, c).await;
    h.send(me, c).await;
    h.send(other, c).await;

    h.mark_read(me, c, m1).await;
    assert_eq!(h.unseen(me, c).await, 2);
}

#[tokio::test]
async fn test_global_badge_sums_conversations() {
    let h = Harness::new();
    let me = h.user("Me").await;
    let a = h.user("Ann").await;
    let b = h.user("Ben").await;
    let c1 = h.conversation(me, &[a]).await;
    let c2 = h.conversation(me, &[b]).await;

    h.send(a, c1).await;
    h.send(b, c2).await;
    h.send(b, c2).await;

    let list = ConversationService::list(h.store.as_ref(), me).await.unwrap();
    assert_eq!(list.unseen_total, 3);
    // most recent activity first
    assert_eq!(list.conversations[0].conversation.id, c2);
}

#[tokio::test]
async fn test_seen_by_label_for_group() {
    let h = Harness::new();
    let me = h.user("Me").await;
    let ann = h.user("Ann Lee").await;
    let ben = h.user("Ben").await;
    let cat = h.user("Cat").await;
    let c = h.conversation(me, &[ann, ben, cat]).await;
    let m = h.send(me, c).await;

    for (reader, expected) in [
        (ann, "Seen by Ann"),
        (ben, "Seen by Ann and Ben"),
        (cat, "Seen by Ann, Ben, and 1 more"),
    ] {
        h.mark_read(reader, c, m).await;
        let feed = MessageService::feed(h.store.as_ref(), me, c, 50).await.unwrap();
        let seen_by = feed[0].seen_by.as_ref().unwrap();
        assert_eq!(seen_by.label, expected);
    }
}

#[tokio::test]
async fn test_live_badge_updates_without_polling() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let carol = h.user("Carol").await;
    let c1 = h.conversation(alice, &[bob]).await;

    let mut rx = live::spawn_badge_tracker(h.dyn_store(), h.registry.clone(), bob)
        .await
        .unwrap();
    assert_eq!(rx.borrow().total, 0);

    let m1 = h.send(alice, c1).await;
    let snap = wait_for(&mut rx, |s: &BadgeSnapshot| s.total == 1).await;
    assert_eq!(snap.conversations[&c1], 1);

    // a conversation created after the tracker started is picked up too
    let c2 = h.conversation(carol, &[bob]).await;
    h.send(carol, c2).await;
    let snap = wait_for(&mut rx, |s: &BadgeSnapshot| s.total == 2).await;
    assert_eq!(snap.conversations[&c2], 1);

    h.mark_read(bob, c1, m1).await;
    let snap = wait_for(&mut rx, |s: &BadgeSnapshot| s.total == 1).await;
    assert_eq!(snap.conversations[&c1], 0);

    // bob's own messages never count
    h.send(bob, c2).await;
    ConversationService::delete(h.store.as_ref(), &h.registry, carol, c2)
        .await
        .unwrap();
    let snap = wait_for(&mut rx, |s: &BadgeSnapshot| s.total == 0).await;
    assert!(!snap.conversations.contains_key(&c2));
}

#[tokio::test]
async fn test_live_seen_by_view() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob Stone").await;
    let c = h.conversation(alice, &[bob]).await;
    let first = h.send(alice, c).await;

    let mut rx = live::spawn_conversation_view(h.dyn_store(), h.registry.clone(), alice, c, 100)
        .await
        .unwrap();
    assert!(rx.borrow().receipts.is_empty());

    h.mark_read(bob, c, first).await;
    let snap = wait_for(&mut rx, |s: &SeenBySnapshot| !s.receipts.is_empty()).await;
    assert_eq!(snap.receipts[0].message_id, first);
    assert_eq!(snap.receipts[0].seen_by.label, "Seen by Bob");

    let second = h.send(alice, c).await;
    h.mark_read(bob, c, second).await;
    let snap = wait_for(&mut rx, |s: &SeenBySnapshot| {
        s.receipts.first().map(|r| r.message_id) == Some(second)
    })
    .await;
    assert_eq!(snap.receipts.len(), 1);
}

#[tokio::test]
async fn test_dropping_observer_unsubscribes() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let c = h.conversation(alice, &[bob]).await;

    let rx = live::spawn_badge_tracker(h.dyn_store(), h.registry.clone(), bob)
        .await
        .unwrap();
    assert_eq!(h.registry.subscriber_count(Topic::User(bob)).await, 1);
    drop(rx);

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.registry.subscriber_count(Topic::User(bob)).await > 0
            || h.registry.subscriber_count(Topic::Conversation(c)).await > 0
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("observer did not unsubscribe");
}

#[tokio::test]
async fn test_outsider_cannot_observe_conversation() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let c = h.conversation(alice, &[bob]).await;

    let outsider = Uuid::new_v4();
    match live::spawn_conversation_view(h.dyn_store(), h.registry.clone(), outsider, c, 100).await {
        Err(err) => assert_eq!(err, AppError::Unauthorized),
        Ok(_) => panic!("outsider was allowed to observe"),
    }
    assert_eq!(h.registry.subscriber_count(Topic::Conversation(c)).await, 0);
}

#[tokio::test]
async fn test_leaving_drops_conversation_subscription() {
    let h = Harness::new();
    let alice = h.user("Alice").await;
    let bob = h.user("Bob").await;
    let carol = h.user("Carol").await;
    let g = h.conversation(alice, &[bob, carol]).await;
    h.send(alice, g).await;

    let mut rx = live::spawn_badge_tracker(h.dyn_store(), h.registry.clone(), bob)
        .await
        .unwrap();
    assert_eq!(rx.borrow().total, 1);
    assert_eq!(h.registry.subscriber_count(Topic::Conversation(g)).await, 1);

    ConversationService::leave(h.store.as_ref(), &h.registry, bob, g)
        .await
        .unwrap();
    let snap = wait_for(&mut rx, |s: &BadgeSnapshot| s.total == 0).await;
    assert!(!snap.conversations.contains_key(&g));

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.registry.subscriber_count(Topic::Conversation(g)).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("conversation subscription kept after leaving");

    // still following the personal topic
    assert_eq!(h.registry.subscriber_count(Topic::User(bob)).await, 1);
}
