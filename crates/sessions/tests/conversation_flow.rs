use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use ss_domain::clock::ManualClock;
use ss_domain::config::{RetentionConfig, SubscriptionsConfig};
use ss_domain::error::{Error, Result};
use ss_domain::model::{ArchivedMessage, Conversation, Message, Persona, Role};
use ss_sessions::{
    CommitReceipt, ConversationQuery, ConversationUpdate, CountChange, DocumentStore,
    MemoryStore, MessageQuery, MessageWriter, Paginator, RetentionManager, StoreChange,
    SubscriptionManager, SubscriptionStatus, WriteBatch,
};

// ── Helpers ───────────────────────────────────────────────────────────

fn memory_store() -> Arc<MemoryStore> {
    clocked_store().0
}

fn clocked_store() -> (Arc<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    (Arc::new(MemoryStore::ephemeral(clock.clone(), 500)), clock)
}

fn writer(store: Arc<dyn DocumentStore>) -> MessageWriter {
    MessageWriter::with_existence_policy(store, 3, Duration::from_millis(5))
}

/// Bulk-load `count` alternating messages in store-sized batches.
async fn seed(store: &dyn DocumentStore, conversation_id: &str, count: usize) {
    let mut seeded = 0;
    while seeded < count {
        let n = (count - seeded).min(400);
        let mut batch = WriteBatch::new();
        for i in seeded..seeded + n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            batch.insert_message(conversation_id, role, &format!("m{}", i + 1));
        }
        batch.update_conversation(
            conversation_id,
            ConversationUpdate {
                touch: true,
                message_count: CountChange::Add(n),
                title_if_default: None,
            },
        );
        store.commit(batch).await.unwrap();
        seeded += n;
    }
}

fn texts(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.text.clone()).collect()
}

/// Delegates to a [`MemoryStore`] but fails the n-th commit.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_on_commit: usize,
    commits: AtomicUsize,
    /// While set, message queries fail as if the backend were unreachable.
    queries_down: AtomicBool,
}

impl FlakyStore {
    fn wrapping(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_on_commit: 0,
            commits: AtomicUsize::new(0),
            queries_down: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        self.inner.insert_conversation(conversation).await
    }
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.inner.get_conversation(id).await
    }
    async fn delete_conversation(&self, id: &str) -> Result<usize> {
        self.inner.delete_conversation(id).await
    }
    async fn conversation_ids(&self) -> Result<Vec<String>> {
        self.inner.conversation_ids().await
    }
    async fn query_conversations(
        &self,
        owner_id: &str,
        query: ConversationQuery,
    ) -> Result<Vec<Conversation>> {
        self.inner.query_conversations(owner_id, query).await
    }
    async fn query_messages(&self, conversation_id: &str, query: MessageQuery) -> Result<Vec<Message>> {
        if self.queries_down.load(Ordering::SeqCst) {
            return Err(Error::Store("injected query failure".into()));
        }
        self.inner.query_messages(conversation_id, query).await
    }
    async fn count_messages(&self, conversation_id: &str) -> Result<usize> {
        self.inner.count_messages(conversation_id).await
    }
    async fn archived_messages(&self, conversation_id: &str) -> Result<Vec<ArchivedMessage>> {
        self.inner.archived_messages(conversation_id).await
    }
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_commit {
            return Err(Error::Store("injected commit failure".into()));
        }
        self.inner.commit(batch).await
    }
    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.watch()
    }
}

// ── Write path ────────────────────────────────────────────────────────

#[tokio::test]
async fn first_user_message_names_the_conversation() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    assert_eq!(conv.title, "New Chat");

    let id = writer.append_user_message(&conv.id, "Hello").await.unwrap();
    assert!(!id.is_empty());

    let conv = writer.conversation(&conv.id).await.unwrap();
    assert_eq!(conv.title, "Hello");
    assert_eq!(conv.meta.message_count, 1);
    assert!(conv.updated_at >= conv.created_at);

    let stored = store
        .query_messages(&conv.id, MessageQuery::oldest(10))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    assert_eq!(stored[0].role, Role::User);
}

#[tokio::test]
async fn concurrent_appends_keep_count_and_order() {
    let store = memory_store();
    let writer = Arc::new(writer(store.clone()));
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let writer = writer.clone();
        let id = conv.id.clone();
        handles.push(tokio::spawn(async move {
            writer.append_user_message(&id, &format!("q{i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let conv = writer.conversation(&conv.id).await.unwrap();
    assert_eq!(conv.meta.message_count, 20);
    let stored = store
        .query_messages(&conv.id, MessageQuery::oldest(100))
        .await
        .unwrap();
    assert!(stored.windows(2).all(|w| w[0].created_at < w[1].created_at));
    // Exactly one of the racing first messages named it.
    assert!(conv.title.starts_with('q'));
}

// ── Pagination ────────────────────────────────────────────────────────

#[tokio::test]
async fn paging_backwards_never_overlaps() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    seed(store.as_ref(), &conv.id, 25).await;

    let pages = Paginator::new(store.clone());
    let latest = pages.fetch_latest(&conv.id, 10).await.unwrap();
    let expected: Vec<String> = (16..=25).map(|i| format!("m{i}")).collect();
    assert_eq!(texts(&latest.items), expected);

    let older = pages
        .fetch_older(&conv.id, latest.cursor.as_deref().unwrap(), 10)
        .await
        .unwrap();
    let expected: Vec<String> = (6..=15).map(|i| format!("m{i}")).collect();
    assert_eq!(texts(&older.items), expected);

    let oldest = pages
        .fetch_older(&conv.id, older.cursor.as_deref().unwrap(), 10)
        .await
        .unwrap();
    assert_eq!(oldest.items.len(), 5);

    let done = pages
        .fetch_older(&conv.id, oldest.cursor.as_deref().unwrap(), 10)
        .await
        .unwrap();
    assert!(done.items.is_empty());
    assert!(done.cursor.is_none());

    let mut seen = HashSet::new();
    for m in latest.items.iter().chain(&older.items).chain(&oldest.items) {
        assert!(seen.insert(m.id.clone()), "duplicate {}", m.text);
    }
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn conversation_pages_follow_activity() {
    let (store, clock) = clocked_store();
    let writer = writer(store.clone());
    let mut ids = Vec::new();
    for _ in 0..5 {
        let conv = writer
            .create_conversation("owner", Persona::default(), None)
            .await
            .unwrap();
        writer.append_user_message(&conv.id, "hi").await.unwrap();
        ids.push(conv.id);
        clock.advance(chrono::Duration::seconds(1));
    }

    let pages = Paginator::new(store.clone());
    let first = pages.fetch_conversations_page("owner", 2, None).await.unwrap();
    let second = pages
        .fetch_conversations_page("owner", 2, first.cursor.as_deref())
        .await
        .unwrap();
    let third = pages
        .fetch_conversations_page("owner", 2, second.cursor.as_deref())
        .await
        .unwrap();

    let listed: Vec<String> = first
        .items
        .iter()
        .chain(&second.items)
        .chain(&third.items)
        .map(|c| c.id.clone())
        .collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn bad_cursor_is_rejected() {
    let store = memory_store();
    let pages = Paginator::new(store);
    let err = pages.fetch_older("c1", "not-a-cursor", 10).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ── Retention ─────────────────────────────────────────────────────────

#[tokio::test]
async fn archive_moves_the_overflow_and_is_idempotent() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    seed(store.as_ref(), &conv.id, 10_050).await;

    let retention = RetentionManager::new(store.clone(), &RetentionConfig::default());
    let report = retention
        .archive_old_messages(&conv.id, 10_000)
        .await
        .unwrap();
    assert_eq!(report.archived, 50);
    assert_eq!(report.hot_count, 10_000);
    assert_eq!(store.count_messages(&conv.id).await.unwrap(), 10_000);
    assert_eq!(
        writer.conversation(&conv.id).await.unwrap().meta.message_count,
        10_000
    );

    let archived = store.archived_messages(&conv.id).await.unwrap();
    let expected: Vec<String> = (1..=50).map(|i| format!("m{i}")).collect();
    let archived_texts: Vec<String> = archived.iter().map(|a| a.message.text.clone()).collect();
    assert_eq!(archived_texts, expected);

    let again = retention
        .archive_old_messages(&conv.id, 10_000)
        .await
        .unwrap();
    assert_eq!(again.archived, 0);
    assert_eq!(store.archived_messages(&conv.id).await.unwrap().len(), 50);
}

#[tokio::test]
async fn archive_respects_the_batch_ceiling() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    seed(store.as_ref(), &conv.id, 30).await;

    let config = RetentionConfig {
        batch_ops: 6,
        ..Default::default()
    };
    let report = RetentionManager::new(store.clone(), &config)
        .archive_old_messages(&conv.id, 10)
        .await
        .unwrap();
    assert_eq!(report.archived, 20);
    assert_eq!(report.batches, 7);

    let hot = store
        .query_messages(&conv.id, MessageQuery::oldest(100))
        .await
        .unwrap();
    let expected: Vec<String> = (21..=30).map(|i| format!("m{i}")).collect();
    assert_eq!(texts(&hot), expected);
}

#[tokio::test]
async fn failed_archive_batch_leaves_no_message_lost_or_duplicated() {
    let inner = memory_store();
    let conv = writer(inner.clone())
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    seed(inner.as_ref(), &conv.id, 30).await;

    let flaky = Arc::new(FlakyStore {
        fail_on_commit: 3,
        ..FlakyStore::wrapping(inner.clone())
    });
    let config = RetentionConfig {
        batch_ops: 6,
        ..Default::default()
    };
    let retention = RetentionManager::new(flaky.clone(), &config);
    let err = retention.archive_old_messages(&conv.id, 10).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    let hot = inner.count_messages(&conv.id).await.unwrap();
    let cold = inner.archived_messages(&conv.id).await.unwrap().len();
    assert_eq!(cold, 6);
    assert_eq!(hot + cold, 30);

    // A second run finishes the job.
    let report = retention.archive_old_messages(&conv.id, 10).await.unwrap();
    assert_eq!(report.archived, 14);
    let archived: HashSet<String> = inner
        .archived_messages(&conv.id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.message.id)
        .collect();
    assert_eq!(archived.len(), 20);
    assert_eq!(inner.count_messages(&conv.id).await.unwrap(), 10);
}

// ── Subscriptions ─────────────────────────────────────────────────────

async fn next_within<T>(sub: &mut ss_sessions::Subscription<T>) -> Vec<T> {
    tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("snapshot in time")
        .expect("subscription open")
}

#[tokio::test]
async fn message_window_tracks_the_newest_messages_in_order() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    let manager = SubscriptionManager::new(store.clone(), SubscriptionsConfig::default());
    let mut sub = manager.subscribe_messages(&conv.id, 3);

    assert!(next_within(&mut sub).await.is_empty());

    for text in ["m1", "m2", "m3", "m4"] {
        writer.append_user_message(&conv.id, text).await.unwrap();
    }

    let mut window = Vec::new();
    while texts(&window) != ["m2", "m3", "m4"] {
        window = next_within(&mut sub).await;
        assert!(window.len() <= 3);
        assert!(window.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    sub.unsubscribe();
    writer.append_user_message(&conv.id, "m5").await.unwrap();
    while let Some(window) = sub.next().await {
        assert!(!texts(&window).contains(&"m5".to_string()));
    }
}

#[tokio::test]
async fn conversation_window_puts_recent_activity_first() {
    let (store, clock) = clocked_store();
    let writer = writer(store.clone());
    let older = writer
        .create_conversation("owner", Persona::default(), None)
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let newer = writer
        .create_conversation("owner", Persona::default(), None)
        .await
        .unwrap();

    let manager = SubscriptionManager::new(store.clone(), SubscriptionsConfig::default());
    let mut sub = manager.subscribe_conversations("owner", 10);
    let initial = next_within(&mut sub).await;
    assert_eq!(initial.len(), 2);
    assert_eq!(initial[0].id, newer.id);

    clock.advance(chrono::Duration::seconds(1));

    writer.append_user_message(&older.id, "bump").await.unwrap();
    loop {
        let window = next_within(&mut sub).await;
        if window[0].id == older.id && window[0].title == "bump" {
            assert_eq!(window[1].id, newer.id);
            break;
        }
    }
}

#[tokio::test]
async fn concurrent_subscriptions_are_independent() {
    let store = memory_store();
    let writer = writer(store.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    let manager = SubscriptionManager::new(store.clone(), SubscriptionsConfig::default());
    let mut first = manager.subscribe_messages(&conv.id, 5);
    let mut second = manager.subscribe_messages(&conv.id, 5);
    assert_ne!(first.id(), second.id());
    assert!(next_within(&mut first).await.is_empty());
    assert!(next_within(&mut second).await.is_empty());

    first.unsubscribe();
    writer.append_user_message(&conv.id, "m1").await.unwrap();
    writer.append_user_message(&conv.id, "m2").await.unwrap();

    let mut window = Vec::new();
    while texts(&window) != ["m1", "m2"] {
        window = next_within(&mut second).await;
    }
    assert_eq!(second.status(), SubscriptionStatus::Live);
    while let Some(window) = first.next().await {
        assert!(window.is_empty());
    }
}

#[tokio::test]
async fn failing_refreshes_stall_then_recover() {
    let inner = memory_store();
    let writer = writer(inner.clone());
    let conv = writer
        .create_conversation("guest-1", Persona::default(), None)
        .await
        .unwrap();
    writer.append_user_message(&conv.id, "hello").await.unwrap();

    let flaky = Arc::new(FlakyStore::wrapping(inner.clone()));
    flaky.queries_down.store(true, Ordering::SeqCst);
    let manager = SubscriptionManager::new(flaky.clone(), SubscriptionsConfig::default());
    let mut sub = manager.subscribe_messages(&conv.id, 10);
    let mut status = sub.status_watch();

    let stalled = tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| matches!(s, SubscriptionStatus::Stalled { .. })),
    )
    .await
    .expect("stalled in time")
    .map(|s| *s)
    .unwrap();
    assert_eq!(stalled, SubscriptionStatus::Stalled { failures: 3 });

    flaky.queries_down.store(false, Ordering::SeqCst);
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| *s == SubscriptionStatus::Live),
    )
    .await
    .expect("recovered in time")
    .unwrap();

    let window = tokio::time::timeout(Duration::from_secs(10), sub.next())
        .await
        .expect("snapshot in time")
        .expect("subscription open");
    assert_eq!(texts(&window), ["hello"]);
}
