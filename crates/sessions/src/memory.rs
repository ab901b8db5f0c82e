//! In-process [`DocumentStore`] with JSON snapshot persistence.
//!
//! All state lives behind one `RwLock`; a commit validates every operation
//! and then applies them under the same write guard, so a batch is never
//! partially visible. Snapshots are written to
//! `state_path/store/snapshot.json` by [`MemoryStore::flush`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use ss_domain::clock::SharedClock;
use ss_domain::error::{Error, Result};
use ss_domain::model::{ArchivedMessage, Conversation, Message};

use crate::batch::{CountChange, WriteBatch, WriteOp};
use crate::cursor::ConversationPosition;
use crate::store::{
    CommitReceipt, ConversationQuery, Direction, DocumentStore, MessageQuery, StoreChange,
};

const CHANGE_CAPACITY: usize = 256;

type MessageKey = (DateTime<Utc>, String);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-conversation message log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct MessageLog {
    ordered: BTreeMap<MessageKey, Message>,
    positions: HashMap<String, DateTime<Utc>>,
    /// Highest timestamp ever assigned, kept across deletions.
    last_created_at: Option<DateTime<Utc>>,
}

impl MessageLog {
    fn insert(&mut self, message: Message) {
        self.last_created_at = Some(match self.last_created_at {
            Some(last) => last.max(message.created_at),
            None => message.created_at,
        });
        self.positions.insert(message.id.clone(), message.created_at);
        self.ordered
            .insert((message.created_at, message.id.clone()), message);
    }

    fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<&Message> {
        let at = *self.positions.get(id)?;
        self.ordered.get(&(at, id.to_owned()))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        let at = *self.positions.get(id)?;
        self.ordered.get_mut(&(at, id.to_owned()))
    }

    fn remove(&mut self, id: &str) -> Option<Message> {
        let at = self.positions.remove(id)?;
        self.ordered.remove(&(at, id.to_owned()))
    }

    /// Next server timestamp: the clock reading, bumped by a microsecond
    /// when it would not sort strictly after the previous one.
    fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut at = now;
        if let Some(last) = self.last_created_at {
            if at <= last {
                at = last + Duration::microseconds(1);
            }
        }
        self.last_created_at = Some(at);
        at
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    logs: HashMap<String, MessageLog>,
    archive: HashMap<String, Vec<ArchivedMessage>>,
}

/// On-disk form of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    conversations: Vec<Conversation>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    archive: Vec<ArchivedMessage>,
}

impl StoreState {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = StoreState::default();
        for conversation in snapshot.conversations {
            state
                .conversations
                .insert(conversation.id.clone(), conversation);
        }
        for message in snapshot.messages {
            state
                .logs
                .entry(message.conversation_id.clone())
                .or_default()
                .insert(message);
        }
        for archived in snapshot.archive {
            state
                .archive
                .entry(archived.message.conversation_id.clone())
                .or_default()
                .push(archived);
        }
        state
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            conversations: self.conversations.values().cloned().collect(),
            messages: self
                .logs
                .values()
                .flat_map(|log| log.ordered.values().cloned())
                .collect(),
            archive: self.archive.values().flatten().cloned().collect(),
        }
    }

    fn require_conversation(&self, id: &str) -> Result<()> {
        if self.conversations.contains_key(id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("conversation {id}")))
        }
    }

    fn require_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        removed: &HashSet<&str>,
    ) -> Result<()> {
        let exists = self
            .logs
            .get(conversation_id)
            .is_some_and(|log| log.contains(message_id));
        if !exists || removed.contains(message_id) {
            return Err(Error::NotFound(format!(
                "message {message_id} in conversation {conversation_id}"
            )));
        }
        Ok(())
    }

    /// Check every precondition before anything is applied.
    fn check(&self, ops: &[WriteOp]) -> Result<()> {
        let mut removed: HashSet<&str> = HashSet::new();
        for op in ops {
            match op {
                WriteOp::InsertMessage {
                    conversation_id,
                    text,
                    ..
                } => {
                    self.require_conversation(conversation_id)?;
                    if text.trim().is_empty() {
                        return Err(Error::Validation("message text is empty".into()));
                    }
                }
                WriteOp::UpdateConversation {
                    conversation_id, ..
                } => self.require_conversation(conversation_id)?,
                WriteOp::PutArchived {
                    conversation_id,
                    message_id,
                }
                | WriteOp::SetFeedback {
                    conversation_id,
                    message_id,
                    ..
                } => self.require_message(conversation_id, message_id, &removed)?,
                WriteOp::DeleteMessage {
                    conversation_id,
                    message_id,
                } => {
                    self.require_message(conversation_id, message_id, &removed)?;
                    removed.insert(message_id.as_str());
                }
            }
        }
        Ok(())
    }

    /// Apply a batch that already passed [`StoreState::check`].
    fn apply(&mut self, ops: Vec<WriteOp>, now: DateTime<Utc>) -> (CommitReceipt, Vec<StoreChange>) {
        let mut inserted = Vec::new();
        let mut updated: Vec<String> = Vec::new();
        let mut latest_insert: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut changes = Vec::new();

        for op in ops {
            match op {
                WriteOp::InsertMessage {
                    conversation_id,
                    role,
                    text,
                } => {
                    let log = self.logs.entry(conversation_id.clone()).or_default();
                    let created_at = log.next_timestamp(now);
                    let message = Message {
                        id: Uuid::new_v4().to_string(),
                        conversation_id: conversation_id.clone(),
                        role,
                        text,
                        created_at,
                        feedback: None,
                    };
                    log.insert(message.clone());
                    latest_insert.insert(conversation_id.clone(), created_at);
                    push_unique(&mut changes, StoreChange::Messages { conversation_id });
                    inserted.push(message);
                }
                WriteOp::UpdateConversation {
                    conversation_id,
                    update,
                } => {
                    let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
                        continue;
                    };
                    if update.touch {
                        let at = latest_insert
                            .get(&conversation_id)
                            .map_or(now, |t| (*t).max(now));
                        conversation.updated_at = conversation.updated_at.max(at);
                    }
                    match update.message_count {
                        CountChange::Unchanged => {}
                        CountChange::Add(n) => conversation.meta.message_count += n,
                        CountChange::Set(n) => conversation.meta.message_count = n,
                    }
                    if let Some(title) = update.title_if_default {
                        if conversation.has_default_title() {
                            conversation.title = title;
                        }
                    }
                    push_unique(
                        &mut changes,
                        StoreChange::Conversations {
                            owner_id: conversation.owner_id.clone(),
                        },
                    );
                    if !updated.contains(&conversation_id) {
                        updated.push(conversation_id);
                    }
                }
                WriteOp::PutArchived {
                    conversation_id,
                    message_id,
                } => {
                    let message = self
                        .logs
                        .get(&conversation_id)
                        .and_then(|log| log.get(&message_id))
                        .cloned();
                    if let Some(message) = message {
                        self.archive
                            .entry(conversation_id)
                            .or_default()
                            .push(ArchivedMessage {
                                message,
                                archived_at: now,
                            });
                    }
                }
                WriteOp::DeleteMessage {
                    conversation_id,
                    message_id,
                } => {
                    if let Some(log) = self.logs.get_mut(&conversation_id) {
                        log.remove(&message_id);
                    }
                    push_unique(&mut changes, StoreChange::Messages { conversation_id });
                }
                WriteOp::SetFeedback {
                    conversation_id,
                    message_id,
                    feedback,
                } => {
                    if let Some(message) = self
                        .logs
                        .get_mut(&conversation_id)
                        .and_then(|log| log.get_mut(&message_id))
                    {
                        message.feedback = Some(feedback);
                    }
                    push_unique(&mut changes, StoreChange::Messages { conversation_id });
                }
            }
        }

        let conversations = updated
            .iter()
            .filter_map(|id| self.conversations.get(id).cloned())
            .collect();

        (
            CommitReceipt {
                committed_at: now,
                inserted,
                conversations,
            },
            changes,
        )
    }
}

fn push_unique(changes: &mut Vec<StoreChange>, change: StoreChange) {
    if !changes.contains(&change) {
        changes.push(change);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MemoryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryStore {
    state: RwLock<StoreState>,
    clock: SharedClock,
    max_batch_ops: usize,
    snapshot_path: Option<PathBuf>,
    changes: broadcast::Sender<StoreChange>,
    dirty: AtomicBool,
}

impl MemoryStore {
    /// A store that is never written to disk.
    pub fn ephemeral(clock: SharedClock, max_batch_ops: usize) -> Self {
        Self::with_state(StoreState::default(), clock, max_batch_ops, None)
    }

    /// Load or create the store at `state_path/store/snapshot.json`.
    pub fn open(state_path: &Path, clock: SharedClock, max_batch_ops: usize) -> Result<Self> {
        let dir = state_path.join("store");
        std::fs::create_dir_all(&dir)?;

        let snapshot_path = dir.join("snapshot.json");
        let snapshot = if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)?;
            serde_json::from_str::<Snapshot>(&raw)?
        } else {
            Snapshot::default()
        };

        tracing::info!(
            conversations = snapshot.conversations.len(),
            messages = snapshot.messages.len(),
            archived = snapshot.archive.len(),
            path = %snapshot_path.display(),
            "document store loaded"
        );

        Ok(Self::with_state(
            StoreState::from_snapshot(snapshot),
            clock,
            max_batch_ops,
            Some(snapshot_path),
        ))
    }

    fn with_state(
        state: StoreState,
        clock: SharedClock,
        max_batch_ops: usize,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            state: RwLock::new(state),
            clock,
            max_batch_ops,
            snapshot_path,
            changes,
            dirty: AtomicBool::new(false),
        }
    }

    /// Server timestamp at microsecond precision, so cursors round-trip.
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    fn publish(&self, changes: Vec<StoreChange>) {
        if !changes.is_empty() {
            self.dirty.store(true, Ordering::Release);
        }
        for change in changes {
            // No receivers is fine.
            let _ = self.changes.send(change);
        }
    }

    /// Write the snapshot if anything changed since the last flush.
    /// Returns whether a snapshot was written.
    pub async fn flush(&self) -> Result<bool> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let json = {
            let state = self.state.read();
            serde_json::to_string(&state.to_snapshot())?
        };
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            self.dirty.store(true, Ordering::Release);
            return Err(Error::Io(e));
        }
        Ok(true)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_conversation(&self, mut conversation: Conversation) -> Result<Conversation> {
        let now = self.now();
        conversation.created_at = now;
        conversation.updated_at = now;
        {
            let mut state = self.state.write();
            if state.conversations.contains_key(&conversation.id) {
                return Err(Error::Validation(format!(
                    "conversation {} already exists",
                    conversation.id
                )));
            }
            state
                .conversations
                .insert(conversation.id.clone(), conversation.clone());
        }
        self.publish(vec![StoreChange::Conversations {
            owner_id: conversation.owner_id.clone(),
        }]);
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.state.read().conversations.get(id).cloned())
    }

    async fn delete_conversation(&self, id: &str) -> Result<usize> {
        let (owner_id, removed) = {
            let mut state = self.state.write();
            let conversation = state
                .conversations
                .remove(id)
                .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
            let hot = state.logs.remove(id).map_or(0, |log| log.ordered.len());
            let cold = state.archive.remove(id).map_or(0, |a| a.len());
            (conversation.owner_id, hot + cold)
        };
        self.publish(vec![
            StoreChange::Messages {
                conversation_id: id.to_owned(),
            },
            StoreChange::Conversations { owner_id },
        ]);
        Ok(removed)
    }

    async fn conversation_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.state.read().conversations.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn query_conversations(
        &self,
        owner_id: &str,
        query: ConversationQuery,
    ) -> Result<Vec<Conversation>> {
        let state = self.state.read();
        let mut owned: Vec<&Conversation> = state
            .conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .filter(|c| {
                query
                    .start_after
                    .as_ref()
                    .map_or(true, |after| ConversationPosition::of(c) < *after)
            })
            .collect();
        owned.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(owned
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn query_messages(
        &self,
        conversation_id: &str,
        query: MessageQuery,
    ) -> Result<Vec<Message>> {
        let state = self.state.read();
        let Some(log) = state.logs.get(conversation_id) else {
            return Ok(Vec::new());
        };

        let after = query
            .start_after
            .as_ref()
            .map(|p| (p.created_at, p.id.clone()));
        let iter: Box<dyn Iterator<Item = &Message> + '_> = match (query.direction, after) {
            (Direction::Asc, None) => Box::new(log.ordered.values()),
            (Direction::Asc, Some(key)) => Box::new(
                log.ordered
                    .range((Bound::Excluded(key), Bound::Unbounded))
                    .map(|(_, m)| m),
            ),
            (Direction::Desc, None) => Box::new(log.ordered.values().rev()),
            (Direction::Desc, Some(key)) => Box::new(
                log.ordered
                    .range((Bound::Unbounded, Bound::Excluded(key)))
                    .rev()
                    .map(|(_, m)| m),
            ),
        };

        Ok(iter
            .filter(|m| query.role.map_or(true, |role| m.role == role))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count_messages(&self, conversation_id: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .logs
            .get(conversation_id)
            .map_or(0, |log| log.ordered.len()))
    }

    async fn archived_messages(&self, conversation_id: &str) -> Result<Vec<ArchivedMessage>> {
        Ok(self
            .state
            .read()
            .archive
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt> {
        if batch.len() > self.max_batch_ops {
            return Err(Error::Validation(format!(
                "batch of {} operations exceeds the limit of {}",
                batch.len(),
                self.max_batch_ops
            )));
        }
        let now = self.now();
        let (receipt, changes) = {
            let mut state = self.state.write();
            state.check(batch.ops())?;
            state.apply(batch.into_ops(), now)
        };
        self.publish(changes);
        Ok(receipt)
    }

    fn watch(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
