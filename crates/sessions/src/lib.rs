//! Conversation persistence and synchronization.
//!
//! Everything that touches the shared message log lives here: the
//! [`DocumentStore`] abstraction over the ordered transactional collection
//! store (with an in-memory, snapshot-persisted implementation), the write
//! path that appends messages and keeps conversation metadata current, live
//! windowed subscriptions, cursor pagination, retention/archival and
//! feedback collection.

pub mod batch;
pub mod cursor;
pub mod feedback;
pub mod memory;
pub mod pagination;
pub mod retention;
pub mod store;
pub mod subscription;
pub mod writer;

pub use batch::{CountChange, ConversationUpdate, WriteBatch, WriteOp};
pub use cursor::{ConversationPosition, MessagePosition};
pub use feedback::{FeedbackRecord, FeedbackStats, FeedbackStore, FeedbackSubmission};
pub use memory::MemoryStore;
pub use pagination::{Page, Paginator};
pub use retention::{soft_trim, ArchiveReport, RetentionManager, SweepReport};
pub use store::{
    CommitReceipt, ConversationQuery, Direction, DocumentStore, MessageQuery, StoreChange,
};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionStatus};
pub use writer::MessageWriter;
